//! The organizing pipeline: filter, match, store, clean up.
//!
//! The [`Organizer`] is the handler the [`Watcher`](crate::watcher::Watcher)
//! calls for every path that appears in the watch directory. Handling one
//! path never fails; every problem ends as one of the [`Outcome`]s.

use crate::filter::{Filter, FilterError};
use crate::matcher::Matcher;
use crate::storage_manager::{StorageError, StorageManager};
use crate::watcher::{Outcome, WatchHandler};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{Span, debug, error, info, info_span, warn};

/// What happened to a single candidate file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateResult {
    Stored,
    NoMatch,
    /// Stored nothing and the source must stay (duplicate, I/O error).
    Kept,
}

/// Moves episodes from the watch directory into the library.
pub struct Organizer {
    filter: Filter,
    matcher: Matcher,
    storage: Arc<StorageManager>,
    span: Span,
}

impl Organizer {
    pub fn new(filter: Filter, matcher: Matcher, storage: Arc<StorageManager>) -> Self {
        Self {
            filter,
            matcher,
            storage,
            span: info_span!("organizer"),
        }
    }

    /// Replaces the span events are recorded in.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    /// Handles a newly detected path.
    ///
    /// Every candidate file under `path` is matched by its own file name and
    /// stored. `path` is removed from the watch directory once something was
    /// stored and no candidate needs to stay behind; candidates without a
    /// match do not hold the removal back.
    pub fn organize(&self, path: &Path) -> Outcome {
        let _enter = self.span.enter();
        info!(path = %path.display(), "detected new path");

        let candidates = match self.filter.filter(path) {
            Ok(candidates) => candidates,
            Err(e @ FilterError::InvalidPath(_)) => {
                warn!(error = %e, "skipping path");
                return Outcome::Skipped;
            }
            Err(e) => {
                error!(error = %e, source = ?std::error::Error::source(&e), "failed to scan path");
                return Outcome::Skipped;
            }
        };

        if candidates.is_empty() {
            info!(path = %path.display(), "no episode file found");
            return Outcome::Skipped;
        }

        let mut results = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            match self.organize_candidate(candidate) {
                Ok(result) => results.push(result),
                Err(fatal) => {
                    error!(error = %fatal, "library is gone, stopping the service");
                    return Outcome::FatalStop;
                }
            }
        }

        let stored = results.contains(&CandidateResult::Stored);
        let kept = results.contains(&CandidateResult::Kept);
        if !stored || kept {
            info!(path = %path.display(), "leaving path in the watch directory");
            return Outcome::Skipped;
        }

        self.remove_source(path);
        Outcome::Done
    }

    /// Matches and stores one candidate file. Only a missing library is
    /// returned as an error.
    fn organize_candidate(&self, candidate: &Path) -> Result<CandidateResult, StorageError> {
        let name = candidate
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        debug!(file = %name, "matching episode file");

        let episode = match self.matcher.match_name(&name) {
            Ok(episode) => episode,
            Err(e) => {
                warn!(file = %candidate.display(), error = %e, "could not match");
                return Ok(CandidateResult::NoMatch);
            }
        };
        info!(file = %name, episode = %episode, "matched episode");

        match self.storage.store(&episode, candidate) {
            Ok(_) => Ok(CandidateResult::Stored),
            Err(e @ StorageError::StorageUnavailable(_)) => Err(e),
            Err(e @ StorageError::EpisodeExists { .. }) => {
                warn!(episode = %episode, error = %e, "episode already in library");
                Ok(CandidateResult::Kept)
            }
            Err(e) => {
                error!(
                    episode = %episode,
                    error = %e,
                    source = ?std::error::Error::source(&e),
                    "failed to store episode"
                );
                Ok(CandidateResult::Kept)
            }
        }
    }

    fn remove_source(&self, path: &Path) {
        let result = match fs::symlink_metadata(path) {
            Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path),
            Ok(_) => fs::remove_file(path),
            // Single-file drops were moved away already.
            Err(_) => return,
        };

        match result {
            Ok(()) => info!(path = %path.display(), "cleared from watch directory"),
            Err(e) => error!(path = %path.display(), error = %e, "failed to clear from watch directory"),
        }
    }
}

impl WatchHandler for Organizer {
    fn organize(&self, path: &Path) -> Outcome {
        Organizer::organize(self, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Setup {
        _temp_dir: TempDir,
        watch: PathBuf,
        library: PathBuf,
        organizer: Organizer,
    }

    fn setup() -> Setup {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let watch = temp_dir.path().join("watch");
        let library = temp_dir.path().join("library");
        fs::create_dir(&watch).unwrap();
        fs::create_dir(&library).unwrap();

        let storage = Arc::new(StorageManager::new(&library));
        let organizer = Organizer::new(Filter::new(), Matcher::new(), storage);
        Setup {
            _temp_dir: temp_dir,
            watch,
            library,
            organizer,
        }
    }

    #[test]
    fn test_organize_single_file() {
        let setup = setup();
        let file = setup.watch.join("Prison.Break.S05E09.720p.HDTV.x264-KILLERS[rarbg].mkv");
        fs::write(&file, "episode").unwrap();

        assert_eq!(setup.organizer.organize(&file), Outcome::Done);
        assert!(!file.exists());
        assert!(
            setup
                .library
                .join("Prison Break/Season 05/Prison.Break.S05E09.720p.HDTV.x264-KILLERS[rarbg].mkv")
                .is_file()
        );
    }

    #[test]
    fn test_organize_release_directory_removes_it() {
        let setup = setup();
        let release = setup.watch.join("Prison.Break.S05E09.720p-GRP");
        fs::create_dir(&release).unwrap();
        fs::write(release.join("prison.break.s05e09.720p-grp.mkv"), "episode").unwrap();
        fs::write(release.join("prison.break.s05e09.720p-grp.nfo"), "info").unwrap();

        assert_eq!(setup.organizer.organize(&release), Outcome::Done);
        assert!(!release.exists());
        assert!(
            setup
                .library
                .join("Prison Break/Season 05/prison.break.s05e09.720p-grp.mkv")
                .is_file()
        );
    }

    #[test]
    fn test_organize_without_candidates_leaves_path() {
        let setup = setup();
        let file = setup.watch.join("notes.txt");
        fs::write(&file, "hello").unwrap();

        assert_eq!(setup.organizer.organize(&file), Outcome::Skipped);
        assert!(file.exists());
    }

    #[test]
    fn test_organize_unmatched_file_is_left() {
        let setup = setup();
        let file = setup.watch.join("Home.Video.720p.mkv");
        fs::write(&file, "video").unwrap();

        assert_eq!(setup.organizer.organize(&file), Outcome::Skipped);
        assert!(file.exists());
        assert_eq!(fs::read_dir(&setup.library).unwrap().count(), 0);
    }

    #[test]
    fn test_organize_missing_path_is_skipped() {
        let setup = setup();
        let missing = setup.watch.join("gone.mkv");

        assert_eq!(setup.organizer.organize(&missing), Outcome::Skipped);
    }

    #[test]
    fn test_organize_duplicate_keeps_source() {
        let setup = setup();
        let season = setup.library.join("Prison Break/Season 05");
        fs::create_dir_all(&season).unwrap();
        fs::write(season.join("Prison.Break.S05E09.mkv"), "old").unwrap();

        let file = setup.watch.join("Prison.Break.S05E09.mkv");
        fs::write(&file, "new").unwrap();

        assert_eq!(setup.organizer.organize(&file), Outcome::Skipped);
        assert_eq!(fs::read_to_string(&file).unwrap(), "new");
        assert_eq!(
            fs::read_to_string(season.join("Prison.Break.S05E09.mkv")).unwrap(),
            "old"
        );
    }

    #[test]
    fn test_organize_directory_with_duplicate_is_not_removed() {
        let setup = setup();
        let season = setup.library.join("Show/Season 01");
        fs::create_dir_all(&season).unwrap();
        fs::write(season.join("Show.S01E02.mkv"), "old").unwrap();

        let release = setup.watch.join("Show.S01E01-E02");
        fs::create_dir(&release).unwrap();
        fs::write(release.join("Show.S01E01.mkv"), "one").unwrap();
        fs::write(release.join("Show.S01E02.mkv"), "two").unwrap();

        assert_eq!(setup.organizer.organize(&release), Outcome::Skipped);
        assert!(season.join("Show.S01E01.mkv").is_file());
        assert!(release.join("Show.S01E02.mkv").is_file());
    }

    #[test]
    fn test_organize_missing_library_is_fatal() {
        let setup = setup();
        let file = setup.watch.join("Prison.Break.S05E09.mkv");
        fs::write(&file, "episode").unwrap();
        fs::remove_dir(&setup.library).unwrap();

        assert_eq!(setup.organizer.organize(&file), Outcome::FatalStop);
        assert!(file.exists());
    }

    #[test]
    fn test_organize_os_error_is_recoverable() {
        let setup = setup();
        fs::write(setup.library.join("Prison Break"), "not a directory").unwrap();

        let blocked = setup.watch.join("Prison.Break.S05E09.mkv");
        fs::write(&blocked, "episode").unwrap();
        assert_eq!(setup.organizer.organize(&blocked), Outcome::Skipped);
        assert!(blocked.is_file());

        let next = setup.watch.join("Other.Show.S01E01.mkv");
        fs::write(&next, "episode").unwrap();
        assert_eq!(setup.organizer.organize(&next), Outcome::Done);
        assert!(setup
            .library
            .join("Other Show/Season 01/Other.Show.S01E01.mkv")
            .is_file());
    }
}
