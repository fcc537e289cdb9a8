//! Episode storage in the library.
//!
//! Every episode lives in `<library>/<Show Name>/Season <NN>/`, where `NN` is
//! the season number padded to at least two digits. Storing an episode moves
//! its file into that directory, creating it as needed, and never replaces a
//! file that is already there.

use crate::episode::Episode;
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{Span, debug, info, info_span, warn};

/// Errors that can occur while storing episodes.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The library directory itself is gone. Nothing can be stored anymore.
    #[error("library directory is no longer available: {}", .0.display())]
    StorageUnavailable(PathBuf),
    /// The destination already holds a file with the same name.
    #[error("'{file}' already exists in '{}'", dir.display())]
    EpisodeExists { file: String, dir: PathBuf },
    /// A proposed library directory does not exist.
    #[error("library directory does not exist: {}", .0.display())]
    DirectoryNotFound(PathBuf),
    /// Failed to create the episode directory.
    #[error("failed to create directory {}", path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Failed to move the episode file into the library.
    #[error("failed to move {} to {}", from.display(), to.display())]
    FileMoveFailure {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Stores episode files in a season-structured library.
///
/// The library directory can be replaced while other threads are storing;
/// each [`store`](Self::store) call works against the directory it saw on
/// entry.
#[derive(Debug)]
pub struct StorageManager {
    library_dir: RwLock<PathBuf>,
    span: Span,
}

impl StorageManager {
    /// Creates a storage manager for `library_dir`.
    ///
    /// The directory is not checked here; [`store`](Self::store) checks it on
    /// every call.
    pub fn new(library_dir: impl Into<PathBuf>) -> Self {
        Self {
            library_dir: RwLock::new(library_dir.into()),
            span: info_span!("storage"),
        }
    }

    /// Replaces the span events are recorded in.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Returns the current library directory.
    pub fn library_dir(&self) -> PathBuf {
        self.library_dir.read().clone()
    }

    /// Points the manager at a new library directory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DirectoryNotFound`] if `dir` is not an
    /// existing directory. The previous directory stays in use.
    pub fn set_library_dir(&self, dir: impl Into<PathBuf>) -> StorageResult<()> {
        let dir = dir.into();
        let _enter = self.span.enter();

        // Hold the write lock across the check so two setters cannot
        // interleave their validation and swap.
        let mut current = self.library_dir.write();
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "rejected library directory: not a directory");
            return Err(StorageError::DirectoryNotFound(dir));
        }

        info!(from = %current.display(), to = %dir.display(), "library directory changed");
        *current = dir;
        Ok(())
    }

    /// Returns the directory `episode` is stored in under the current library.
    pub fn episode_dir(&self, episode: &Episode) -> PathBuf {
        Self::episode_dir_in(&self.library_dir.read(), episode)
    }

    /// Returns the directory `episode` is stored in under `library_dir`.
    ///
    /// Pure path computation, no filesystem access.
    ///
    /// # Examples
    ///
    /// ```
    /// use episode_organizer::episode::{Episode, TVShow};
    /// use episode_organizer::storage_manager::StorageManager;
    /// use std::path::Path;
    ///
    /// let episode = Episode::new(TVShow::new("Prison Break"), 5, 9);
    /// assert_eq!(
    ///     StorageManager::episode_dir_in(Path::new("/library"), &episode),
    ///     Path::new("/library/Prison Break/Season 05")
    /// );
    /// ```
    pub fn episode_dir_in(library_dir: &Path, episode: &Episode) -> PathBuf {
        library_dir
            .join(&episode.tvshow.name)
            .join(format!("Season {:02}", episode.season))
    }

    /// Moves `file` into the library directory of `episode`, keeping its
    /// file name, and returns the new path.
    ///
    /// Missing show and season directories are created. The move never
    /// overwrites: when the destination exists both files are left as they
    /// were.
    ///
    /// # Errors
    ///
    /// * [`StorageError::StorageUnavailable`] if the library directory is gone
    /// * [`StorageError::EpisodeExists`] if the destination file exists
    /// * [`StorageError::DirectoryCreationFailed`] or
    ///   [`StorageError::FileMoveFailure`] for other I/O failures
    pub fn store(&self, episode: &Episode, file: &Path) -> StorageResult<PathBuf> {
        let _enter = self.span.enter();
        let library_dir = self.library_dir();

        if !library_dir.is_dir() {
            return Err(StorageError::StorageUnavailable(library_dir));
        }

        let episode_dir = Self::episode_dir_in(&library_dir, episode);
        debug!(episode = %episode, dir = %episode_dir.display(), "storing episode");

        fs::create_dir_all(&episode_dir).map_err(|e| StorageError::DirectoryCreationFailed {
            path: episode_dir.clone(),
            source: e,
        })?;

        let file_name = file.file_name().ok_or_else(|| StorageError::FileMoveFailure {
            from: file.to_path_buf(),
            to: episode_dir.clone(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "file has no name component"),
        })?;
        let destination = episode_dir.join(file_name);

        move_no_clobber(file, &destination).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                StorageError::EpisodeExists {
                    file: file_name.to_string_lossy().to_string(),
                    dir: episode_dir.clone(),
                }
            } else {
                StorageError::FileMoveFailure {
                    from: file.to_path_buf(),
                    to: destination.clone(),
                    source: e,
                }
            }
        })?;

        info!(episode = %episode, path = %destination.display(), "stored episode");
        Ok(destination)
    }
}

/// Moves `from` to `to`, failing with `AlreadyExists` instead of replacing
/// an existing `to`.
///
/// A hard link claims the destination name atomically. When linking is not
/// possible (another filesystem, no link support) the destination is created
/// exclusively and the data copied into it.
fn move_no_clobber(from: &Path, to: &Path) -> io::Result<()> {
    if to.symlink_metadata().is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "destination already exists",
        ));
    }

    match fs::hard_link(from, to) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(e),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(e),
        Err(_) => copy_into_place(from, to)?,
    }

    if let Err(e) = fs::remove_file(from) {
        // Leave the source where it was rather than keeping two copies.
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

/// Copies `from` into a newly created `to`. A partial copy is removed on
/// failure.
fn copy_into_place(from: &Path, to: &Path) -> io::Result<()> {
    let mut target = OpenOptions::new().write(true).create_new(true).open(to)?;

    let result = File::open(from)
        .and_then(|mut source| io::copy(&mut source, &mut target))
        .and_then(|_| target.sync_all());

    if let Err(e) = result {
        drop(target);
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}
