//! Selection of candidate episode files.
//!
//! A newly detected path is either a single file or a release directory.
//! The filter keeps the video files and ignores everything else (subtitles,
//! `.nfo` files, samples in unsupported containers).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Video container extensions treated as episode media.
pub const VIDEO_EXTENSIONS: [&str; 5] = ["mkv", "mp4", "avi", "m4p", "m4v"];

/// Errors returned by [`Filter::filter`].
#[derive(Debug, Error)]
pub enum FilterError {
    /// The path is neither an existing file nor an existing directory.
    #[error("path '{}' is neither a file nor a directory", .0.display())]
    InvalidPath(PathBuf),
    /// The top-level directory could not be listed.
    #[error("failed to read directory {}", path.display())]
    ReadDirFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Decides which files under a path are candidate episode files.
#[derive(Debug, Clone)]
pub struct Filter {
    extensions: HashSet<String>,
}

impl Filter {
    /// Creates a filter accepting the standard [`VIDEO_EXTENSIONS`].
    pub fn new() -> Self {
        Self {
            extensions: VIDEO_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
        }
    }

    /// Returns the candidate episode files for `path`.
    ///
    /// A regular file is returned on its own when it is a video file. A
    /// directory is searched recursively and every video file found is
    /// returned, sorted by path. Nested entries that cannot be read are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidPath`] if `path` is neither a file nor a
    /// directory, and [`FilterError::ReadDirFailed`] if `path` is a directory
    /// that cannot be listed.
    pub fn filter(&self, path: &Path) -> Result<Vec<PathBuf>, FilterError> {
        if path.is_file() {
            return Ok(if self.is_video_file(path) {
                vec![path.to_path_buf()]
            } else {
                Vec::new()
            });
        }

        if !path.is_dir() {
            return Err(FilterError::InvalidPath(path.to_path_buf()));
        }

        let mut candidates = Vec::new();
        for entry in WalkDir::new(path).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(FilterError::ReadDirFailed {
                        path: path.to_path_buf(),
                        source: e,
                    });
                }
                Err(e) => {
                    debug!(path = ?e.path(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };

            if entry.file_type().is_file() && self.is_video_extension(entry.path()) {
                candidates.push(entry.into_path());
            }
        }

        candidates.sort();
        Ok(candidates)
    }

    /// Checks the extension of `path` against the supported set, ignoring case.
    pub fn is_video_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| self.extensions.contains(&ext.to_string_lossy().to_lowercase()))
            .unwrap_or(false)
    }

    fn is_video_file(&self, path: &Path) -> bool {
        path.is_file() && self.is_video_extension(path)
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::new()
    }
}
