//! Watching the download directory for new arrivals.
//!
//! The [`Watcher`] owns one OS-level watch on the current watch directory
//! and forwards every new top-level entry to a [`WatchHandler`]. All paths
//! are handled one at a time on the thread running
//! [`run_forever`](Watcher::run_forever). The watched directory can be
//! replaced from any thread while the loop runs.

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{Span, debug, info, info_span, warn};

/// How the handling of one detected path ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The path was organized and removed from the watch directory.
    Done,
    /// The path was left where it is.
    Skipped,
    /// Nothing more can be organized; the watch loop must end.
    FatalStop,
}

/// Receives the paths that appear in the watch directory.
pub trait WatchHandler: Send + Sync {
    fn organize(&self, path: &Path) -> Outcome;
}

/// Errors raised while setting up or changing the watch.
#[derive(Debug, Error)]
pub enum WatchError {
    /// A proposed watch directory does not exist.
    #[error("watch directory does not exist: {}", .0.display())]
    DirectoryNotFound(PathBuf),
    /// The OS watch could not be created or changed.
    #[error("failed to watch {}", path.display())]
    WatchFailed {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

enum Message {
    Fs(notify::Result<Event>),
    Shutdown,
}

struct WatchState {
    dir: PathBuf,
    os_watcher: RecommendedWatcher,
}

/// Watches a single directory and dispatches new entries to its handler.
pub struct Watcher {
    state: Mutex<WatchState>,
    handler: Arc<dyn WatchHandler>,
    tx: Sender<Message>,
    rx: Mutex<Receiver<Message>>,
    stopped: AtomicBool,
    span: Span,
}

impl Watcher {
    /// Starts watching `watch_dir`.
    ///
    /// Events are queued from this point on and handled once
    /// [`run_forever`](Self::run_forever) runs.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::DirectoryNotFound`] if `watch_dir` is not a
    /// directory, or [`WatchError::WatchFailed`] if the OS watch fails.
    pub fn new(
        watch_dir: impl Into<PathBuf>,
        handler: Arc<dyn WatchHandler>,
    ) -> Result<Self, WatchError> {
        let dir = watch_dir.into();
        if !dir.is_dir() {
            return Err(WatchError::DirectoryNotFound(dir));
        }

        let (tx, rx) = mpsc::channel();
        let event_tx = tx.clone();
        let mut os_watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // The receiver only goes away together with the watcher.
            let _ = event_tx.send(Message::Fs(res));
        })
        .map_err(|e| watch_failed(&dir, e))?;

        os_watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| watch_failed(&dir, e))?;

        Ok(Self {
            state: Mutex::new(WatchState { dir, os_watcher }),
            handler,
            tx,
            rx: Mutex::new(rx),
            stopped: AtomicBool::new(false),
            span: info_span!("watcher"),
        })
    }

    /// Replaces the span events are recorded in.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Returns the directory currently watched.
    pub fn watch_dir(&self) -> PathBuf {
        self.state.lock().dir.clone()
    }

    /// Switches the watch to `dir`.
    ///
    /// The new directory is watched before the old one is released, and the
    /// switch happens under the state lock, so callers see either the old or
    /// the new directory. Entries created in the old directory after this
    /// returns are not reported.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::DirectoryNotFound`] if `dir` is not a directory,
    /// or [`WatchError::WatchFailed`] if the OS refuses the new watch. The
    /// old directory stays watched in both cases.
    pub fn set_watch_dir(&self, dir: impl Into<PathBuf>) -> Result<(), WatchError> {
        let dir = dir.into();
        let _enter = self.span.enter();

        let mut state = self.state.lock();
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "rejected watch directory: not a directory");
            return Err(WatchError::DirectoryNotFound(dir));
        }
        if state.dir == dir {
            return Ok(());
        }

        state
            .os_watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| match e.kind {
                notify::ErrorKind::PathNotFound => WatchError::DirectoryNotFound(dir.clone()),
                _ => watch_failed(&dir, e),
            })?;

        let previous = std::mem::replace(&mut state.dir, dir);
        if let Err(e) = state.os_watcher.unwatch(&previous) {
            // Happens when the old directory was deleted; the OS dropped the watch already.
            debug!(dir = %previous.display(), error = %e, "failed to release old watch");
        }

        info!(from = %previous.display(), to = %state.dir.display(), "watch directory changed");
        Ok(())
    }

    /// Handles events until [`shutdown`](Self::shutdown) is called or the
    /// handler reports [`Outcome::FatalStop`].
    ///
    /// Only one thread runs the loop at a time; a second caller waits for the
    /// first to return. Once shut down, the loop returns immediately.
    pub fn run_forever(&self) {
        let rx = self.rx.lock();
        let _enter = self.span.enter();
        info!(dir = %self.watch_dir().display(), "watching for new episodes");

        while !self.is_stopped() {
            let message = match rx.recv() {
                Ok(message) => message,
                Err(_) => break,
            };

            match message {
                Message::Shutdown => break,
                Message::Fs(Err(e)) => warn!(error = %e, "watch error"),
                Message::Fs(Ok(event)) => {
                    for path in arrived_paths(&event) {
                        if self.is_stopped() {
                            break;
                        }
                        if self.handler.organize(path) == Outcome::FatalStop {
                            self.shutdown();
                        }
                    }
                }
            }
        }

        info!("watcher stopped");
    }

    /// Asks [`run_forever`](Self::run_forever) to return. Safe to call more
    /// than once and from any thread.
    pub fn shutdown(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(Message::Shutdown);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Runs [`run_forever`](Self::run_forever) on a dedicated thread.
    pub fn spawn(self: Arc<Self>) -> std::io::Result<WatchHandle> {
        let watcher = Arc::clone(&self);
        let thread = thread::Builder::new()
            .name("watcher".to_string())
            .spawn(move || watcher.run_forever())?;
        Ok(WatchHandle {
            watcher: self,
            thread,
        })
    }
}

/// Paths of entries that appeared in the watched directory.
fn arrived_paths(event: &Event) -> &[PathBuf] {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => &event.paths,
        _ => &[],
    }
}

fn watch_failed(dir: &Path, source: notify::Error) -> WatchError {
    WatchError::WatchFailed {
        path: dir.to_path_buf(),
        source,
    }
}

/// Handle to a watch loop running on its own thread.
pub struct WatchHandle {
    watcher: Arc<Watcher>,
    thread: JoinHandle<()>,
}

impl WatchHandle {
    pub fn watcher(&self) -> &Arc<Watcher> {
        &self.watcher
    }

    pub fn shutdown(&self) {
        self.watcher.shutdown();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits up to `timeout` for the loop to return. Returns `false` if it is
    /// still running.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.thread.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        true
    }

    /// Blocks until the loop returns.
    pub fn join(self) {
        if self.thread.join().is_err() {
            warn!("watcher thread panicked");
        }
    }
}
