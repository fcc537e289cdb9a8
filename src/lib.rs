//! episode-organizer - keeps a TV show library tidy
//!
//! This library watches a download directory, recognises TV episodes by
//! their file names (`Show.Name.S05E09...`), and moves them into a library
//! laid out as `<library>/<Show Name>/Season <NN>/`. The watched and library
//! directories can be changed while the daemon runs through a small TCP
//! configuration service.

pub mod cli;
pub mod config;
pub mod config_client;
pub mod config_server;
pub mod configurator;
pub mod daemon;
pub mod episode;
pub mod filter;
pub mod matcher;
pub mod organizer;
pub mod output;
pub mod rpc;
pub mod storage_manager;
pub mod watcher;

pub use config::{ConfigError, ConfigKey, Configuration};
pub use config_client::{ClientError, ConfigClient};
pub use config_server::{ConfigServer, ServerHandle};
pub use configurator::{ConfigureError, Configurator};
pub use daemon::{Daemon, DaemonError, RunningDaemon};
pub use episode::{Episode, TVShow};
pub use filter::{Filter, FilterError};
pub use matcher::{MatchError, Matcher};
pub use organizer::Organizer;
pub use rpc::{Fault, FaultKind};
pub use storage_manager::{StorageError, StorageManager, StorageResult};
pub use watcher::{Outcome, WatchError, WatchHandle, WatchHandler, Watcher};

pub use cli::{Cli, run_cli};
