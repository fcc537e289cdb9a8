//! The daemon: builds every component from the configuration and runs the
//! watch loop and the configuration server until told to stop.

use crate::config::{ConfigError, ConfigKey, Configuration, default_config_path, expand_home};
use crate::config_server::{ConfigServer, ServerHandle};
use crate::configurator::Configurator;
use crate::filter::Filter;
use crate::matcher::Matcher;
use crate::organizer::Organizer;
use crate::storage_manager::StorageManager;
use crate::watcher::{WatchError, WatchHandle, Watcher};
use regex::Regex;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{Span, error, info, info_span, warn};

/// How long stopping services may take before the exit is reported unclean.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const STOP_POLL: Duration = Duration::from_millis(100);

static IP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(([0-9]|[1-9][0-9]|1[0-9]{2}|2[0-4][0-9]|25[0-5])\.){3}([0-9]|[1-9][0-9]|1[0-9]{2}|2[0-4][0-9]|25[0-5])$",
    )
    .expect("Invalid IP address pattern")
});

static HOSTNAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(([a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9\-]*[a-zA-Z0-9])\.)*([A-Za-z0-9]|[A-Za-z0-9][A-Za-z0-9\-]*[A-Za-z0-9])$",
    )
    .expect("Invalid hostname pattern")
});

/// Errors that prevent the daemon from starting.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("could not determine the configuration file location: HOME is not set")]
    NoConfigPath,
    #[error("failed to create configuration directory {}", path.display())]
    ConfigDirFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Watch directory does not exist: {}", .0.display())]
    WatchDirectoryNotFound(PathBuf),
    #[error("Storage directory does not exist: {}", .0.display())]
    StorageDirectoryNotFound(PathBuf),
    #[error("The address '{0}' is not a valid ip or hostname")]
    InvalidAddress(String),
    #[error("The port '{0}' is not valid")]
    InvalidPort(String),
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error("failed to bind configuration server to {addr}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to start service thread")]
    Spawn(#[source] io::Error),
    #[error("failed to install signal handler")]
    Signal(#[from] ctrlc::Error),
}

/// Checks that `address` is an IPv4 address or a host name.
pub fn validate_address(address: &str) -> Result<(), DaemonError> {
    if IP_PATTERN.is_match(address) || HOSTNAME_PATTERN.is_match(address) {
        Ok(())
    } else {
        Err(DaemonError::InvalidAddress(address.to_string()))
    }
}

/// Parses a port in `1..=65535`.
pub fn parse_port(port: &str) -> Result<u16, DaemonError> {
    match port.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(DaemonError::InvalidPort(port.to_string())),
    }
}

/// A fully built daemon, ready to run.
pub struct Daemon {
    watcher: Arc<Watcher>,
    configurator: Arc<Configurator>,
    server: ConfigServer,
    span: Span,
}

impl Daemon {
    /// Loads the configuration and builds every component.
    ///
    /// Without `config_file` the default location is used and its directory
    /// is created when missing. A missing file means the built-in defaults.
    ///
    /// # Errors
    ///
    /// Fails if the configuration cannot be read, either directory does not
    /// exist, the server address or port is invalid, or the server cannot
    /// bind.
    pub fn setup(config_file: Option<&Path>) -> Result<Self, DaemonError> {
        let config_file = match config_file {
            Some(path) => path.to_path_buf(),
            None => {
                let path = default_config_path().ok_or(DaemonError::NoConfigPath)?;
                if let Some(dir) = path.parent() {
                    fs::create_dir_all(dir).map_err(|e| DaemonError::ConfigDirFailed {
                        path: dir.to_path_buf(),
                        source: e,
                    })?;
                }
                path
            }
        };

        if !config_file.exists() {
            warn!(
                file = %config_file.display(),
                "config file does not exist yet: using default configurations"
            );
        }
        let config = Configuration::load(&config_file)?;
        Self::from_config(config, config_file)
    }

    /// Builds every component from `config`. Changes made at runtime are
    /// saved to `config_file`.
    pub fn from_config(config: Configuration, config_file: PathBuf) -> Result<Self, DaemonError> {
        let root = info_span!("daemon");

        let watch_dir = expand_home(config.get(ConfigKey::WatchDirectory));
        let storage_dir = expand_home(config.get(ConfigKey::StorageDirectory));
        if !watch_dir.is_dir() {
            return Err(DaemonError::WatchDirectoryNotFound(watch_dir));
        }
        if !storage_dir.is_dir() {
            return Err(DaemonError::StorageDirectoryNotFound(storage_dir));
        }

        let address = config.get(ConfigKey::ConfiguratorAddress).to_string();
        validate_address(&address)?;
        let port = parse_port(config.get(ConfigKey::ConfiguratorPort))?;

        let storage = Arc::new(
            StorageManager::new(storage_dir)
                .with_span(info_span!(parent: &root, "storage_manager")),
        );
        let organizer = Organizer::new(Filter::new(), Matcher::new(), Arc::clone(&storage))
            .with_span(info_span!(parent: &root, "organizer"));
        let watcher = Arc::new(
            Watcher::new(watch_dir, Arc::new(organizer))?
                .with_span(info_span!(parent: &root, "watcher")),
        );
        let configurator = Arc::new(
            Configurator::new(config, config_file, Arc::clone(&watcher), storage)
                .with_span(info_span!(parent: &root, "configurator")),
        );

        let server = ConfigServer::bind((address.as_str(), port), Arc::clone(&configurator))
            .map_err(|e| DaemonError::Bind {
                addr: format!("{}:{}", address, port),
                source: e,
            })?
            .with_span(info_span!(parent: &root, "config_server"));

        Ok(Self {
            watcher,
            configurator,
            server,
            span: root,
        })
    }

    pub fn watcher(&self) -> &Arc<Watcher> {
        &self.watcher
    }

    pub fn configurator(&self) -> &Arc<Configurator> {
        &self.configurator
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.server.local_addr()
    }

    /// Starts both services on their own threads.
    pub fn start(self) -> Result<RunningDaemon, DaemonError> {
        let _enter = self.span.enter();

        info!("starting organizer service");
        let watch = Arc::clone(&self.watcher)
            .spawn()
            .map_err(DaemonError::Spawn)?;

        info!("starting configurator service");
        let server = match self.server.start() {
            Ok(server) => server,
            Err(e) => {
                watch.shutdown();
                return Err(DaemonError::Spawn(e));
            }
        };

        Ok(RunningDaemon {
            watch,
            server,
            span: self.span.clone(),
        })
    }

    /// Runs until SIGINT/SIGTERM or until the library disappears.
    ///
    /// Returns `Ok(false)` when the services did not stop within
    /// [`SHUTDOWN_TIMEOUT`].
    pub fn run(self) -> Result<bool, DaemonError> {
        let running = self.start()?;

        let watcher = Arc::clone(running.watcher());
        if let Err(e) = ctrlc::set_handler(move || watcher.shutdown()) {
            running.shutdown();
            running.wait();
            return Err(e.into());
        }

        info!(parent: &running.span, "running");
        Ok(running.wait())
    }
}

/// The services of a started [`Daemon`].
pub struct RunningDaemon {
    watch: WatchHandle,
    server: ServerHandle,
    span: Span,
}

impl RunningDaemon {
    pub fn watcher(&self) -> &Arc<Watcher> {
        self.watch.watcher()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Asks the watch loop to stop; [`wait`](Self::wait) then stops the rest.
    pub fn shutdown(&self) {
        self.watch.shutdown();
    }

    /// Blocks until the watch loop stops, then stops the configuration
    /// server. Returns `false` if either service is still running after
    /// [`SHUTDOWN_TIMEOUT`].
    pub fn wait(self) -> bool {
        let _enter = self.span.enter();

        while !self.watch.watcher().is_stopped() && !self.watch.is_finished() {
            thread::sleep(STOP_POLL);
        }

        info!("stopping services");
        self.server.stop();

        let watch_stopped = self.watch.wait(SHUTDOWN_TIMEOUT);
        let server_stopped = self.server.wait(SHUTDOWN_TIMEOUT);
        if !(watch_stopped && server_stopped) {
            error!(
                watcher = watch_stopped,
                server = server_stopped,
                "services did not stop in time"
            );
            return false;
        }

        info!("all services were stopped");
        true
    }
}
