//! Live reconfiguration of the running daemon.
//!
//! The [`Configurator`] owns the [`Configuration`] and ties each mutable key
//! to the component that uses it. A successful [`set_config`] changes the
//! live component, the in-memory configuration and the configuration file
//! together. A failed one changes none of them.
//!
//! [`set_config`]: Configurator::set_config

use crate::config::{ConfigError, ConfigKey, Configuration};
use crate::rpc::FaultKind;
use crate::storage_manager::{StorageError, StorageManager};
use crate::watcher::{WatchError, Watcher};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{Span, error, info, info_span, warn};

/// Errors returned by [`Configurator`] operations.
#[derive(Debug, Error)]
pub enum ConfigureError {
    /// The key does not exist, or cannot be changed at runtime.
    #[error("Key '{0}' is invalid")]
    UnknownKey(String),
    /// The proposed directory does not exist.
    #[error("directory does not exist: {}", .0.display())]
    DirectoryNotFound(PathBuf),
    /// The watcher refused the new directory.
    #[error(transparent)]
    Watch(WatchError),
    /// The storage manager refused the new directory.
    #[error(transparent)]
    Storage(StorageError),
    /// The new value could not be written to the configuration file.
    #[error("failed to save configuration")]
    Persist(#[source] ConfigError),
}

impl ConfigureError {
    /// The fault this error is reported as over RPC.
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            ConfigureError::UnknownKey(_) => FaultKind::UnknownKey,
            ConfigureError::DirectoryNotFound(_) => FaultKind::DirectoryNotFound,
            ConfigureError::Watch(_) | ConfigureError::Storage(_) => FaultKind::OsError,
            ConfigureError::Persist(ConfigError::WriteFailed { .. })
            | ConfigureError::Persist(ConfigError::ReadFailed { .. }) => FaultKind::OsError,
            ConfigureError::Persist(_) => FaultKind::Internal,
        }
    }
}

impl From<WatchError> for ConfigureError {
    fn from(e: WatchError) -> Self {
        match e {
            WatchError::DirectoryNotFound(dir) => ConfigureError::DirectoryNotFound(dir),
            other => ConfigureError::Watch(other),
        }
    }
}

impl From<StorageError> for ConfigureError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::DirectoryNotFound(dir) => ConfigureError::DirectoryNotFound(dir),
            other => ConfigureError::Storage(other),
        }
    }
}

/// Reads and changes the configuration of a running daemon.
pub struct Configurator {
    config: Mutex<Configuration>,
    config_file: PathBuf,
    watcher: Arc<Watcher>,
    storage: Arc<StorageManager>,
    span: Span,
}

impl Configurator {
    /// Creates a configurator persisting changes to `config_file`.
    ///
    /// `watcher` and `storage` must already use the directories named in
    /// `config`.
    pub fn new(
        config: Configuration,
        config_file: impl Into<PathBuf>,
        watcher: Arc<Watcher>,
        storage: Arc<StorageManager>,
    ) -> Self {
        Self {
            config: Mutex::new(config),
            config_file: config_file.into(),
            watcher,
            storage,
            span: info_span!("configurator"),
        }
    }

    /// Replaces the span events are recorded in.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Returns the value of the configuration key named `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigureError::UnknownKey`] if `key` is not a configuration
    /// key.
    pub fn get_config(&self, key: &str) -> Result<String, ConfigureError> {
        let key = parse_key(key)?;
        Ok(self.config.lock().get(key).to_string())
    }

    /// Changes the directory named by `key` to `value`.
    ///
    /// The owning component is switched first. Only when it accepted the
    /// directory is the configuration file rewritten; if that fails the
    /// component is switched back before the error is returned. When the
    /// previous directory is gone as well, the component and the values
    /// returned by [`get_config`](Self::get_config) stay on `value` while the
    /// file keeps the old one.
    ///
    /// # Errors
    ///
    /// - [`ConfigureError::UnknownKey`] if `key` is not `WatchDirectory` or
    ///   `StorageDirectory`.
    /// - [`ConfigureError::DirectoryNotFound`] if `value` is not an existing
    ///   directory.
    /// - [`ConfigureError::Persist`] if the configuration file could not be
    ///   written.
    pub fn set_config(&self, key: &str, value: &str) -> Result<(), ConfigureError> {
        let _enter = self.span.enter();

        let key = parse_key(key)?;
        if !key.is_mutable() {
            warn!(key = %key, "rejected change of read-only key");
            return Err(ConfigureError::UnknownKey(key.to_string()));
        }

        // Held for the whole change so concurrent calls apply one at a time.
        let mut config = self.config.lock();

        let previous = self.live_dir(key);
        self.apply(key, Path::new(value))?;

        if let Err(e) = config.update(&self.config_file, key, value) {
            error!(
                key = %key,
                file = %self.config_file.display(),
                error = %e,
                "failed to save configuration, restoring previous directory"
            );
            if let Err(rollback) = self.apply(key, &previous) {
                // The component keeps the new directory, so report that one.
                config.set(key, value);
                error!(
                    key = %key,
                    value = %value,
                    file = %self.config_file.display(),
                    error = %rollback,
                    "failed to restore previous directory, configuration file is stale"
                );
            }
            return Err(ConfigureError::Persist(e));
        }

        info!(key = %key, value = %value, "configuration changed");
        Ok(())
    }

    fn live_dir(&self, key: ConfigKey) -> PathBuf {
        match key {
            ConfigKey::WatchDirectory => self.watcher.watch_dir(),
            _ => self.storage.library_dir(),
        }
    }

    fn apply(&self, key: ConfigKey, dir: &Path) -> Result<(), ConfigureError> {
        match key {
            ConfigKey::WatchDirectory => self.watcher.set_watch_dir(dir)?,
            ConfigKey::StorageDirectory => self.storage.set_library_dir(dir)?,
            _ => return Err(ConfigureError::UnknownKey(key.to_string())),
        }
        Ok(())
    }
}

fn parse_key(key: &str) -> Result<ConfigKey, ConfigureError> {
    key.parse()
        .map_err(|_| ConfigureError::UnknownKey(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::{Outcome, WatchHandler};
    use std::fs;
    use tempfile::TempDir;

    struct Idle;

    impl WatchHandler for Idle {
        fn organize(&self, _path: &Path) -> Outcome {
            Outcome::Skipped
        }
    }

    struct Setup {
        temp_dir: TempDir,
        watch: PathBuf,
        library: PathBuf,
        config_file: PathBuf,
    }

    impl Setup {
        fn new() -> Self {
            let temp_dir = TempDir::new().expect("Failed to create temp directory");
            let watch = temp_dir.path().join("watch");
            let library = temp_dir.path().join("library");
            fs::create_dir(&watch).unwrap();
            fs::create_dir(&library).unwrap();
            let config_file = temp_dir.path().join("config.toml");
            Self {
                temp_dir,
                watch,
                library,
                config_file,
            }
        }

        fn dir(&self, name: &str) -> PathBuf {
            let dir = self.temp_dir.path().join(name);
            fs::create_dir(&dir).unwrap();
            dir
        }

        fn configurator(&self, config_file: &Path) -> Configurator {
            let mut config = Configuration::defaults();
            config.set(ConfigKey::WatchDirectory, self.watch.to_string_lossy());
            config.set(ConfigKey::StorageDirectory, self.library.to_string_lossy());

            let watcher = Arc::new(Watcher::new(&self.watch, Arc::new(Idle)).unwrap());
            let storage = Arc::new(StorageManager::new(&self.library));
            Configurator::new(config, config_file, watcher, storage)
        }
    }

    #[test]
    fn test_get_config_returns_values() {
        let setup = Setup::new();
        let configurator = setup.configurator(&setup.config_file);

        assert_eq!(
            configurator.get_config("WatchDirectory").unwrap(),
            setup.watch.to_string_lossy()
        );
        assert_eq!(configurator.get_config("ConfiguratorPort").unwrap(), "35121");
    }

    #[test]
    fn test_get_config_unknown_key() {
        let setup = Setup::new();
        let configurator = setup.configurator(&setup.config_file);

        let result = configurator.get_config("Nonsense");
        assert!(matches!(result, Err(ConfigureError::UnknownKey(key)) if key == "Nonsense"));
    }

    #[test]
    fn test_set_watch_directory() {
        let setup = Setup::new();
        let configurator = setup.configurator(&setup.config_file);
        let new_watch = setup.dir("new_watch");

        configurator
            .set_config("WatchDirectory", &new_watch.to_string_lossy())
            .unwrap();

        assert_eq!(configurator.watcher.watch_dir(), new_watch);
        assert_eq!(
            configurator.get_config("WatchDirectory").unwrap(),
            new_watch.to_string_lossy()
        );
        let saved = Configuration::load(&setup.config_file).unwrap();
        assert_eq!(
            saved.get(ConfigKey::WatchDirectory),
            new_watch.to_string_lossy()
        );
    }

    #[test]
    fn test_set_storage_directory() {
        let setup = Setup::new();
        let configurator = setup.configurator(&setup.config_file);
        let new_library = setup.dir("new_library");

        configurator
            .set_config("StorageDirectory", &new_library.to_string_lossy())
            .unwrap();

        assert_eq!(configurator.storage.library_dir(), new_library);
        assert!(setup.config_file.is_file());
    }

    #[test]
    fn test_set_read_only_key_is_rejected() {
        let setup = Setup::new();
        let configurator = setup.configurator(&setup.config_file);

        let result = configurator.set_config("ConfiguratorPort", "8080");

        assert!(matches!(result, Err(ConfigureError::UnknownKey(_))));
        assert_eq!(configurator.get_config("ConfiguratorPort").unwrap(), "35121");
        assert!(!setup.config_file.exists());
    }

    #[test]
    fn test_set_missing_directory_changes_nothing() {
        let setup = Setup::new();
        let configurator = setup.configurator(&setup.config_file);
        let missing = setup.temp_dir.path().join("missing");

        let result = configurator.set_config("WatchDirectory", &missing.to_string_lossy());

        assert!(matches!(result, Err(ConfigureError::DirectoryNotFound(dir)) if dir == missing));
        let storage_err = configurator
            .set_config("StorageDirectory", &missing.to_string_lossy())
            .unwrap_err();
        assert_eq!(storage_err.fault_kind(), FaultKind::DirectoryNotFound);
        assert_eq!(configurator.watcher.watch_dir(), setup.watch);
        assert_eq!(configurator.storage.library_dir(), setup.library);
        assert_eq!(
            configurator.get_config("WatchDirectory").unwrap(),
            setup.watch.to_string_lossy()
        );
        assert!(!setup.config_file.exists());
    }

    #[test]
    fn test_failed_save_restores_watch_directory() {
        let setup = Setup::new();
        let unwritable = setup.temp_dir.path().join("no_such_dir").join("config.toml");
        let configurator = setup.configurator(&unwritable);
        let new_watch = setup.dir("new_watch");

        let result = configurator.set_config("WatchDirectory", &new_watch.to_string_lossy());

        let err = result.unwrap_err();
        assert!(matches!(err, ConfigureError::Persist(_)));
        assert_eq!(err.fault_kind(), FaultKind::OsError);
        assert_eq!(configurator.watcher.watch_dir(), setup.watch);
        assert_eq!(
            configurator.get_config("WatchDirectory").unwrap(),
            setup.watch.to_string_lossy()
        );
        assert!(!unwritable.exists());
    }

    #[test]
    fn test_failed_save_restores_storage_directory() {
        let setup = Setup::new();
        let unwritable = setup.temp_dir.path().join("no_such_dir").join("config.toml");
        let configurator = setup.configurator(&unwritable);
        let new_library = setup.dir("new_library");

        let result = configurator.set_config("StorageDirectory", &new_library.to_string_lossy());

        assert!(matches!(result, Err(ConfigureError::Persist(_))));
        assert_eq!(configurator.storage.library_dir(), setup.library);
        assert_eq!(
            configurator.get_config("StorageDirectory").unwrap(),
            setup.library.to_string_lossy()
        );
    }

    #[test]
    fn test_failed_save_and_restore_keeps_new_watch_directory() {
        let setup = Setup::new();
        let unwritable = setup.temp_dir.path().join("no_such_dir").join("config.toml");
        let configurator = setup.configurator(&unwritable);
        let new_watch = setup.dir("new_watch");
        fs::remove_dir(&setup.watch).unwrap();

        let result = configurator.set_config("WatchDirectory", &new_watch.to_string_lossy());

        assert!(matches!(result, Err(ConfigureError::Persist(_))));
        assert_eq!(configurator.watcher.watch_dir(), new_watch);
        assert_eq!(
            configurator.get_config("WatchDirectory").unwrap(),
            new_watch.to_string_lossy()
        );
        assert!(!unwritable.exists());
    }

    #[test]
    fn test_failed_save_and_restore_keeps_new_storage_directory() {
        let setup = Setup::new();
        let unwritable = setup.temp_dir.path().join("no_such_dir").join("config.toml");
        let configurator = setup.configurator(&unwritable);
        let new_library = setup.dir("new_library");
        fs::remove_dir(&setup.library).unwrap();

        let result = configurator.set_config("StorageDirectory", &new_library.to_string_lossy());

        assert!(matches!(result, Err(ConfigureError::Persist(_))));
        assert_eq!(configurator.storage.library_dir(), new_library);
        assert_eq!(
            configurator.get_config("StorageDirectory").unwrap(),
            new_library.to_string_lossy()
        );
    }
}
