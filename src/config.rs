//! Daemon configuration.
//!
//! The configuration is a closed set of keys, each holding a string value.
//! It is stored in TOML format with a single `[DEFAULT]` table:
//!
//! ```toml
//! [DEFAULT]
//! WatchDirectory = "/home/user/Downloads"
//! StorageDirectory = "/home/user/TV Shows"
//! ConfiguratorAddress = "localhost"
//! ConfiguratorPort = "35121"
//! ```
//!
//! Keys missing from the user file fall back to the built-in defaults, so
//! every key always has a value.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Built-in configuration, used for every key the user file leaves out.
pub const DEFAULT_CONFIG: &str = include_str!("default.toml");

/// Errors that can occur while loading, changing or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The key is not a configuration key, or cannot be changed.
    #[error("Key '{0}' is invalid")]
    UnknownKey(String),
    /// The value of a key in the file is not a string or integer.
    #[error("invalid value for '{0}': expected a string")]
    InvalidValue(String),
    /// Invalid TOML syntax or structure.
    #[error("invalid configuration")]
    Parse(#[from] toml::de::Error),
    /// The configuration could not be serialized.
    #[error("failed to serialize configuration")]
    Serialize(#[from] toml::ser::Error),
    /// IO error while reading the configuration file.
    #[error("failed to read configuration file {}", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// IO error while writing the configuration file.
    #[error("failed to write configuration file {}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigKey {
    /// Directory watched for new episodes.
    WatchDirectory,
    /// Root of the episode library.
    StorageDirectory,
    /// Address the configuration service binds to.
    ConfiguratorAddress,
    /// Port the configuration service binds to.
    ConfiguratorPort,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 4] = [
        ConfigKey::WatchDirectory,
        ConfigKey::StorageDirectory,
        ConfigKey::ConfiguratorAddress,
        ConfigKey::ConfiguratorPort,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::WatchDirectory => "WatchDirectory",
            ConfigKey::StorageDirectory => "StorageDirectory",
            ConfigKey::ConfiguratorAddress => "ConfiguratorAddress",
            ConfigKey::ConfiguratorPort => "ConfiguratorPort",
        }
    }

    /// Whether the key can be changed while the daemon runs.
    pub fn is_mutable(&self) -> bool {
        matches!(self, ConfigKey::WatchDirectory | ConfigKey::StorageDirectory)
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(rename = "DEFAULT", default)]
    default: toml::Table,
}

#[derive(Serialize)]
struct ConfigFileRef<'a> {
    #[serde(rename = "DEFAULT")]
    default: BTreeMap<&'static str, &'a str>,
}

/// The current configuration values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    values: BTreeMap<ConfigKey, String>,
}

impl Configuration {
    /// The built-in configuration.
    pub fn defaults() -> Self {
        let mut config = Self {
            values: BTreeMap::new(),
        };
        config
            .merge(DEFAULT_CONFIG)
            .expect("Invalid built-in configuration");
        config
    }

    /// Loads the configuration from `path` on top of the defaults.
    ///
    /// A missing file is not an error: the defaults are returned.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadFailed` if the file exists but cannot be
    /// read, and `ConfigError::Parse`, `ConfigError::UnknownKey` or
    /// `ConfigError::InvalidValue` if its content is not valid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::defaults()),
            Err(e) => {
                return Err(ConfigError::ReadFailed {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        Self::from_toml(&content)
    }

    /// Parses `content` on top of the defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::defaults();
        config.merge(content)?;
        Ok(config)
    }

    fn merge(&mut self, content: &str) -> Result<(), ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;

        for (name, value) in file.default {
            let key = name.parse::<ConfigKey>()?;
            let value = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(i) => i.to_string(),
                _ => return Err(ConfigError::InvalidValue(name)),
            };
            self.values.insert(key, value);
        }
        Ok(())
    }

    /// Returns the value of `key`.
    pub fn get(&self, key: ConfigKey) -> &str {
        self.values.get(&key).map(String::as_str).unwrap_or_default()
    }

    /// Sets `key` in memory only.
    pub fn set(&mut self, key: ConfigKey, value: impl Into<String>) {
        self.values.insert(key, value.into());
    }

    /// Renders the whole configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let file = ConfigFileRef {
            default: self
                .values
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str()))
                .collect(),
        };
        Ok(toml::to_string(&file)?)
    }

    /// Writes the whole configuration to `path`.
    ///
    /// The content goes to a temporary file next to `path` first and is then
    /// renamed over it, so readers never see a partially written file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_toml()?;
        let write_failed = |source| ConfigError::WriteFailed {
            path: path.to_path_buf(),
            source,
        };

        let temp_path = temp_path(path);
        fs::write(&temp_path, content).map_err(write_failed)?;
        if let Err(e) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(write_failed(e));
        }
        Ok(())
    }

    /// Sets `key` and saves the configuration to `path`. If saving fails the
    /// previous value is restored in memory.
    pub fn update(
        &mut self,
        path: &Path,
        key: ConfigKey,
        value: impl Into<String>,
    ) -> Result<(), ConfigError> {
        let previous = self.values.insert(key, value.into());

        if let Err(e) = self.save(path) {
            match previous {
                Some(previous) => self.values.insert(key, previous),
                None => self.values.remove(&key),
            };
            return Err(e);
        }
        Ok(())
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::defaults()
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}

/// Default location of the user configuration file:
/// `~/.config/episode_organizer/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("episode_organizer")
            .join("config.toml"),
    )
}

/// Expands a leading `~` to the home directory.
pub fn expand_home(value: &str) -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    match (value, home) {
        ("~", Some(home)) => home,
        (v, Some(home)) if v.starts_with("~/") => home.join(&v[2..]),
        (v, _) => PathBuf::from(v),
    }
}
