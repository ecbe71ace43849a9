//! User configuration stored as `config.toml`.
//!
//! Missing keys take their defaults; selected values can be overridden by
//! `ZI_*` environment variables.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default feed freshness: one week.
pub const DEFAULT_FRESHNESS_SECS: u64 = 7 * 24 * 60 * 60;

/// Default mirror used when a feed's own server is unreachable.
pub const DEFAULT_FEED_MIRROR: &str = "http://roscidus.com/0mirror";

/// Default sync server.
pub const DEFAULT_SYNC_SERVER: &str = "https://0install.de/sync/";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

/// How much network access is permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkLevel {
    /// No network access at all.
    Offline,
    /// Only download what is missing; prefer cached implementations.
    Minimal,
    /// Download and refresh freely.
    #[default]
    Full,
}

impl NetworkLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Minimal => "minimal",
            Self::Full => "full",
        }
    }
}

impl FromStr for NetworkLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "offline" => Ok(Self::Offline),
            "minimal" => Ok(Self::Minimal),
            "full" => Ok(Self::Full),
            _ => Err(ConfigError::InvalidValue {
                key: "network_use".into(),
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for NetworkLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sync server credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL, ending in `/`.
    pub server: String,
    /// HTTP Basic user name.
    pub username: String,
    /// HTTP Basic password.
    pub password: String,
    /// Key the uploaded application list is encrypted with.
    pub crypto_key: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SYNC_SERVER.to_string(),
            username: String::new(),
            password: String::new(),
            crypto_key: String::new(),
        }
    }
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("server", &self.server)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl SyncConfig {
    /// Whether enough is configured to talk to the server.
    pub fn is_configured(&self) -> bool {
        !self.server.is_empty() && !self.username.is_empty() && !self.password.is_empty()
    }
}

/// Persistent user settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds after which a cached feed counts as stale.
    pub freshness: u64,
    /// Permitted network use.
    pub network_use: NetworkLevel,
    /// Prefer testing versions over stable ones.
    pub help_with_testing: bool,
    /// Mirror for feeds whose server is down; empty disables it.
    pub feed_mirror: String,
    /// Sync settings.
    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            freshness: DEFAULT_FRESHNESS_SECS,
            network_use: NetworkLevel::Full,
            help_with_testing: false,
            feed_mirror: DEFAULT_FEED_MIRROR.to_string(),
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path`; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply `ZI_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if `ZI_NETWORK_USE` holds an unknown level.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(level) = get("ZI_NETWORK_USE") {
            self.network_use = level.parse()?;
        }
        if let Some(server) = get("ZI_SYNC_SERVER") {
            self.sync.server = server;
        }
        if let Some(username) = get("ZI_SYNC_USERNAME") {
            self.sync.username = username;
        }
        if let Some(password) = get("ZI_SYNC_PASSWORD") {
            self.sync.password = password;
        }
        if let Some(key) = get("ZI_SYNC_CRYPTO_KEY") {
            self.sync.crypto_key = key;
        }
        Ok(())
    }

    /// Save atomically to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        crate::paths::atomic_write(path, content.as_bytes())?;
        Ok(())
    }

    /// Freshness as a duration.
    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness)
    }
}
