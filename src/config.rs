//! Configuration management for hivemoji
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (hivemoji.toml)
//! - Environment variables (HIVEMOJI__*)
//!
//! ## Example config file (hivemoji.toml):
//! ```toml
//! [cache]
//! memory_ttl_secs = 300
//! persistent_ttl_secs = 86400
//! fetch_timeout_secs = 20
//! store_path = "./.hivemoji/snapshots"
//!
//! [limits]
//! max_json_bytes = 8192
//! max_inline_bytes = 6000
//!
//! [transport]
//! log_dir = "./history"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheSettings;
use crate::protocol::Limits;

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HivemojiConfig {
    /// Cache tiers
    #[serde(default)]
    pub cache: CacheConfig,

    /// Record and asset bounds
    #[serde(default)]
    pub limits: Limits,

    /// Where operation logs come from
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_memory_ttl")]
    pub memory_ttl_secs: u64,

    #[serde(default = "default_persistent_ttl")]
    pub persistent_ttl_secs: u64,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Directory for persisted snapshots
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
}

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Directory of `<owner>.json` account-history dumps
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

// Default value functions
fn default_memory_ttl() -> u64 {
    5 * 60
}

fn default_persistent_ttl() -> u64 {
    24 * 60 * 60
}

fn default_fetch_timeout() -> u64 {
    20
}

fn default_store_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "hivemoji", "hivemoji")
        .map(|dirs| dirs.cache_dir().join("snapshots"))
        .unwrap_or_else(|| PathBuf::from(".hivemoji/snapshots"))
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("history")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_ttl_secs: default_memory_ttl(),
            persistent_ttl_secs: default_persistent_ttl(),
            fetch_timeout_secs: default_fetch_timeout(),
            store_path: default_store_path(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
        }
    }
}

impl HivemojiConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, layering a specific file over the defaults
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["hivemoji.toml", ".hivemoji.toml", "config/hivemoji.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "hivemoji", "hivemoji") {
            let xdg_config = config_dir.config_dir().join("hivemoji.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // HIVEMOJI__CACHE__MEMORY_TTL_SECS=60 and friends
        builder = builder.add_source(
            Environment::with_prefix("HIVEMOJI")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Cache settings derived from this configuration
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            memory_ttl: Duration::from_secs(self.cache.memory_ttl_secs),
            persistent_ttl: Duration::from_secs(self.cache.persistent_ttl_secs),
            fetch_timeout: Duration::from_secs(self.cache.fetch_timeout_secs),
            limits: self.limits,
        }
    }
}
