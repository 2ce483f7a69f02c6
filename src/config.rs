//! Configuration management for Flowdesk
//!
//! This module handles loading, parsing, and validation of configuration files.

use crate::constants::{
    APP_DIR_NAME, CONFIG_GENERATED, DEFAULT_DATABASE_URL_ENV, DEFAULT_FAILURE_THRESHOLD, DEFAULT_OWNER_ID_ENV,
    DEFAULT_PROBE_CACHE_TTL_MS, DEFAULT_REMOTE_CONNECT_TIMEOUT_MS, DEFAULT_REMOTE_RETRY_ATTEMPTS,
    DEFAULT_RETRY_DELAY_MS, DEFAULT_SYNC_INTERVAL_MS, LOCAL_CONFIG_FILE, MAX_REMOTE_RETRY_ATTEMPTS,
    MIN_REMOTE_CONNECT_TIMEOUT_MS, MIN_SYNC_INTERVAL_MS,
};
use crate::sync::StorageMode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub remote: RemoteConfig,
    pub local: LocalConfig,
    pub logging: LoggingConfig,
}

/// Storage mode preference. `Auto` lets the mode manager decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModePreference {
    #[default]
    Auto,
    Remote,
    Local,
    Hybrid,
}

impl ModePreference {
    /// The forced mode, if any.
    pub fn forced(&self) -> Option<StorageMode> {
        match self {
            ModePreference::Auto => None,
            ModePreference::Remote => Some(StorageMode::Remote),
            ModePreference::Local => Some(StorageMode::Local),
            ModePreference::Hybrid => Some(StorageMode::Hybrid),
        }
    }
}

/// Storage reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Force a storage mode, bypassing auto-detection
    pub storage_mode: ModePreference,
    /// Re-run failed remote operations against the local cache
    pub enable_fallback: bool,
    /// Automatic Local -> Remote attempts before giving up (0-10)
    pub remote_retry_attempts: u32,
    /// Timeout for every remote call and probe, in milliseconds (>= 1000)
    pub remote_connect_timeout_ms: u64,
    /// Background reconnect interval in milliseconds (>= 5000)
    pub sync_interval_ms: u64,
    /// Migrate local data automatically once the remote store comes back
    pub offline_sync_enabled: bool,
    /// Consecutive remote failures that switch the manager to Local mode
    pub failure_threshold: u32,
    /// How long a probe result is trusted, in milliseconds
    pub probe_cache_ttl_ms: u64,
    /// First delay between automatic reconnect attempts, in milliseconds
    pub retry_delay_ms: u64,
    /// Remove migrated local records once every record of their entity type migrated
    pub clear_local_after_migration: bool,
}

/// Remote store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Environment variable holding the database URL
    pub database_url_env: String,
    /// Environment variable holding the owner identity
    pub owner_id_env: String,
}

/// Local cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LocalConfig {
    /// Cache directory (defaults to the platform data directory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// Maximum bytes the cache may use (unlimited when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota_bytes: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Enable logging to file
    pub enabled: bool,
    /// Log level: error, warn, info, debug or trace
    pub level: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_mode: ModePreference::Auto,
            enable_fallback: true,
            remote_retry_attempts: DEFAULT_REMOTE_RETRY_ATTEMPTS,
            remote_connect_timeout_ms: DEFAULT_REMOTE_CONNECT_TIMEOUT_MS,
            sync_interval_ms: DEFAULT_SYNC_INTERVAL_MS,
            offline_sync_enabled: true,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            probe_cache_ttl_ms: DEFAULT_PROBE_CACHE_TTL_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            clear_local_after_migration: false,
        }
    }
}

impl StorageConfig {
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_connect_timeout_ms)
    }

    pub fn probe_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.probe_cache_ttl_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            database_url_env: DEFAULT_DATABASE_URL_ENV.to_string(),
            owner_id_env: DEFAULT_OWNER_ID_ENV.to_string(),
        }
    }
}

impl RemoteConfig {
    /// Database URL from the configured environment variable, if set and non-empty.
    pub fn database_url(&self) -> Option<String> {
        std::env::var(&self.database_url_env).ok().filter(|url| !url.trim().is_empty())
    }

    /// Owner identity from the configured environment variable, if set and non-empty.
    pub fn owner_id(&self) -> Option<String> {
        std::env::var(&self.owner_id_env).ok().filter(|id| !id.trim().is_empty())
    }
}

impl LocalConfig {
    /// Resolve the cache directory.
    pub fn resolve_cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))
            .map(|dir| dir.join(APP_DIR_NAME).join("cache"))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file or return defaults
    pub fn load() -> Result<Self> {
        let config_path = Self::find_config_file()?;

        if let Some(path) = config_path {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in order of precedence
    fn find_config_file() -> Result<Option<PathBuf>> {
        // 1. Check current directory
        let current_dir_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if current_dir_config.exists() {
            return Ok(Some(current_dir_config));
        }

        // 2. Check XDG config directory
        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join(APP_DIR_NAME).join("config.toml");
            if xdg_config.exists() {
                return Ok(Some(xdg_config));
            }
        }

        Ok(None)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let storage = &self.storage;

        if storage.remote_retry_attempts > MAX_REMOTE_RETRY_ATTEMPTS {
            anyhow::bail!(
                "remote_retry_attempts must be between 0 and {}, got {}",
                MAX_REMOTE_RETRY_ATTEMPTS,
                storage.remote_retry_attempts
            );
        }

        if storage.remote_connect_timeout_ms < MIN_REMOTE_CONNECT_TIMEOUT_MS {
            anyhow::bail!(
                "remote_connect_timeout_ms must be at least {}, got {}",
                MIN_REMOTE_CONNECT_TIMEOUT_MS,
                storage.remote_connect_timeout_ms
            );
        }

        if storage.sync_interval_ms < MIN_SYNC_INTERVAL_MS {
            anyhow::bail!(
                "sync_interval_ms must be at least {}, got {}",
                MIN_SYNC_INTERVAL_MS,
                storage.sync_interval_ms
            );
        }

        if storage.failure_threshold == 0 {
            anyhow::bail!("failure_threshold must be at least 1");
        }

        if self.remote.database_url_env.is_empty() {
            anyhow::bail!("remote.database_url_env cannot be empty");
        }
        if self.remote.owner_id_env.is_empty() {
            anyhow::bail!("remote.owner_id_env cannot be empty");
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Invalid logging level '{}', expected one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Generate default configuration file
    pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Self::default();
        let toml_content = toml::to_string_pretty(&config).context("Failed to serialize default config")?;

        // Add header comment
        let header = format!(
            "# Flowdesk Configuration File\n# Generated on {}\n\n",
            chrono::Local::now().format("%Y-%m-%d")
        );

        let full_content = header + &toml_content;

        // Ensure the parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        std::fs::write(&path, full_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        println!("{}: {}", CONFIG_GENERATED, path.as_ref().display());
        Ok(())
    }

    /// Get the XDG config directory path
    pub fn get_xdg_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
            .map(|dir| dir.join(APP_DIR_NAME))
    }

    /// Get the default config file path
    pub fn get_default_config_path() -> Result<PathBuf> {
        Ok(Self::get_xdg_config_dir()?.join("config.toml"))
    }
}
