//! # celfs-config
//!
//! Configuration management for celfs clients.
//!
//! Loads configuration from:
//! 1. `~/.celfs/config.toml` (global)
//! 2. `.celfs/config.toml` (project-local, overrides global key by key)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard};
use std::time::Duration;
use tracing::debug;

use crate::logging::LogLevel;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML render error: {0}")]
    Render(#[from] toml::ser::Error),
}

/// 8 MiB: default block size, largest single transfer and read-ahead window.
pub const DEFAULT_BUFFER_LENGTH: u64 = 8 * 1024 * 1024;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub client: ClientConfig,
    pub file: FileConfig,
    pub directory: DirectoryConfig,
    pub backoff: BackoffConfig,
    pub pool: PoolConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        Self::load_from(global.as_deref(), Some(Path::new(".celfs/config.toml")))
    }

    /// Load from explicit global and project paths. Missing files are skipped.
    pub fn load_from(global: Option<&Path>, project: Option<&Path>) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();

        // 1. Global config
        if let Some(global_path) = global.filter(|p| p.exists()) {
            debug!("Loading global config from {:?}", global_path);
            merged = std::fs::read_to_string(global_path)?.parse::<toml::Table>()?;
        }

        // 2. Project config, merged key by key over the global one
        if let Some(project_path) = project.filter(|p| p.exists()) {
            debug!("Loading project config from {:?}", project_path);
            let project_table = std::fs::read_to_string(project_path)?.parse::<toml::Table>()?;
            merge_tables(&mut merged, project_table);
        }

        let mut config: Config = toml::Value::Table(merged).try_into()?;

        // 3. Environment variable overrides
        config.apply_env_overrides();

        Ok(config)
    }

    /// Global config path: ~/.celfs/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".celfs/config.toml"))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(enabled) = var("CELFS_CACHE_ENABLED").and_then(|v| parse_flag(&v)) {
            self.file.cache_enabled = enabled;
        }
        if let Some(n) = var("CELFS_RETRY_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.client.current_predicate_attempts = n;
        }
        if let Some(n) = var("CELFS_BLOCK_SIZE").and_then(|v| v.parse().ok()) {
            self.file.block_size = n;
        }
        if let Some(n) = var("CELFS_POOL_CAPACITY").and_then(|v| v.parse().ok()) {
            self.pool.capacity = n;
        }
        if let Some(level) = var("CELFS_LOG") {
            self.logging.level = level;
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Config::default())?)
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(nested) => {
                if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                    merge_tables(existing, nested);
                } else {
                    base.insert(key, toml::Value::Table(nested));
                }
            }
            value => {
                base.insert(key, value);
            }
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Optimistic retry bounds and transfer sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Attempts when the caller predicates on a specific version
    pub explicit_predicate_attempts: u32,
    /// Attempts when predicating on whatever version is current
    pub current_predicate_attempts: u32,
    /// Largest single transfer; also the read-ahead window
    pub max_buffer_length: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            explicit_predicate_attempts: 1,
            current_predicate_attempts: 5,
            max_buffer_length: DEFAULT_BUFFER_LENGTH,
        }
    }
}

/// Defaults applied to newly created files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub content_type: String,
    pub block_size: u64,
    pub replication: String,
    /// Seconds a purged file's tombstone is retained
    pub deletion_time_to_live: u64,
    pub time_to_live: u64,
    pub sign_modifications: bool,
    /// Whether new handles feed the byte-range cache
    pub cache_enabled: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            content_type: "application/octet-stream".to_string(),
            block_size: DEFAULT_BUFFER_LENGTH,
            replication:
                "AObject.Replication.Store=3;VObject.Replication.Store=3;BObject.Replication.Store=3"
                    .to_string(),
            deletion_time_to_live: 1000 * 24 * 60 * 60,
            time_to_live: i64::MAX as u64,
            sign_modifications: true,
            cache_enabled: false,
        }
    }
}

/// Directory update policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Attempts for a link that must not overwrite an existing name
    pub exclusive_link_attempts: u32,
    /// Read-modify-write attempts for every other directory update
    pub update_attempts: u32,
    /// Encoded directories larger than this are rejected (write) or
    /// treated as corrupted (read)
    pub max_encoded_bytes: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            exclusive_link_attempts: 1,
            update_attempts: 5,
            max_encoded_bytes: i32::MAX as u64,
        }
    }
}

/// Exponential backoff between directory retries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub cap_ms: u64,
}

impl BackoffConfig {
    pub fn initial(&self) -> Duration {
        Duration::from_millis(self.initial_ms)
    }

    pub fn cap(&self) -> Duration {
        Duration::from_millis(self.cap_ms)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 2,
            cap_ms: 100,
        }
    }
}

/// Storage connection pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum connections checked out at once
    pub capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { capacity: 8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl LoggingConfig {
    /// Configured level, falling back to `info` for unknown names.
    pub fn log_level(&self) -> LogLevel {
        self.level.parse().unwrap_or(LogLevel::Info)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
