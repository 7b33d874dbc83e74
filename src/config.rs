//! Configuration module for the directory monitor server.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `FSM_` and use double underscores
//! to separate nested levels:
//! - `FSM_SERVER__MAX_CONCURRENT_READS=8` sets `server.max_concurrent_reads`
//! - `FSM_MONITOR__SETTLE_MS=250` sets `monitor.settle_ms`
//! - `FSM_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = ".fsmonitor";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "FSM_";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Log levels
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Suppression policy applied to every monitor
    #[serde(default)]
    pub filter: FilterConfig,

    /// Defaults for monitor timing
    #[serde(default)]
    pub monitor: MonitorDefaults,

    /// File access settings of the coordinating server
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level for all modules
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides, e.g. `monitor = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FilterConfig {
    /// Path fragments produced by file managers for in-progress copies
    #[serde(default = "default_transient_names")]
    pub transient_names: Vec<String>,

    /// Base-name prefix marking hidden/system files
    #[serde(default = "default_hidden_prefix")]
    pub hidden_prefix: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MonitorDefaults {
    /// Quiet time before a changed directory is diffed (milliseconds)
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Poll interval for polling monitors (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Capacity of the native event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Block size used when hashing file contents (bytes)
    #[serde(default = "default_hash_block_size")]
    pub hash_block_size: usize,

    /// Upper bound on concurrent block reads and hash computations
    #[serde(default = "default_max_concurrent_reads")]
    pub max_concurrent_reads: usize,
}

// Default value functions
fn default_version() -> u32 { 1 }
fn default_log_level() -> String { "warn".to_string() }
fn default_transient_names() -> Vec<String> { vec!["untitled folder".to_string()] }
fn default_hidden_prefix() -> String { ".".to_string() }
fn default_settle_ms() -> u64 { 500 }
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_event_channel_capacity() -> usize { 100 }
fn default_hash_block_size() -> usize { 1024 }
fn default_max_concurrent_reads() -> usize { 16 }

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            logging: LoggingConfig::default(),
            filter: FilterConfig::default(),
            monitor: MonitorDefaults::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            transient_names: default_transient_names(),
            hidden_prefix: default_hidden_prefix(),
        }
    }
}

impl Default for MonitorDefaults {
    fn default() -> Self {
        Self {
            settle_ms: default_settle_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hash_block_size: default_hash_block_size(),
            max_concurrent_reads: default_max_concurrent_reads(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

        Self::figment(config_path).extract().map_err(Box::new)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref().to_path_buf())
            .extract()
            .map_err(Box::new)
    }

    fn figment(config_path: PathBuf) -> Figment {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(config_path))
            // Double underscore separates nested levels, single underscore
            // stays part of the field name
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find the settings file by looking for a .fsmonitor directory
    /// from the current directory up to the root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join(CONFIG_FILE));
            }
        }

        None
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file in the current directory
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}
