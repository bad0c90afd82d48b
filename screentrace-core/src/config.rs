//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/screentrace/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/screentrace/` (~/.config/screentrace/)
//! - Data: `$XDG_DATA_HOME/screentrace/` (~/.local/share/screentrace/)
//! - State/Logs: `$XDG_STATE_HOME/screentrace/` (~/.local/state/screentrace/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Device-side collection settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Batch upload settings
    #[serde(default)]
    pub upload: UploadConfig,

    /// Ingest gateway settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Stream processor settings
    #[serde(default)]
    pub processor: ProcessorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device-side collection configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// Seconds between collection cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Merge same-app sessions separated by a gap of at most this many ms
    #[serde(default = "default_gap_merge_ms")]
    pub gap_merge_ms: i64,

    /// Drop clamped sessions shorter than this (measurement jitter)
    #[serde(default = "default_min_duration_ms")]
    pub min_duration_ms: i64,

    /// Cap on how far back a cycle scans after a long offline gap
    #[serde(default = "default_lookback_cap_secs")]
    pub lookback_cap_secs: i64,

    /// App keys excluded from tracking (launchers, system UI, input methods)
    #[serde(default = "default_noise_packages")]
    pub noise_packages: Vec<String>,

    /// Path to the local single-writer activity log the collector reads
    pub activity_log: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            gap_merge_ms: default_gap_merge_ms(),
            min_duration_ms: default_min_duration_ms(),
            lookback_cap_secs: default_lookback_cap_secs(),
            noise_packages: default_noise_packages(),
            activity_log: None,
        }
    }
}

fn default_poll_interval() -> u64 {
    300
}

fn default_gap_merge_ms() -> i64 {
    30_000
}

fn default_min_duration_ms() -> i64 {
    5_000
}

fn default_lookback_cap_secs() -> i64 {
    3_600
}

fn default_noise_packages() -> Vec<String> {
    [
        "com.android.systemui",
        "com.android.launcher",
        "com.android.launcher3",
        "com.google.android.apps.nexuslauncher",
        "com.google.android.inputmethod.latin",
        "com.samsung.android.launcher",
        "com.miui.home",
        "com.microsoft.launcher",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Batch upload configuration
///
/// The bearer credential comes from device registration, which is handled
/// outside this pipeline; we only present it.
#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    /// Enable/disable uploading (collection still runs when disabled)
    #[serde(default)]
    pub enabled: bool,

    /// Ingest server URL (e.g. `https://screentrace.example.com`)
    pub server_url: Option<String>,

    /// Device ID (UUID from registration)
    pub device_id: Option<String>,

    /// Bearer token from registration
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_upload_timeout")]
    pub timeout_secs: u64,

    /// Items per upload chunk
    #[serde(default = "default_upload_max_items")]
    pub max_batch_items: usize,

    /// Serialized bytes per upload chunk
    #[serde(default = "default_upload_max_bytes")]
    pub max_batch_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_url: None,
            device_id: None,
            api_key: None,
            timeout_secs: default_upload_timeout(),
            max_batch_items: default_upload_max_items(),
            max_batch_bytes: default_upload_max_bytes(),
        }
    }
}

impl UploadConfig {
    /// Check if upload is properly configured and enabled
    pub fn is_ready(&self) -> bool {
        self.enabled
            && self.server_url.is_some()
            && self.device_id.is_some()
            && self.api_key.is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.server_url.is_none() {
            return Err(Error::Config(
                "upload.server_url is required when upload is enabled".to_string(),
            ));
        }
        if self.device_id.is_none() {
            return Err(Error::Config(
                "upload.device_id is required when upload is enabled".to_string(),
            ));
        }
        if self.api_key.is_none() {
            return Err(Error::Config(
                "upload.api_key is required when upload is enabled".to_string(),
            ));
        }
        if self.max_batch_items == 0 {
            return Err(Error::Config(
                "upload.max_batch_items must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_upload_timeout() -> u64 {
    30
}

fn default_upload_max_items() -> usize {
    100
}

fn default_upload_max_bytes() -> usize {
    100_000
}

/// A device credential the gateway accepts.
///
/// Issued by the registration service; mirrored into server config here.
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceCredential {
    pub token: String,
    pub device_id: String,
    #[serde(default = "default_account_id")]
    pub account_id: String,
}

fn default_account_id() -> String {
    "default".to_string()
}

/// Ingest gateway configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address for the gateway
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Whole-batch item ceiling; larger batches are rejected for resplit
    #[serde(default = "default_server_max_items")]
    pub max_batch_items: usize,

    /// Whole-batch byte ceiling
    #[serde(default = "default_server_max_bytes")]
    pub max_batch_bytes: usize,

    /// Number of queue partitions (consumer parallelism)
    #[serde(default = "default_queue_partitions")]
    pub queue_partitions: usize,

    /// Queue depth at which the gateway stops accepting and returns 429
    #[serde(default = "default_queue_hard_ceiling")]
    pub queue_hard_ceiling: usize,

    /// Rollup database path override (defaults to the XDG data dir)
    pub database_path: Option<PathBuf>,

    /// Accepted device credentials
    #[serde(default)]
    pub devices: Vec<DeviceCredential>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_batch_items: default_server_max_items(),
            max_batch_bytes: default_server_max_bytes(),
            queue_partitions: default_queue_partitions(),
            queue_hard_ceiling: default_queue_hard_ceiling(),
            database_path: None,
            devices: Vec::new(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_server_max_items() -> usize {
    500
}

fn default_server_max_bytes() -> usize {
    1_000_000
}

fn default_queue_partitions() -> usize {
    4
}

fn default_queue_hard_ceiling() -> usize {
    100_000
}

/// Stream processor configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ProcessorConfig {
    /// Hours a dedup identifier stays in the recent-identifier cache
    #[serde(default = "default_dedup_retention_hours")]
    pub dedup_retention_hours: i64,

    /// Identifier cache capacity bound
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    /// Queue entries pulled per read
    #[serde(default = "default_read_batch")]
    pub read_batch: usize,

    /// Poll delay when a partition is idle, in milliseconds
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            dedup_retention_hours: default_dedup_retention_hours(),
            dedup_capacity: default_dedup_capacity(),
            read_batch: default_read_batch(),
            idle_poll_ms: default_idle_poll_ms(),
        }
    }
}

fn default_dedup_retention_hours() -> i64 {
    48
}

fn default_dedup_capacity() -> usize {
    100_000
}

fn default_read_batch() -> usize {
    64
}

fn default_idle_poll_ms() -> u64 {
    200
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/screentrace/config.toml`
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("screentrace").join("config.toml")
    }

    /// Returns the data directory path (rollup database, cursor state)
    ///
    /// `$XDG_DATA_HOME/screentrace/`
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("screentrace")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/screentrace/`
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("screentrace")
    }

    /// Returns the rollup database file path
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("rollups.db")
    }

    /// Returns the per-device cursor state file path
    pub fn cursor_path() -> PathBuf {
        Self::data_dir().join("cursors.json")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("screentrace.log")
    }
}
