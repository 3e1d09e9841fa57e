//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::aggregator::{AggregatorConfig, Pricing};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub firebase: FirebaseConfig,

    #[serde(default)]
    pub pacing: PacingConfig,

    #[serde(default)]
    pub pricing: Pricing,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote realtime database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FirebaseConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Collection of `{berat, waktu}` records
    #[serde(default = "default_history_path")]
    pub history_path: String,

    /// Scalar holding the current scale reading
    #[serde(default = "default_realtime_path")]
    pub realtime_path: String,

    /// Persisted application state record
    #[serde(default = "default_app_state_path")]
    pub app_state_path: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// A stream silent for this long is considered dead and reopened
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// First delay before reopening a dropped stream, doubled per attempt
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_ms: u64,
}

fn default_database_url() -> String {
    "http://127.0.0.1:9000".to_string()
}

fn default_history_path() -> String {
    "historyBerat".to_string()
}

fn default_realtime_path() -> String {
    "realtimeBerat/berat".to_string()
}

fn default_app_state_path() -> String {
    "perhitungan".to_string()
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_request_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_reconnect_delay() -> u64 {
    1000
}

fn default_reconnect_max_delay() -> u64 {
    30_000
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            history_path: default_history_path(),
            realtime_path: default_realtime_path(),
            app_state_path: default_app_state_path(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            reconnect_delay_ms: default_reconnect_delay(),
            reconnect_max_delay_ms: default_reconnect_max_delay(),
        }
    }
}

impl FirebaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms.max(1))
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms).max(self.reconnect_delay())
    }
}

/// Pacing of the processed weight counter
#[derive(Debug, Clone, Deserialize)]
pub struct PacingConfig {
    #[serde(default = "default_step_grams")]
    pub step_grams: u64,

    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_notify_throttle_ms")]
    pub notify_throttle_ms: u64,

    #[serde(default = "default_chart_capacity")]
    pub chart_capacity: usize,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_step_grams() -> u64 {
    20
}

fn default_interval_ms() -> u64 {
    2000
}

fn default_notify_throttle_ms() -> u64 {
    100
}

fn default_chart_capacity() -> usize {
    20
}

fn default_history_capacity() -> usize {
    10
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            step_grams: default_step_grams(),
            interval_ms: default_interval_ms(),
            notify_throttle_ms: default_notify_throttle_ms(),
            chart_capacity: default_chart_capacity(),
            history_capacity: default_history_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("pilah").join("config.toml")),
            Some(PathBuf::from("/etc/pilah/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Settings for the weight aggregator
    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            step_grams: self.pacing.step_grams.max(1),
            pacing_interval: Duration::from_millis(self.pacing.interval_ms.max(1)),
            notify_throttle: Duration::from_millis(self.pacing.notify_throttle_ms),
            chart_capacity: self.pacing.chart_capacity.max(1),
            history_capacity: self.pacing.history_capacity.max(1),
            pricing: self.pricing,
        }
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("PILAH_FIREBASE_URL") {
            self.firebase.database_url = url;
        }

        if let Ok(level) = std::env::var("PILAH_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("PILAH_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Pilah Configuration
#
# Environment variables override these settings:
# - PILAH_FIREBASE_URL
# - PILAH_LOG_LEVEL
# - PILAH_LOG_FORMAT

[firebase]
# Realtime Database root URL
database_url = "http://127.0.0.1:9000"

# Collection of {berat, waktu} records written by the load cell
history_path = "historyBerat"

# Current scale reading (single number)
realtime_path = "realtimeBerat/berat"

# Where the processed weight and earnings are persisted
app_state_path = "perhitungan"

# Seconds to wait for the first snapshot of every location
connect_timeout_secs = 15

# Timeout for save/reset requests (seconds)
request_timeout_secs = 10

# Reopen a stream that sent nothing (not even keep-alive) for this long
idle_timeout_secs = 60

# Delay before reopening a dropped stream; doubles up to the maximum
reconnect_delay_ms = 1000
reconnect_max_delay_ms = 30000

[pacing]
# Processed weight advances in steps of this many grams
step_grams = 20

# Milliseconds between steps
interval_ms = 2000

# Minimum milliseconds between listener notifications
notify_throttle_ms = 100

# Samples kept for the progress chart
chart_capacity = 20

# History records kept for the history chart
history_capacity = 10

[pricing]
# Rupiah per kg before sorting
before_sorting_per_kg = 8000

# Rupiah per kg after sorting
after_sorting_per_kg = 13000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
