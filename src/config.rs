//! Configuration for heartwatch.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::core::clock::Zone;
use crate::core::metrics::DEFAULT_IPM_FACTOR;
use crate::core::window::{WindowMode, MAX_WINDOW_SECS};
use crate::ingest::{WireFormat, DEFAULT_CHANNEL_CAPACITY};

const APP_DIR: &str = "heartwatch";

/// Main configuration for the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Length of the trailing metrics window
    #[serde(with = "duration_secs")]
    pub window_duration: Duration,

    /// Period of the update scheduler
    #[serde(with = "duration_millis")]
    pub tick_interval: Duration,

    /// Multiplier used to approximate IPM from BPM
    pub ipm_factor: f64,

    /// Directory holding the per-run append logs
    pub log_dir: PathBuf,

    /// Path for storing state such as cumulative stats
    pub data_path: PathBuf,

    /// Capacity of the ingestion → scheduler handoff
    pub channel_capacity: usize,

    /// Wire format to expect; `None` detects it per message
    pub wire_format: Option<WireFormat>,

    pub window_mode: WindowMode,

    /// Zone for log stamps: "local" or an IANA name such as "Europe/Berlin"
    pub timezone: String,

    /// fsync the log after every append
    pub sync_on_append: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            window_duration: Duration::from_secs(60),
            tick_interval: Duration::from_millis(1000),
            ipm_factor: DEFAULT_IPM_FACTOR,
            log_dir: data_dir.join("logs"),
            data_path: data_dir,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            wire_format: None,
            window_mode: WindowMode::Scan,
            timezone: "local".to_string(),
            sync_on_append: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Where cumulative session stats are persisted.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.log_dir).map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// The configured log stamp zone.
    pub fn zone(&self) -> Result<Zone, ConfigError> {
        self.timezone.parse().map_err(ConfigError::Invalid)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_duration.is_zero() {
            return Err(ConfigError::Invalid(
                "window_duration must be at least one second".to_string(),
            ));
        }
        if self.window_duration.as_secs() > MAX_WINDOW_SECS {
            return Err(ConfigError::Invalid(format!(
                "window_duration must be at most {MAX_WINDOW_SECS} seconds"
            )));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "tick_interval must be positive".to_string(),
            ));
        }
        if !self.ipm_factor.is_finite() || self.ipm_factor <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "ipm_factor must be a positive number, got {}",
                self.ipm_factor
            )));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        self.zone()?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde support for Duration as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
