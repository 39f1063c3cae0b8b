//! progressd configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main progressd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR); CLI flag wins over this
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Tracker batching configuration
    pub tracker: TrackerConfig,

    /// Push channel configuration
    pub push: PushConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Client recovery cache configuration
    pub cache: CacheConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        let sum = self.tracker.weights.sum();
        if sum != 100 {
            return Err(eyre::eyre!(
                "Phase weights must sum to 100, got {} (upload {} + processing {} + matching {} + report {})",
                sum,
                self.tracker.weights.upload,
                self.tracker.weights.processing,
                self.tracker.weights.matching,
                self.tracker.weights.report_generation,
            ));
        }
        if self.tracker.flush_interval_ms == 0 {
            return Err(eyre::eyre!("tracker.flush-interval-ms must be greater than zero"));
        }
        if self.push.heartbeat_interval_ms == 0 {
            return Err(eyre::eyre!("push.heartbeat-interval-ms must be greater than zero"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .progressd.yml
        let local_config = PathBuf::from(".progressd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/progressd/progressd.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("progressd").join("progressd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Peek at the configured log level before logging is initialized
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Tracker batching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Minimum interval between timer-driven snapshot flushes
    #[serde(rename = "flush-interval-ms")]
    pub flush_interval_ms: u64,

    /// Phase weight table for the overall percentage
    pub weights: PhaseWeights,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 2500,
            weights: PhaseWeights::default(),
        }
    }
}

/// Fixed weight each phase contributes to the overall percentage
///
/// Tunable configuration, not derived business logic. Must sum to 100.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseWeights {
    pub upload: u8,
    pub processing: u8,
    pub matching: u8,
    #[serde(rename = "report-generation")]
    pub report_generation: u8,
}

impl Default for PhaseWeights {
    fn default() -> Self {
        Self {
            upload: 10,
            processing: 60,
            matching: 25,
            report_generation: 5,
        }
    }
}

impl PhaseWeights {
    pub fn sum(&self) -> u32 {
        u32::from(self.upload)
            + u32::from(self.processing)
            + u32::from(self.matching)
            + u32::from(self.report_generation)
    }
}

/// Push channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Heartbeat interval; keep well below any proxy/server idle timeout
    #[serde(rename = "heartbeat-interval-ms")]
    pub heartbeat_interval_ms: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 15_000,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the snapshot store
    #[serde(rename = "snapstore-dir")]
    pub snapstore_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let snapstore_dir = dirs::data_dir()
            .map(|d| d.join("progressd").join("snapshots"))
            .unwrap_or_else(|| PathBuf::from(".snapstore"))
            .to_string_lossy()
            .into_owned();

        Self { snapstore_dir }
    }
}

/// Client recovery cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory for cached snapshots
    pub dir: String,

    /// Disable to run memory-only
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let dir = dirs::data_local_dir()
            .map(|d| d.join("progressd").join("cache"))
            .unwrap_or_else(|| PathBuf::from(".progress-cache"))
            .to_string_lossy()
            .into_owned();

        Self { dir, enabled: true }
    }
}
