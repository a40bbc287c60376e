//! Configuration for the fulfillment engine

use routing_engine::OptimizerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Fulfillment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for the fulfillment RocksDB
    pub data_dir: PathBuf,

    /// Data directory for the wallet ledger
    pub ledger_data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Dispute window length after delivery confirmation, in hours
    pub dispute_window_hours: i64,

    /// Auto-release sweep interval, in seconds
    pub sweep_interval_secs: u64,

    /// How long a checkout holds a listing before the reservation is
    /// reclaimable, in minutes
    pub reservation_ttl_mins: i64,

    /// Reservation retry behavior
    pub retry: RetryConfig,

    /// Delivery checkpoint schedule
    pub checkpoints: CheckpointConfig,

    /// Route optimizer settings
    pub optimizer: OptimizerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/fulfillment"),
            ledger_data_dir: PathBuf::from("./data/ledger"),
            service_name: "fulfillment".to_string(),
            dispute_window_hours: 12,
            sweep_interval_secs: 120,
            reservation_ttl_mins: 30,
            retry: RetryConfig::default(),
            checkpoints: CheckpointConfig::default(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

/// Bounded retry with jittered backoff for reservation conflicts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum compare-and-set attempts before surfacing the conflict
    pub max_attempts: u32,

    /// Base backoff delay, doubled per attempt, in milliseconds
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 20,
        }
    }
}

/// Delivery checkpoint schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Morning checkpoint time (UTC), "%H:%M"
    pub morning_time: String,

    /// Afternoon checkpoint time (UTC), "%H:%M"
    pub afternoon_time: String,

    /// Wall-clock polling interval, in seconds
    pub tick_secs: u64,

    /// Delivery promise after the checkpoint, in hours; becomes the
    /// delivery stops' time window
    pub delivery_promise_hours: i64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            morning_time: "13:00".to_string(),
            afternoon_time: "19:00".to_string(),
            tick_secs: 30,
            delivery_promise_hours: 4,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("FULFILLMENT_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.ledger_data_dir = PathBuf::from(data_dir);
        }

        if let Ok(hours) = std::env::var("DISPUTE_WINDOW_HOURS") {
            config.dispute_window_hours = hours
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid dispute window: {}", e)))?;
        }

        Ok(config)
    }

    /// Dispute window as a chrono duration
    pub fn dispute_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.dispute_window_hours)
    }

    /// Reservation TTL as a chrono duration
    pub fn reservation_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.reservation_ttl_mins)
    }
}
