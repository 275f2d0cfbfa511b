//! Layered runtime settings: built-in defaults, then an optional YAML file,
//! then `MARITIME__SECTION__KEY` environment overrides.

use crate::broadcast::DEFAULT_BROADCAST_BUFFER_SIZE;
use crate::ingestion::{
    IngestionConfig, DEFAULT_BATCH_SIZE, DEFAULT_DUPLICATE_WINDOW_SECS, DEFAULT_RECONNECT_BACKOFF,
    DEFAULT_SOURCE_ADDRESS,
};
use crate::protocol::{DEFAULT_SPEED_FACTOR, MAX_LINE_LENGTH};
use crate::scheduler::{SchedulerConfig, DEFAULT_PUBLISH_BATCH_SIZE, DEFAULT_TICK_INTERVAL};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8765";
pub const ENV_PREFIX: &str = "MARITIME";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub simulator: SimulatorSettings,
    pub ingestion: IngestionSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialVessel {
    pub mmsi: String,
    pub speed: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorSettings {
    pub bind_address: String,
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    pub speed_factor: f64,
    pub publish_batch_size: usize,
    pub broadcast_buffer_size: usize,
    /// CSV with a `port_id,port_name,latitude,longitude,country` header; the
    /// built-in catalog is used when unset.
    pub ports_file: Option<PathBuf>,
    pub initial_vessels: Vec<InitialVessel>,
    pub seed: Option<u64>,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            speed_factor: DEFAULT_SPEED_FACTOR,
            publish_batch_size: DEFAULT_PUBLISH_BATCH_SIZE,
            broadcast_buffer_size: DEFAULT_BROADCAST_BUFFER_SIZE,
            ports_file: None,
            initial_vessels: vec![
                InitialVessel {
                    mmsi: "123456789".to_string(),
                    speed: 15.0,
                },
                InitialVessel {
                    mmsi: "123456790".to_string(),
                    speed: 17.0,
                },
            ],
            seed: None,
        }
    }
}

impl SimulatorSettings {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: self.tick_interval,
            speed_factor: self.speed_factor,
            publish_batch_size: self.publish_batch_size,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    pub source_address: String,
    pub batch_size: usize,
    #[serde(with = "humantime_serde")]
    pub reconnect_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub duplicate_window: Duration,
    pub max_line_length: usize,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            source_address: DEFAULT_SOURCE_ADDRESS.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            duplicate_window: Duration::from_secs(DEFAULT_DUPLICATE_WINDOW_SECS as u64),
            max_line_length: MAX_LINE_LENGTH,
        }
    }
}

impl IngestionSettings {
    pub fn ingestion_config(&self) -> IngestionConfig {
        IngestionConfig {
            source_address: self.source_address.clone(),
            batch_size: self.batch_size,
            reconnect_backoff: self.reconnect_backoff,
            duplicate_window: self.duplicate_window,
            max_line_length: self.max_line_length,
        }
    }
}

impl Settings {
    pub fn load(path: Option<&str>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.simulator.tick_interval.is_zero() {
            return Err(SettingsError::Invalid {
                key: "simulator.tick_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.simulator.speed_factor.is_nan() {
            return Err(SettingsError::Invalid {
                key: "simulator.speed_factor",
                reason: "must be a number".to_string(),
            });
        }
        if self.simulator.publish_batch_size == 0 {
            return Err(SettingsError::Invalid {
                key: "simulator.publish_batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.ingestion.batch_size == 0 {
            return Err(SettingsError::Invalid {
                key: "ingestion.batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
