use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::handshake::HANDSHAKE_WINDOW_MS;
use crate::store::DEFAULT_RETENTION_MS;
use crate::tasks::{MAX_FREQUENCY_MHZ, MIN_FREQUENCY_MHZ};

pub const DEFAULT_FLIGHT: &str = "TEST01";
pub const DEFAULT_FREQUENCY_MHZ: f32 = 915.0;
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Relay settings. Every field has a default, so a config file only needs
/// the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub flight: String,
    pub frequency_mhz: f32,
    pub listen_addr: String,
    pub log_path: PathBuf,
    pub loop_period_ms: u64,
    pub receive_timeout_ms: u64,
    pub handshake_window_ms: u64,
    pub response_ttl_ms: u64,
    /// How long the operator endpoint waits for a task's response.
    pub response_wait_ms: u64,
    pub retention_ms: u64,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            flight: DEFAULT_FLIGHT.to_string(),
            frequency_mhz: DEFAULT_FREQUENCY_MHZ,
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            log_path: PathBuf::from("telemetry.csv"),
            loop_period_ms: 200,
            receive_timeout_ms: 50,
            handshake_window_ms: HANDSHAKE_WINDOW_MS,
            response_ttl_ms: 10_000,
            response_wait_ms: 5_000,
            retention_ms: DEFAULT_RETENTION_MS,
        }
    }
}

impl StationConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flight.is_empty() {
            return Err(ConfigError::Invalid("flight name must not be empty".into()));
        }
        if !(MIN_FREQUENCY_MHZ..=MAX_FREQUENCY_MHZ).contains(&f64::from(self.frequency_mhz)) {
            return Err(ConfigError::Invalid(format!(
                "frequency {} MHz out of range [900, 930]",
                self.frequency_mhz
            )));
        }
        if self.loop_period_ms == 0 {
            return Err(ConfigError::Invalid("loop period must be positive".into()));
        }
        if self.response_ttl_ms > 10_000 {
            return Err(ConfigError::Invalid("response TTL must not exceed 10 s".into()));
        }
        Ok(())
    }

    pub fn loop_period(&self) -> Duration {
        Duration::from_millis(self.loop_period_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn response_ttl(&self) -> Duration {
        Duration::from_millis(self.response_ttl_ms)
    }

    pub fn response_wait(&self) -> Duration {
        Duration::from_millis(self.response_wait_ms)
    }
}
