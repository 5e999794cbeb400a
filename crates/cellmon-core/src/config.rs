//! Modem configuration
//!
//! Settings can come from defaults, a JSON file, or be overridden field by
//! field by the caller.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::protocol::{ModemError, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS, PROBE_TIMEOUT_MS};
use crate::telemetry::DEFAULT_POLL_INTERVAL_MS;

/// Connection and polling settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    /// Baud rate used for probing and for the session
    pub baud_rate: u32,
    /// Deadline for one command exchange in milliseconds
    pub command_timeout_ms: u64,
    /// Deadline for the `AT` probe on each candidate port in milliseconds
    pub probe_timeout_ms: u64,
    /// Signal polling cadence in milliseconds
    pub poll_interval_ms: u64,
    /// Fixed port to use instead of scanning
    pub port: Option<String>,
    /// Use the simulated modem instead of real hardware
    pub simulation: bool,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            command_timeout_ms: DEFAULT_TIMEOUT_MS,
            probe_timeout_ms: PROBE_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            port: None,
            simulation: false,
        }
    }
}

impl ModemConfig {
    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModemError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: ModemConfig = serde_json::from_str(&content)
            .map_err(|e| ModemError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the protocol engine cannot work with
    pub fn validate(&self) -> Result<(), ModemError> {
        if self.baud_rate == 0 {
            return Err(ModemError::Config("baud_rate must be non-zero".into()));
        }
        if self.command_timeout_ms == 0 || self.probe_timeout_ms == 0 {
            return Err(ModemError::Config("timeouts must be non-zero".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ModemError::Config("poll_interval_ms must be non-zero".into()));
        }
        Ok(())
    }

    /// Command deadline as a `Duration`
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Probe deadline as a `Duration`
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Polling cadence as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
