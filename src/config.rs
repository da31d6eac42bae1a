//! Configuration for the sxm-link device client
//!
//! Loaded from a TOML file. Every section and field has a default, so an
//! empty file is a valid configuration:
//!
//! ```toml
//! [broker]
//! host = "broker.hivemq.com"
//! port = 1883
//!
//! [session]
//! room_id = "room_uuid"
//! status_interval_ms = 200
//! ```

use crate::error::{Error, Result};
use crate::motion::{ClassifierConfig, SimulationConfig};
use crate::session::SessionConfig;
use crate::transport::BrokerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level application configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub device: DeviceConfig,
    pub classifier: ClassifierConfig,
    pub session: SessionConfig,
    pub simulation: SimulationConfig,
    pub logging: LoggingConfig,
}

/// Device identity
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Fixed device id. A random one is generated per run when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load and validate configuration from a TOML file
    ///
    /// # Example
    /// ```no_run
    /// use sxm_link::config::AppConfig;
    ///
    /// let config = AppConfig::load("sxm-link.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without validating it
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse TOML text without validating it
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Check ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let broker = &self.broker;
        if broker.host.trim().is_empty() {
            return Err(Error::Config("broker.host is empty".to_string()));
        }
        if broker.port == 0 {
            return Err(Error::Config("broker.port must be non-zero".to_string()));
        }
        if broker.connect_timeout_ms == 0 {
            return Err(Error::Config(
                "broker.connect_timeout_ms must be positive".to_string(),
            ));
        }
        if broker.reconnect_min_ms == 0 || broker.reconnect_min_ms > broker.reconnect_max_ms {
            return Err(Error::Config(format!(
                "broker reconnect delays must satisfy 0 < min ({}) <= max ({})",
                broker.reconnect_min_ms, broker.reconnect_max_ms
            )));
        }

        if let Some(id) = &self.device.id
            && id.trim().is_empty()
        {
            return Err(Error::Config("device.id is empty".to_string()));
        }

        self.classifier
            .validate()
            .map_err(|e| Error::Config(format!("classifier: {}", e)))?;

        let session = &self.session;
        if session.room_id.trim().is_empty() {
            return Err(Error::Config("session.room_id is empty".to_string()));
        }
        if session.topic_prefix.trim().is_empty() {
            return Err(Error::Config("session.topic_prefix is empty".to_string()));
        }
        if session.status_interval_ms == 0 {
            return Err(Error::Config(
                "session.status_interval_ms must be positive".to_string(),
            ));
        }

        let sim = &self.simulation;
        if !(sim.rate_hz > 0.0 && sim.rate_hz.is_finite()) {
            return Err(Error::Config(format!(
                "simulation.rate_hz must be positive, got {}",
                sim.rate_hz
            )));
        }
        if !(sim.phase_secs > 0.0 && sim.phase_secs.is_finite()) {
            return Err(Error::Config(format!(
                "simulation.phase_secs must be positive, got {}",
                sim.phase_secs
            )));
        }
        if sim.accel_noise < 0.0 || sim.rotation_noise < 0.0 || sim.orientation_noise < 0.0 {
            return Err(Error::Config(
                "simulation noise levels must be non-negative".to_string(),
            ));
        }

        Ok(())
    }

    /// Configured device id, or a fresh random one.
    pub fn device_id(&self) -> String {
        match &self.device.id {
            Some(id) => id.clone(),
            None => format!("{:032x}", rand::random::<u128>()),
        }
    }
}
