//! sxm-link - handheld device link for a shared touch table
//!
//! Samples device motion and orientation, classifies the device as
//! moving/stationary and tilted/horizontal, and keeps the table informed
//! over an MQTT broker that may come and go.
//!
//! ## Modules
//!
//! - [`filter`]: low-pass and one-euro smoothing for noisy sensor streams
//! - [`motion`]: sensor events, permission grants, the motion classifier
//!   and a simulated handheld feed
//! - [`transport`]: resilient MQTT client, wire codec and broker links
//! - [`session`]: room topics, control callbacks and the event loop
//! - [`config`]: TOML configuration

pub mod config;
pub mod error;
pub mod filter;
pub mod motion;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{Error, Result};
pub use filter::{LowPassFilter, OneEuroFilter, VectorFilter};
pub use motion::{DeviceStatus, MotionClassifier, SensorEvent, SensorGrant};
pub use session::Session;
pub use transport::{BrokerLink, LinkEvent, MqttClient, QoS};
