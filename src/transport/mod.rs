//! Publish/subscribe transport.
//!
//! [`MqttClient`] is the resilient front end: it queues outbound messages
//! while the broker is unreachable and routes inbound messages to per-topic
//! handlers. The network side sits behind [`BrokerLink`]:
//!
//! - [`TcpLink`]: MQTT 3.1.1 over TCP with automatic reconnect
//! - [`MockLink`]: in-memory link for tests
//!
//! Links never call into the client. They report connection changes and
//! inbound messages as [`LinkEvent`]s, which the owner feeds to
//! [`MqttClient::handle_event`] on its own thread.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

pub mod client;
pub mod codec;
pub mod mock;
pub mod tcp;

pub use client::{ConnectionCallback, ConnectionState, MessageHandler, MqttClient};
pub use mock::MockLink;
pub use tcp::TcpLink;

/// Disconnect reason for a clean, requested shutdown
pub const REASON_NORMAL: u8 = 0x00;

/// Disconnect reason for an unexpected drop (MQTT 5 "Unspecified error")
pub const REASON_UNSPECIFIED: u8 = 0x80;

/// MQTT quality-of-service level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QoS {
    /// Fire and forget
    #[default]
    AtMostOnce = 0,
    /// Acknowledged delivery, duplicates possible
    AtLeastOnce = 1,
    /// Four-way handshake
    ExactlyOnce = 2,
}

impl QoS {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for QoS {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(Error::Protocol(format!("invalid QoS level {}", other))),
        }
    }
}

/// Outbound message, also the unit of the offline queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub qos: QoS,
    pub payload: Vec<u8>,
    pub retained: bool,
}

/// Notification from a [`BrokerLink`] to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Session with the broker established
    Connected,
    /// Inbound publish
    Message { topic: String, payload: Vec<u8> },
    /// Session ended. `reason_code` is [`REASON_NORMAL`] for a requested
    /// disconnect and non-zero for network or broker failures.
    Disconnected {
        reason_code: u8,
        reason: Option<String>,
    },
    /// Broker refused a subscription request
    SubscribeRejected { topic: String },
}

/// Network side of the transport.
///
/// Implementations report progress as [`LinkEvent`]s; none of these calls
/// block until the broker acknowledges.
pub trait BrokerLink: Send {
    /// Start connecting. `LinkEvent::Connected` follows on success.
    fn connect(&mut self) -> Result<()>;

    /// Write a publish to the broker.
    fn publish(&mut self, message: &Message) -> Result<()>;

    /// Request a subscription.
    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<()>;

    /// Close the session cleanly.
    fn disconnect(&mut self) -> Result<()>;
}

/// Broker connection parameters. Built once, never mutated by the link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker host name
    pub host: String,

    /// Broker port
    pub port: u16,

    /// WebSocket endpoint path, for WebSocket-fronted brokers
    pub path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Appended to the device id to form the MQTT client id
    pub client_suffix: String,

    /// Keep-alive interval announced in CONNECT (seconds, 0 = disabled)
    pub keep_alive_secs: u16,

    /// TCP connect and CONNACK timeout (milliseconds)
    pub connect_timeout_ms: u64,

    /// First reconnect delay (milliseconds)
    pub reconnect_min_ms: u64,

    /// Reconnect delay cap (milliseconds)
    pub reconnect_max_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".to_string(),
            port: 1883,
            path: "/mqtt".to_string(),
            username: None,
            password: None,
            client_suffix: "_capore".to_string(),
            keep_alive_secs: 30,
            connect_timeout_ms: 5000,
            reconnect_min_ms: 500,
            reconnect_max_ms: 30_000,
        }
    }
}

impl BrokerConfig {
    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// MQTT client id for `device_id`.
    pub fn client_id(&self, device_id: &str) -> String {
        format!("{}{}", device_id, self.client_suffix)
    }
}
