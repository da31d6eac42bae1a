//! Resilient MQTT client front end.
//!
//! # State Machine
//!
//! ```text
//!                connect()              LinkEvent::Connected
//! Disconnected ───────────► Connecting ───────────────────────► Connected
//!      ▲                        │                                   │
//!      │        connect failed  │     LinkEvent::Disconnected       │
//!      └────────────────────────┴───────────────────────────────────┘
//! ```
//!
//! # Outbound Queue
//!
//! `send()` publishes immediately only while connected with an empty queue.
//! Otherwise the message joins an unbounded FIFO that is flushed, in order,
//! right after the connected callbacks have run. Messages sent from those
//! callbacks therefore land behind the backlog.
//!
//! # Subscriptions
//!
//! `subscribe()` does nothing while disconnected. Owners re-issue their
//! subscriptions from a connected callback.
//!
//! # Re-entrancy
//!
//! Callbacks and handlers receive `&mut MqttClient` and may send,
//! subscribe or register further callbacks while being invoked.

use super::{BrokerLink, LinkEvent, Message, QoS, REASON_NORMAL};
use crate::error::{Error, Result};
use std::collections::{HashMap, VecDeque};

/// Connection state of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Lifecycle callback (connected / disconnected)
pub type ConnectionCallback = Box<dyn FnMut(&mut MqttClient)>;

/// Inbound message handler, called with the raw payload
pub type MessageHandler = Box<dyn FnMut(&mut MqttClient, &[u8])>;

/// Counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Messages handed to the link
    pub published: u64,
    /// Messages that went through the offline queue
    pub queued: u64,
    /// Link errors on publish
    pub publish_errors: u64,
    /// Inbound messages delivered to a handler
    pub delivered: u64,
    /// Inbound messages without a handler
    pub dropped: u64,
}

/// Publish/subscribe client that survives broker disconnects.
pub struct MqttClient {
    link: Box<dyn BrokerLink>,
    state: ConnectionState,
    queue: VecDeque<Message>,
    subscriptions: HashMap<String, MessageHandler>,
    on_connected: Vec<ConnectionCallback>,
    on_disconnected: Vec<ConnectionCallback>,
    stats: TransportStats,
}

impl MqttClient {
    /// Create a disconnected client on top of `link`.
    pub fn new(link: Box<dyn BrokerLink>) -> Self {
        Self {
            link,
            state: ConnectionState::Disconnected,
            queue: VecDeque::new(),
            subscriptions: HashMap::new(),
            on_connected: Vec::new(),
            on_disconnected: Vec::new(),
            stats: TransportStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    /// Number of messages waiting for the next connection.
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Messages waiting for the next connection, oldest first.
    pub fn queued(&self) -> impl Iterator<Item = &Message> {
        self.queue.iter()
    }

    /// True if a handler is registered for `topic`.
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.contains_key(topic)
    }

    /// Topics with a registered handler, in no particular order.
    pub fn subscribed_topics(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.keys().map(String::as_str)
    }

    /// Start connecting. Ignored unless disconnected.
    pub fn connect(&mut self) -> Result<()> {
        if self.state != ConnectionState::Disconnected {
            log::debug!("connect() ignored in state {:?}", self.state);
            return Ok(());
        }
        self.state = ConnectionState::Connecting;
        if let Err(e) = self.link.connect() {
            self.state = ConnectionState::Disconnected;
            return Err(e);
        }
        Ok(())
    }

    /// Close the session.
    ///
    /// While connected the state changes when the link reports the
    /// disconnect. A pending connection attempt is abandoned immediately.
    pub fn disconnect(&mut self) {
        if let Err(e) = self.link.disconnect() {
            log::warn!("Disconnect failed: {}", e);
        }
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Publish `payload` on `topic`, or queue it until the next connection.
    pub fn send(
        &mut self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        qos: QoS,
        retained: bool,
    ) {
        let message = Message {
            topic: topic.into(),
            qos,
            payload: payload.into(),
            retained,
        };

        if self.is_connected() && self.queue.is_empty() {
            self.publish_now(message);
        } else {
            log::trace!("Queueing message for '{}'", message.topic);
            self.stats.queued += 1;
            self.queue.push_back(message);
        }
    }

    /// Subscribe `handler` to `topic` at QoS 1.
    ///
    /// Does nothing while disconnected. A rejected request is logged and
    /// leaves the table untouched. Returns true if the handler was
    /// registered.
    pub fn subscribe(&mut self, topic: impl Into<String>, handler: MessageHandler) -> bool {
        let topic = topic.into();
        if !self.is_connected() {
            log::debug!("subscribe('{}') ignored while {:?}", topic, self.state);
            return false;
        }

        match self.link.subscribe(&topic, QoS::AtLeastOnce) {
            Ok(()) => {
                log::debug!("Subscribed to '{}'", topic);
                self.subscriptions.insert(topic, handler);
                true
            }
            Err(e) => {
                log::warn!("Subscribe to '{}' failed: {}", topic, e);
                false
            }
        }
    }

    /// Add a callback run on every transition to connected.
    pub fn register_on_connected(&mut self, callback: ConnectionCallback) {
        self.on_connected.push(callback);
    }

    /// Add a callback run on every clean disconnect.
    pub fn register_on_disconnected(&mut self, callback: ConnectionCallback) {
        self.on_disconnected.push(callback);
    }

    /// Apply one event reported by the link.
    pub fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => self.on_connect(),
            LinkEvent::Message { topic, payload } => self.on_message(&topic, &payload),
            LinkEvent::Disconnected {
                reason_code,
                reason,
            } => self.on_disconnect(reason_code, reason.as_deref()),
            LinkEvent::SubscribeRejected { topic } => {
                log::warn!("Broker rejected subscription to '{}'", topic);
                self.subscriptions.remove(&topic);
            }
        }
    }

    fn on_connect(&mut self) {
        log::info!("MQTT client connected");
        self.state = ConnectionState::Connected;

        let mut callbacks = std::mem::take(&mut self.on_connected);
        for callback in callbacks.iter_mut() {
            callback(self);
        }
        // Keep callbacks registered while we were iterating
        callbacks.append(&mut self.on_connected);
        self.on_connected = callbacks;

        self.flush_queue();
    }

    fn flush_queue(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        log::info!("Flushing {} queued messages", self.queue.len());

        // Messages appended while flushing go out in the same pass
        while self.is_connected() {
            let Some(message) = self.queue.pop_front() else {
                break;
            };
            if !self.publish_now(message) {
                break;
            }
        }
    }

    /// Hand `message` to the link. A link that already lost its socket
    /// gets the message back at the head of the queue; returns false then.
    fn publish_now(&mut self, message: Message) -> bool {
        match self.link.publish(&message) {
            Ok(()) => self.stats.published += 1,
            Err(Error::NotConnected) => {
                log::debug!(
                    "Link down before disconnect was reported, requeueing '{}'",
                    message.topic
                );
                self.stats.queued += 1;
                self.queue.push_front(message);
                return false;
            }
            Err(e) => {
                self.stats.publish_errors += 1;
                log::warn!("Publish to '{}' failed: {}", message.topic, e);
            }
        }
        true
    }

    fn on_message(&mut self, topic: &str, payload: &[u8]) {
        let Some(mut handler) = self.subscriptions.remove(topic) else {
            self.stats.dropped += 1;
            log::debug!(
                "No handler for '{}', dropping {} bytes",
                topic,
                payload.len()
            );
            return;
        };

        self.stats.delivered += 1;
        handler(self, payload);

        // A handler that re-subscribed its own topic replaced itself
        self.subscriptions
            .entry(topic.to_string())
            .or_insert(handler);
    }

    fn on_disconnect(&mut self, reason_code: u8, reason: Option<&str>) {
        self.state = ConnectionState::Disconnected;

        if reason_code != REASON_NORMAL {
            log::warn!(
                "Connection lost (reason {:#04x}: {})",
                reason_code,
                reason.unwrap_or("unspecified")
            );
            return;
        }

        log::info!("MQTT client disconnected");
        let mut callbacks = std::mem::take(&mut self.on_disconnected);
        for callback in callbacks.iter_mut() {
            callback(self);
        }
        callbacks.append(&mut self.on_disconnected);
        self.on_disconnected = callbacks;
    }
}

impl std::fmt::Debug for MqttClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttClient")
            .field("state", &self.state)
            .field("queued", &self.queue.len())
            .field("subscriptions", &self.subscriptions.len())
            .field("stats", &self.stats)
            .finish()
    }
}
