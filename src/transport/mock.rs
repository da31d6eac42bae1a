//! Mock broker link for testing

use super::{BrokerLink, Message, QoS};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// In-memory link that records everything the client asks of it.
///
/// Clones share state, so a test keeps one handle while the client owns
/// another. Events are not generated; tests feed them to the client.
#[derive(Clone)]
pub struct MockLink {
    inner: Arc<Mutex<MockLinkInner>>,
}

#[derive(Default)]
struct MockLinkInner {
    connects: usize,
    disconnects: usize,
    published: Vec<Message>,
    subscriptions: Vec<(String, QoS)>,
    fail_connect: bool,
    fail_publish: bool,
    offline: bool,
    reject_subscriptions: bool,
}

impl MockLink {
    /// Create a new mock link
    pub fn new() -> Self {
        MockLink {
            inner: Arc::new(Mutex::new(MockLinkInner::default())),
        }
    }

    /// Messages published so far
    pub fn published(&self) -> Vec<Message> {
        self.inner.lock().published.clone()
    }

    /// Drain the published messages
    pub fn take_published(&self) -> Vec<Message> {
        std::mem::take(&mut self.inner.lock().published)
    }

    /// Subscription requests so far
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.inner.lock().subscriptions.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.inner.lock().connects
    }

    pub fn disconnect_count(&self) -> usize {
        self.inner.lock().disconnects
    }

    /// Make `connect()` fail
    pub fn set_fail_connect(&self, fail: bool) {
        self.inner.lock().fail_connect = fail;
    }

    /// Make `publish()` fail
    pub fn set_fail_publish(&self, fail: bool) {
        self.inner.lock().fail_publish = fail;
    }

    /// Make `publish()` report a dropped socket
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Make `subscribe()` fail
    pub fn set_reject_subscriptions(&self, reject: bool) {
        self.inner.lock().reject_subscriptions = reject;
    }
}

impl BrokerLink for MockLink {
    fn connect(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_connect {
            return Err(Error::Other("mock connect failure".to_string()));
        }
        inner.connects += 1;
        Ok(())
    }

    fn publish(&mut self, message: &Message) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.offline {
            return Err(Error::NotConnected);
        }
        if inner.fail_publish {
            return Err(Error::Other("mock publish failure".to_string()));
        }
        inner.published.push(message.clone());
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.reject_subscriptions {
            return Err(Error::Protocol(format!("subscription to '{}' rejected", topic)));
        }
        inner.subscriptions.push((topic.to_string(), qos));
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.inner.lock().disconnects += 1;
        Ok(())
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}
