//! MQTT 3.1.1 over plain TCP
//!
//! A background thread owns the socket reader. It connects, keeps the
//! session alive with PINGREQ, answers broker-side acknowledgements and
//! reconnects with exponential backoff when the connection drops.
//! Everything it learns is reported as [`LinkEvent`]s on a channel.
//!
//! # Connection Lifecycle
//!
//! ```text
//! 1. connect() spawns the link thread
//! 2. Thread opens TCP, sends CONNECT, waits for CONNACK
//! 3. LinkEvent::Connected, then read loop until error or disconnect()
//! 4. LinkEvent::Disconnected (reason 0 if requested, 0x80 otherwise)
//! 5. Unless requested, sleep backoff and go to 2
//! ```
//!
//! # Thread Safety
//!
//! Writes come from two threads: the owner (PUBLISH, SUBSCRIBE) and the
//! link thread (acks, PINGREQ). A cloned write handle behind a mutex
//! keeps packets from interleaving on the wire.
//!
//! # QoS
//!
//! Outbound QoS 1/2 publishes are written once and not retransmitted.
//! Inbound QoS 2 messages are delivered on PUBLISH, before PUBREL.

use super::codec::{self, Connect, Packet, Publish, SUBACK_FAILURE};
use super::{BrokerConfig, BrokerLink, LinkEvent, Message, QoS, REASON_NORMAL, REASON_UNSPECIFIED};
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Read timeout so the loop can check flags and keep-alive
const READ_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Granularity of the backoff sleep
const BACKOFF_SLICE: Duration = Duration::from_millis(50);

/// Initial capacity for the inbound byte buffer
const INITIAL_BUFFER_CAPACITY: usize = 4096;

/// State shared between the owner and the link thread
struct LinkShared {
    /// Write half of the current connection
    writer: Mutex<Option<TcpStream>>,
    /// Link thread keeps running while set
    running: AtomicBool,
    /// Set by disconnect(); the next drop is reported as clean
    closing: AtomicBool,
    next_packet_id: AtomicU16,
    /// SUBSCRIBE packet id -> topic, until SUBACK
    pending_subscriptions: Mutex<HashMap<u16, String>>,
}

impl LinkShared {
    fn write_packet(&self, packet: &Packet) -> Result<()> {
        let bytes = packet.encode()?;
        let mut guard = self.writer.lock();
        let stream = guard.as_mut().ok_or(Error::NotConnected)?;
        // A failed write means the socket is gone; the reader reports the drop
        stream.write_all(&bytes).map_err(|e| {
            log::debug!("Write failed: {}", e);
            Error::NotConnected
        })
    }

    fn next_packet_id(&self) -> u16 {
        // Zero is not a valid packet identifier
        loop {
            let id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    fn close_socket(&self) {
        if let Some(stream) = self.writer.lock().as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// MQTT link over TCP with automatic reconnect.
pub struct TcpLink {
    config: BrokerConfig,
    client_id: String,
    shared: Arc<LinkShared>,
    events: Sender<LinkEvent>,
    handle: Option<JoinHandle<()>>,
}

impl TcpLink {
    /// Create the link and the channel its events arrive on.
    pub fn new(config: BrokerConfig, client_id: impl Into<String>) -> (Self, Receiver<LinkEvent>) {
        let (events, receiver) = crossbeam_channel::unbounded();
        let link = Self {
            config,
            client_id: client_id.into(),
            shared: Arc::new(LinkShared {
                writer: Mutex::new(None),
                running: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                next_packet_id: AtomicU16::new(1),
                pending_subscriptions: Mutex::new(HashMap::new()),
            }),
            events,
            handle: None,
        };
        (link, receiver)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// True while the link thread is alive
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn stop_thread(&mut self) {
        self.shared.closing.store(true, Ordering::Relaxed);
        self.shared.running.store(false, Ordering::Relaxed);

        // Best effort; the socket may already be gone
        let _ = self.shared.write_packet(&Packet::Disconnect);
        self.shared.close_socket();

        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            log::error!("MQTT link thread panicked");
        }
    }
}

impl BrokerLink for TcpLink {
    fn connect(&mut self) -> Result<()> {
        if self.is_running() {
            log::debug!("MQTT link already running");
            return Ok(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }

        self.shared.running.store(true, Ordering::Relaxed);
        self.shared.closing.store(false, Ordering::Relaxed);

        let config = self.config.clone();
        let client_id = self.client_id.clone();
        let shared = Arc::clone(&self.shared);
        let events = self.events.clone();

        let handle = thread::Builder::new()
            .name("mqtt-link".to_string())
            .spawn(move || connection_loop(config, client_id, shared, events))
            .map_err(|e| Error::Other(format!("Failed to spawn MQTT link thread: {}", e)))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn publish(&mut self, message: &Message) -> Result<()> {
        let packet_id = match message.qos {
            QoS::AtMostOnce => None,
            _ => Some(self.shared.next_packet_id()),
        };
        self.shared.write_packet(&Packet::Publish(Publish {
            topic: message.topic.clone(),
            qos: message.qos,
            retain: message.retained,
            dup: false,
            packet_id,
            payload: message.payload.clone(),
        }))
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<()> {
        let packet_id = self.shared.next_packet_id();
        self.shared
            .pending_subscriptions
            .lock()
            .insert(packet_id, topic.to_string());

        let result = self.shared.write_packet(&Packet::Subscribe {
            packet_id,
            topics: vec![(topic.to_string(), qos)],
        });
        if result.is_err() {
            self.shared.pending_subscriptions.lock().remove(&packet_id);
        }
        result
    }

    fn disconnect(&mut self) -> Result<()> {
        log::info!("Disconnecting from {}", self.config.address());
        self.stop_thread();
        Ok(())
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop_thread();
        }
    }
}

/// Link thread body: connect, serve, back off, repeat.
fn connection_loop(
    config: BrokerConfig,
    client_id: String,
    shared: Arc<LinkShared>,
    events: Sender<LinkEvent>,
) {
    let min_backoff = Duration::from_millis(config.reconnect_min_ms.max(1));
    let max_backoff = Duration::from_millis(config.reconnect_max_ms).max(min_backoff);
    let mut backoff = min_backoff;

    log::info!("MQTT link thread started");

    while shared.running.load(Ordering::Relaxed) {
        let session = open_session(&config, &client_id).and_then(|stream| {
            let writer = stream.try_clone()?;
            Ok((stream, writer))
        });
        match session {
            Ok((stream, writer)) => {
                backoff = min_backoff;
                log::info!("Connected to broker {} as '{}'", config.address(), client_id);
                *shared.writer.lock() = Some(writer);

                if events.send(LinkEvent::Connected).is_err() {
                    log::debug!("Event receiver dropped, stopping link");
                    break;
                }

                let outcome = serve(stream, &config, &shared, &events);

                *shared.writer.lock() = None;
                shared.pending_subscriptions.lock().clear();

                let requested = shared.closing.load(Ordering::Relaxed);
                let event = match outcome {
                    _ if requested => LinkEvent::Disconnected {
                        reason_code: REASON_NORMAL,
                        reason: None,
                    },
                    Ok(()) => LinkEvent::Disconnected {
                        reason_code: REASON_UNSPECIFIED,
                        reason: Some("connection closed by broker".to_string()),
                    },
                    Err(e) => LinkEvent::Disconnected {
                        reason_code: REASON_UNSPECIFIED,
                        reason: Some(e.to_string()),
                    },
                };
                let _ = events.send(event);

                if requested {
                    break;
                }
            }
            Err(e) => {
                log::warn!("Broker {} unreachable: {}", config.address(), e);
            }
        }

        if !shared.running.load(Ordering::Relaxed) {
            break;
        }

        log::debug!("Reconnecting in {:?}", backoff);
        let deadline = Instant::now() + backoff;
        while shared.running.load(Ordering::Relaxed) && Instant::now() < deadline {
            thread::sleep(BACKOFF_SLICE);
        }
        backoff = (backoff * 2).min(max_backoff);
    }

    log::info!("MQTT link thread stopped");
}

/// Open TCP, send CONNECT and wait for an accepting CONNACK.
fn open_session(config: &BrokerConfig, client_id: &str) -> Result<TcpStream> {
    let timeout = Duration::from_millis(config.connect_timeout_ms.max(1));

    let mut last_error = None;
    let mut stream = None;
    for addr in (config.host.as_str(), config.port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(e) => last_error = Some(e),
        }
    }
    let mut stream = match (stream, last_error) {
        (Some(s), _) => s,
        (None, Some(e)) => return Err(e.into()),
        (None, None) => {
            return Err(Error::Config(format!(
                "Broker host '{}' did not resolve",
                config.host
            )));
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        log::warn!("Failed to set TCP_NODELAY: {}", e);
    }
    stream.set_read_timeout(Some(timeout))?;

    let connect = Packet::Connect(Connect {
        client_id: client_id.to_string(),
        keep_alive_secs: config.keep_alive_secs,
        clean_session: true,
        username: config.username.clone(),
        password: config.password.clone(),
    });
    stream.write_all(&connect.encode()?)?;

    let mut buffer = Vec::with_capacity(64);
    let mut chunk = [0u8; 64];
    let packet = loop {
        if let Some((packet, _)) = Packet::decode(&buffer)? {
            break packet;
        }
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(Error::Protocol("connection closed before CONNACK".to_string()));
        }
        buffer.extend_from_slice(&chunk[..n]);
    };

    match packet {
        Packet::ConnAck { return_code: 0, .. } => Ok(stream),
        Packet::ConnAck { return_code, .. } => Err(Error::Protocol(format!(
            "connection refused: {}",
            codec::connack_reason(return_code)
        ))),
        other => Err(Error::Protocol(format!(
            "expected CONNACK, got {:?}",
            other
        ))),
    }
}

/// Read loop for an established session.
///
/// Returns `Ok(())` when the broker closes the connection or a disconnect
/// was requested, and the error otherwise.
fn serve(
    mut stream: TcpStream,
    config: &BrokerConfig,
    shared: &LinkShared,
    events: &Sender<LinkEvent>,
) -> Result<()> {
    stream.set_read_timeout(Some(READ_POLL_INTERVAL))?;

    let keep_alive = Duration::from_secs(config.keep_alive_secs as u64);
    let mut last_ping = Instant::now();
    let mut buffer = Vec::with_capacity(INITIAL_BUFFER_CAPACITY);
    let mut chunk = [0u8; INITIAL_BUFFER_CAPACITY];

    loop {
        if !shared.running.load(Ordering::Relaxed) || shared.closing.load(Ordering::Relaxed) {
            return Ok(());
        }

        match stream.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
            Err(e) => return Err(e.into()),
        }

        while let Some((packet, used)) = Packet::decode(&buffer)? {
            buffer.drain(..used);
            handle_packet(packet, shared, events)?;
        }

        // PINGREQ at half the keep-alive so the broker never times us out
        if !keep_alive.is_zero() && last_ping.elapsed() >= keep_alive / 2 {
            shared.write_packet(&Packet::PingReq)?;
            last_ping = Instant::now();
        }
    }
}

fn handle_packet(packet: Packet, shared: &LinkShared, events: &Sender<LinkEvent>) -> Result<()> {
    match packet {
        Packet::Publish(publish) => {
            match (publish.qos, publish.packet_id) {
                (QoS::AtLeastOnce, Some(id)) => shared.write_packet(&Packet::PubAck(id))?,
                (QoS::ExactlyOnce, Some(id)) => shared.write_packet(&Packet::PubRec(id))?,
                _ => {}
            }
            log::trace!(
                "Inbound publish on '{}' ({} bytes)",
                publish.topic,
                publish.payload.len()
            );
            let _ = events.send(LinkEvent::Message {
                topic: publish.topic,
                payload: publish.payload,
            });
        }
        Packet::PubRec(id) => shared.write_packet(&Packet::PubRel(id))?,
        Packet::PubRel(id) => shared.write_packet(&Packet::PubComp(id))?,
        Packet::PubAck(id) | Packet::PubComp(id) => {
            log::trace!("Publish {} acknowledged", id);
        }
        Packet::SubAck {
            packet_id,
            return_codes,
        } => {
            let topic = shared.pending_subscriptions.lock().remove(&packet_id);
            match topic {
                Some(topic) if return_codes.contains(&SUBACK_FAILURE) => {
                    let _ = events.send(LinkEvent::SubscribeRejected { topic });
                }
                Some(topic) => log::debug!("Subscription to '{}' granted {:?}", topic, return_codes),
                None => log::warn!("SUBACK for unknown packet id {}", packet_id),
            }
        }
        Packet::PingResp => log::trace!("PINGRESP"),
        other => log::warn!("Unexpected packet from broker: {:?}", other),
    }
    Ok(())
}
