//! Device session: classifier, transport and control topics in one loop.
//!
//! # Topics
//!
//! ```text
//! <prefix>/<room>/box               status out (QoS 1, JSON)
//! <prefix>/<room>/start             control in
//! <prefix>/<room>/shutdown          control in
//! <prefix>/<room>/<device>/down     control in
//! <prefix>/<room>/<device>/up       control in
//! ```
//!
//! # Threading
//!
//! Everything in a session runs on the thread that calls [`Session::run`].
//! The link thread and the sensor feed only deliver events over channels.
//! Motion observers and subscription handlers forward into internal
//! channels that the loop drains after each event, so user callbacks never
//! run inside the classifier or the client.

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::motion::{DeviceStatus, MotionClassifier, SensorEvent, SensorGrant};
use crate::transport::{BrokerLink, ConnectionState, LinkEvent, MqttClient, QoS};
use crossbeam_channel::{Receiver, Sender, never, select, tick};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Idle wake-up so the loop notices the running flag
const IDLE_TIMEOUT: Duration = Duration::from_millis(100);

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Room shared with the table
    pub room_id: String,

    /// First topic level
    pub topic_prefix: String,

    /// Period of the status sender (milliseconds)
    pub status_interval_ms: u64,

    /// Start the status sender as soon as the session runs
    pub autostart: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            room_id: "room_uuid".to_string(),
            topic_prefix: "sxm".to_string(),
            status_interval_ms: 200,
            autostart: true,
        }
    }
}

impl SessionConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

/// Control message kinds received from the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    Start,
    Shutdown,
    Down,
    Up,
}

impl Control {
    pub const ALL: [Control; 4] = [Control::Start, Control::Shutdown, Control::Down, Control::Up];
}

/// Callback for a control message, called with the raw payload
pub type ControlCallback = Box<dyn FnMut(&[u8])>;

/// Topic names for one device in one room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub status: String,
    pub start: String,
    pub shutdown: String,
    pub down: String,
    pub up: String,
}

impl Topics {
    pub fn new(prefix: &str, room_id: &str, device_id: &str) -> Self {
        let room = format!("{}/{}", prefix, room_id);
        Self {
            status: format!("{}/box", room),
            start: format!("{}/start", room),
            shutdown: format!("{}/shutdown", room),
            down: format!("{}/{}/down", room, device_id),
            up: format!("{}/{}/up", room, device_id),
        }
    }

    /// Topic a control message arrives on
    pub fn control(&self, control: Control) -> &str {
        match control {
            Control::Start => &self.start,
            Control::Shutdown => &self.shutdown,
            Control::Down => &self.down,
            Control::Up => &self.up,
        }
    }
}

/// A handheld device taking part in a room.
pub struct Session {
    device_id: String,
    client_id: String,
    config: SessionConfig,
    topics: Topics,
    classifier: MotionClassifier,
    client: MqttClient,
    controls: HashMap<Control, ControlCallback>,
    control_rx: Receiver<(Control, Vec<u8>)>,
    motion_rx: Receiver<DeviceStatus>,
    status_timer: Option<Receiver<Instant>>,
    tick_interval: Duration,
    statuses_sent: u64,
}

impl Session {
    /// Wire a classifier and a client over `link` for `device_id`.
    pub fn new(
        config: &AppConfig,
        device_id: impl Into<String>,
        link: Box<dyn BrokerLink>,
        grant: SensorGrant,
    ) -> Result<Self> {
        let device_id = device_id.into();
        let session = config.session.clone();
        let topics = Topics::new(&session.topic_prefix, &session.room_id, &device_id);

        let mut classifier = MotionClassifier::new(device_id.clone(), config.classifier, grant)?;
        let (motion_tx, motion_rx) = crossbeam_channel::unbounded();
        classifier.register_on_motion_changed(Box::new(move |status| {
            let _ = motion_tx.send(status.clone());
        }));

        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let mut client = MqttClient::new(link);
        let control_topics = topics.clone();
        client.register_on_connected(Box::new(move |client| {
            subscribe_controls(client, &control_topics, &control_tx);
        }));
        client.register_on_disconnected(Box::new(|_| {
            log::info!("Left the room");
        }));

        Ok(Self {
            client_id: config.broker.client_id(&device_id),
            device_id,
            config: session,
            topics,
            classifier,
            client,
            controls: HashMap::new(),
            control_rx,
            motion_rx,
            status_timer: None,
            tick_interval: Duration::from_secs_f64(1.0 / config.classifier.tick_hz),
            statuses_sent: 0,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn room_id(&self) -> &str {
        &self.config.room_id
    }

    /// MQTT client id announced to the broker
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn classifier(&self) -> &MotionClassifier {
        &self.classifier
    }

    pub fn client(&self) -> &MqttClient {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut MqttClient {
        &mut self.client
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.client.state()
    }

    /// Status messages handed to the client so far
    pub fn statuses_sent(&self) -> u64 {
        self.statuses_sent
    }

    pub fn on_start(&mut self, callback: ControlCallback) {
        self.controls.insert(Control::Start, callback);
    }

    pub fn on_shutdown(&mut self, callback: ControlCallback) {
        self.controls.insert(Control::Shutdown, callback);
    }

    pub fn on_down(&mut self, callback: ControlCallback) {
        self.controls.insert(Control::Down, callback);
    }

    pub fn on_up(&mut self, callback: ControlCallback) {
        self.controls.insert(Control::Up, callback);
    }

    /// Connect to the broker. Failures are logged; the link retries.
    pub fn connect(&mut self) {
        log::info!(
            "Joining room '{}' as '{}'",
            self.config.room_id,
            self.client_id
        );
        if let Err(e) = self.client.connect() {
            log::error!("Failed to start broker connection: {}", e);
        }
    }

    pub fn disconnect(&mut self) {
        self.client.disconnect();
    }

    /// Start (or restart) the periodic status sender. A zero interval is
    /// rejected and leaves any running sender untouched.
    pub fn start(&mut self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::InvalidParameter(
                "status interval must be positive".to_string(),
            ));
        }
        log::info!("Sending status every {:?}", interval);
        self.status_timer = Some(tick(interval));
        Ok(())
    }

    /// Cancel the periodic status sender.
    pub fn stop(&mut self) {
        if self.status_timer.take().is_some() {
            log::info!("Status sender stopped");
        }
    }

    pub fn is_sending_status(&self) -> bool {
        self.status_timer.is_some()
    }

    /// Publish the current status to the room (QoS 1, not retained).
    pub fn send_status(&mut self) {
        match self.classifier.status().to_json() {
            Ok(json) => {
                log::trace!("Status: {}", json);
                self.client
                    .send(self.topics.status.clone(), json, QoS::AtLeastOnce, false);
                self.statuses_sent += 1;
            }
            Err(e) => log::error!("Failed to encode status: {}", e),
        }
    }

    /// Apply a broker link event and run any control callbacks it caused.
    pub fn handle_link_event(&mut self, event: LinkEvent) {
        self.client.handle_event(event);
        self.dispatch_controls();
    }

    /// Feed one sensor event to the classifier.
    pub fn handle_sensor_event(&mut self, event: SensorEvent) {
        self.classifier.ingest(event);
    }

    /// Run one classifier update; a state change sends the status at once.
    pub fn tick(&mut self) {
        self.classifier.tick();
        while let Ok(status) = self.motion_rx.try_recv() {
            log::debug!(
                "Device is now {:?} / {:?}",
                status.movement,
                status.tilt
            );
            self.send_status();
        }
    }

    fn dispatch_controls(&mut self) {
        while let Ok((control, payload)) = self.control_rx.try_recv() {
            log::info!("Control message: {:?} ({} bytes)", control, payload.len());
            match self.controls.get_mut(&control) {
                Some(callback) => callback(&payload),
                None => log::debug!("No callback for {:?}", control),
            }
        }
    }

    /// Event loop. Returns when `running` clears or the link goes away.
    ///
    /// Disconnects from the broker on exit.
    pub fn run(
        &mut self,
        sensors: &Receiver<SensorEvent>,
        link_events: &Receiver<LinkEvent>,
        running: &AtomicBool,
    ) {
        if self.config.autostart
            && !self.is_sending_status()
            && let Err(e) = self.start(self.config.status_interval())
        {
            log::error!("Status sender not started: {}", e);
        }

        let ticker = tick(self.tick_interval);
        let closed_sensors = never();
        let mut sensors_open = true;

        log::info!("Session loop started");

        while running.load(Ordering::Relaxed) {
            let status_timer = self.status_timer.clone().unwrap_or_else(never);
            let sensor_rx = if sensors_open { sensors } else { &closed_sensors };
            let mut link_closed = false;

            select! {
                recv(link_events) -> event => match event {
                    Ok(event) => self.handle_link_event(event),
                    Err(_) => link_closed = true,
                },
                recv(sensor_rx) -> event => match event {
                    Ok(event) => self.handle_sensor_event(event),
                    Err(_) => {
                        log::info!("Sensor feed ended");
                        sensors_open = false;
                    }
                },
                recv(ticker) -> _ => self.tick(),
                recv(status_timer) -> _ => {
                    // stop() may have run earlier in this iteration
                    if self.is_sending_status() {
                        self.send_status();
                    }
                }
                default(IDLE_TIMEOUT) => {}
            }

            if link_closed {
                log::warn!("Broker link event channel closed");
                break;
            }
        }

        log::info!("Session loop stopped");
        self.stop();
        self.client.disconnect();
    }
}

fn subscribe_controls(
    client: &mut MqttClient,
    topics: &Topics,
    control_tx: &Sender<(Control, Vec<u8>)>,
) {
    for control in Control::ALL {
        let tx = control_tx.clone();
        client.subscribe(
            topics.control(control),
            Box::new(move |_, payload| {
                let _ = tx.send((control, payload.to_vec()));
            }),
        );
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device_id", &self.device_id)
            .field("room_id", &self.config.room_id)
            .field("client", &self.client)
            .field("sending_status", &self.is_sending_status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockLink;

    fn session() -> (Session, MockLink) {
        let link = MockLink::new();
        let session = Session::new(
            &AppConfig::default(),
            "dev1",
            Box::new(link.clone()),
            SensorGrant::all(),
        )
        .unwrap();
        (session, link)
    }

    #[test]
    fn test_topics() {
        let topics = Topics::new("sxm", "room_uuid", "dev1");
        assert_eq!(topics.status, "sxm/room_uuid/box");
        assert_eq!(topics.start, "sxm/room_uuid/start");
        assert_eq!(topics.shutdown, "sxm/room_uuid/shutdown");
        assert_eq!(topics.down, "sxm/room_uuid/dev1/down");
        assert_eq!(topics.up, "sxm/room_uuid/dev1/up");
        assert_eq!(topics.control(Control::Up), topics.up);
    }

    #[test]
    fn test_client_id() {
        let (session, _link) = session();
        assert_eq!(session.client_id(), "dev1_capore");
        assert_eq!(session.room_id(), "room_uuid");
    }

    #[test]
    fn test_start_stop() {
        let (mut session, _link) = session();
        assert!(!session.is_sending_status());
        session.start(Duration::from_millis(50)).unwrap();
        assert!(session.is_sending_status());
        session.stop();
        assert!(!session.is_sending_status());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let (mut session, _link) = session();
        assert!(matches!(
            session.start(Duration::ZERO),
            Err(Error::InvalidParameter(_))
        ));
        assert!(!session.is_sending_status());

        // A running sender survives a bad restart
        session.start(Duration::from_millis(50)).unwrap();
        assert!(session.start(Duration::ZERO).is_err());
        assert!(session.is_sending_status());
    }

    #[test]
    fn test_send_status_payload() {
        let (mut session, link) = session();
        session.connect();
        session.handle_link_event(LinkEvent::Connected);
        session.send_status();

        let published = link.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "sxm/room_uuid/box");
        assert_eq!(published[0].qos, QoS::AtLeastOnce);
        assert!(!published[0].retained);
        assert_eq!(
            String::from_utf8(published[0].payload.clone()).unwrap(),
            r#"{"device_id":"dev1","device_movement":"moving","device_tilt":"tilted"}"#
        );
    }

    #[test]
    fn test_missing_control_callback_is_ignored() {
        let (mut session, _link) = session();
        session.connect();
        session.handle_link_event(LinkEvent::Connected);
        session.handle_link_event(LinkEvent::Message {
            topic: "sxm/room_uuid/shutdown".to_string(),
            payload: b"bye".to_vec(),
        });
        assert_eq!(session.connection_state(), ConnectionState::Connected);
    }
}
