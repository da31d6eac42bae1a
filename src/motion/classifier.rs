//! Motion and tilt classification with edge-triggered notifications.
//!
//! The classifier latches two booleans on every [`MotionClassifier::tick`]:
//!
//! | Flag    | True when                                                      |
//! |---------|----------------------------------------------------------------|
//! | tilted  | `max(|beta|, |gamma|) > tilt_angle_threshold_deg`              |
//! | moving  | `max|accel| > accel_threshold` or `max|rate| > rotation_threshold` |
//!
//! `moving` stays false while either the acceleration or the rotation-rate
//! sample is absent.
//!
//! # Notification rule
//!
//! Observers fire when
//!
//! ```text
//! (!tilted && moving != last_moving) || (!moving && tilted != last_tilted)
//! ```
//!
//! A movement change is only reported while the device lies flat, and a
//! tilt change only while it is still. A tick that flips both flags at once
//! reports nothing.
//!
//! # Scheduling
//!
//! The classifier owns no timer. The host calls `tick()` at roughly
//! [`ClassifierConfig::tick_hz`] (60 Hz) and feeds sensor events in between.

use super::permission::{SensorGrant, SensorKind};
use super::types::{
    Acceleration, DeviceStatus, MotionSample, Movement, Orientation, RotationRate, SensorEvent,
    Tilt,
};
use crate::error::{Error, Result};
use crate::filter::{FilterConfig, VectorFilter};
use serde::{Deserialize, Serialize};

/// Configuration for [`MotionClassifier`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Orientation angle above which the device counts as tilted (degrees)
    pub tilt_angle_threshold_deg: f64,

    /// Acceleration above which the device counts as moving (m/s²)
    pub accel_threshold: f64,

    /// Rotation rate above which the device counts as moving (deg/s)
    pub rotation_threshold: f64,

    /// Rate at which the host is expected to call `tick()` (Hz)
    pub tick_hz: f64,

    /// Optional one-euro smoothing of acceleration and rotation rate
    /// before thresholding
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothing: Option<FilterConfig>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            tilt_angle_threshold_deg: 5.0,
            accel_threshold: 1.0,
            rotation_threshold: 2.0,
            tick_hz: 60.0,
            smoothing: None,
        }
    }
}

impl ClassifierConfig {
    /// Check thresholds are non-negative and the tick rate is positive.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("tilt_angle_threshold_deg", self.tilt_angle_threshold_deg),
            ("accel_threshold", self.accel_threshold),
            ("rotation_threshold", self.rotation_threshold),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(Error::InvalidParameter(format!(
                    "{} must be >= 0, got {}",
                    name, value
                )));
            }
        }
        if !(self.tick_hz > 0.0 && self.tick_hz.is_finite()) {
            return Err(Error::InvalidParameter(format!(
                "tick_hz must be > 0, got {}",
                self.tick_hz
            )));
        }
        if let Some(smoothing) = &self.smoothing {
            smoothing.validate()?;
        }
        Ok(())
    }
}

/// Callback invoked with the new status when the notification rule fires.
pub type MotionCallback = Box<dyn FnMut(&DeviceStatus)>;

/// Handle returned by [`MotionClassifier::register_on_motion_changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

struct Smoothing {
    acceleration: VectorFilter,
    rotation_rate: VectorFilter,
}

/// Hysteretic moving/tilted classifier for a handheld device.
pub struct MotionClassifier {
    config: ClassifierConfig,
    grant: SensorGrant,
    orientation: Orientation,
    acceleration: Option<Acceleration>,
    rotation_rate: Option<RotationRate>,
    smoothing: Option<Smoothing>,
    current_moving: bool,
    last_moving: bool,
    current_tilted: bool,
    last_tilted: bool,
    observers: Vec<(ObserverId, MotionCallback)>,
    next_observer: u64,
    status: DeviceStatus,
}

impl MotionClassifier {
    /// Create a classifier for `device_id` that accepts events allowed by `grant`.
    ///
    /// Both flags start latched true, so the first tick on a still, flat
    /// device reports the change to stationary/horizontal.
    pub fn new(
        device_id: impl Into<String>,
        config: ClassifierConfig,
        grant: SensorGrant,
    ) -> Result<Self> {
        config.validate()?;

        let smoothing = match config.smoothing {
            Some(filter) => Some(Smoothing {
                acceleration: VectorFilter::new(filter)?,
                rotation_rate: VectorFilter::new(filter)?,
            }),
            None => None,
        };

        if !grant.is_any() {
            log::warn!("Motion classifier created without sensor access; device reads as still");
        }

        Ok(Self {
            config,
            grant,
            orientation: Orientation::default(),
            acceleration: None,
            rotation_rate: None,
            smoothing,
            current_moving: true,
            last_moving: true,
            current_tilted: true,
            last_tilted: true,
            observers: Vec::new(),
            next_observer: 0,
            status: DeviceStatus {
                device_id: device_id.into(),
                movement: Movement::Moving,
                tilt: Tilt::Tilted,
            },
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Latched movement flag from the last tick.
    pub fn is_moving(&self) -> bool {
        self.current_moving
    }

    /// Latched tilt flag from the last tick.
    pub fn is_tilted(&self) -> bool {
        self.current_tilted
    }

    /// Status snapshot published by the last tick.
    pub fn status(&self) -> &DeviceStatus {
        &self.status
    }

    /// Everything the classifier currently knows about the device.
    pub fn sample(&self) -> MotionSample {
        MotionSample {
            acceleration: self.acceleration,
            rotation_rate: self.rotation_rate,
            orientation: self.orientation,
        }
    }

    /// Add an observer. Observers are independent; their call order carries
    /// no meaning.
    pub fn register_on_motion_changed(&mut self, callback: MotionCallback) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, callback));
        id
    }

    /// Remove an observer. Returns false if it was not registered.
    pub fn unregister(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer, _)| *observer != id);
        self.observers.len() != before
    }

    /// Feed one sensor event. Events of kinds not covered by the grant are
    /// dropped.
    pub fn ingest(&mut self, event: SensorEvent) {
        if !self.grant.allows(SensorKind::of(&event)) {
            log::trace!("Dropping {:?} event: no sensor grant", SensorKind::of(&event));
            return;
        }

        match event {
            SensorEvent::Motion {
                acceleration,
                rotation_rate,
            } => {
                // Malformed readings are neutral input
                self.acceleration = acceleration.map(Acceleration::finite_only);
                self.rotation_rate = rotation_rate.map(RotationRate::finite_only);
                if let Some(smoothing) = &mut self.smoothing {
                    if let Some(accel) = &mut self.acceleration {
                        let [x, y, z] = smoothing.acceleration.filter(accel.to_array(), None);
                        *accel = Acceleration::new(x, y, z);
                    }
                    if let Some(rate) = &mut self.rotation_rate {
                        let [a, b, g] = smoothing.rotation_rate.filter(rate.to_array(), None);
                        *rate = RotationRate::new(a, b, g);
                    }
                }
            }
            SensorEvent::Orientation(reading) => {
                if let Some(alpha) = reading.alpha.filter(|a| a.is_finite()) {
                    self.orientation.alpha = alpha;
                }
                if let Some(beta) = reading.beta.filter(|b| b.is_finite()) {
                    self.orientation.beta = beta;
                }
                if let Some(gamma) = reading.gamma.filter(|g| g.is_finite()) {
                    self.orientation.gamma = gamma;
                }
            }
        }
    }

    /// Run one classification step.
    ///
    /// Returns true if observers were notified.
    pub fn tick(&mut self) -> bool {
        self.last_moving = self.current_moving;
        self.last_tilted = self.current_tilted;

        self.current_tilted = self.compute_tilted();
        self.current_moving = self.compute_moving();

        let status = DeviceStatus {
            device_id: self.status.device_id.clone(),
            movement: Movement::from_moving(self.current_moving),
            tilt: Tilt::from_tilted(self.current_tilted),
        };

        let notify = (!self.current_tilted && self.current_moving != self.last_moving)
            || (!self.current_moving && self.current_tilted != self.last_tilted);

        if notify {
            log::debug!(
                "Device state changed: {:?}/{:?}",
                status.movement,
                status.tilt
            );
            for (_, callback) in &mut self.observers {
                callback(&status);
            }
        }

        self.status = status;
        notify
    }

    fn compute_tilted(&self) -> bool {
        self.orientation.beta.abs().max(self.orientation.gamma.abs())
            > self.config.tilt_angle_threshold_deg
    }

    fn compute_moving(&self) -> bool {
        let (Some(accel), Some(rate)) = (&self.acceleration, &self.rotation_rate) else {
            return false;
        };
        accel.max_abs() > self.config.accel_threshold
            || rate.max_abs() > self.config.rotation_threshold
    }
}

impl std::fmt::Debug for MotionClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionClassifier")
            .field("config", &self.config)
            .field("grant", &self.grant)
            .field("moving", &self.current_moving)
            .field("tilted", &self.current_tilted)
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::types::OrientationReading;
    use std::cell::Cell;
    use std::rc::Rc;

    fn classifier() -> MotionClassifier {
        MotionClassifier::new("dev-1", ClassifierConfig::default(), SensorGrant::all()).unwrap()
    }

    /// Register a counting observer.
    fn counter(c: &mut MotionClassifier) -> Rc<Cell<u32>> {
        let count = Rc::new(Cell::new(0));
        let handle = Rc::clone(&count);
        c.register_on_motion_changed(Box::new(move |_| handle.set(handle.get() + 1)));
        count
    }

    fn tilt(c: &mut MotionClassifier, beta: f64, gamma: f64) {
        c.ingest(SensorEvent::Orientation(OrientationReading {
            alpha: None,
            beta: Some(beta),
            gamma: Some(gamma),
        }));
    }

    fn motion(c: &mut MotionClassifier, accel: f64, rate: f64) {
        c.ingest(SensorEvent::Motion {
            acceleration: Some(Acceleration::new(accel, 0.0, 0.0)),
            rotation_rate: Some(RotationRate::new(0.0, rate, 0.0)),
        });
    }

    /// Tick once from the initial state to reach (flat, still).
    fn settle_flat_still(c: &mut MotionClassifier) {
        tilt(c, 0.0, 0.0);
        motion(c, 0.0, 0.0);
        c.tick();
        assert!(!c.is_moving());
        assert!(!c.is_tilted());
    }

    #[test]
    fn test_initial_status_is_moving_tilted() {
        let c = classifier();
        assert!(c.is_moving());
        assert!(c.is_tilted());
        assert_eq!(c.status().movement, Movement::Moving);
        assert_eq!(c.status().tilt, Tilt::Tilted);
        assert_eq!(c.status().device_id, "dev-1");
    }

    #[test]
    fn test_tilted_without_acceleration_never_notifies() {
        let mut c = classifier();
        let count = counter(&mut c);
        tilt(&mut c, 10.0, 0.0);

        for _ in 0..100 {
            assert!(!c.tick());
            assert!(c.is_tilted());
            assert!(!c.is_moving());
        }
        assert_eq!(count.get(), 0);
        assert_eq!(c.status().tilt, Tilt::Tilted);
        assert_eq!(c.status().movement, Movement::Stationary);
    }

    #[test]
    fn test_start_moving_while_flat_notifies_once() {
        let mut c = classifier();
        settle_flat_still(&mut c);
        let count = counter(&mut c);

        motion(&mut c, 3.0, 0.0);
        assert!(c.tick());
        assert_eq!(count.get(), 1);
        assert_eq!(c.status().movement, Movement::Moving);

        // Steady motion: no further edge
        for _ in 0..10 {
            c.tick();
        }
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_simultaneous_change_is_suppressed() {
        let mut c = classifier();
        settle_flat_still(&mut c);
        let count = counter(&mut c);

        tilt(&mut c, 30.0, 0.0);
        motion(&mut c, 0.0, 10.0);
        assert!(!c.tick());
        assert_eq!(count.get(), 0);

        // Status snapshot still follows the flags
        assert_eq!(c.status().movement, Movement::Moving);
        assert_eq!(c.status().tilt, Tilt::Tilted);
    }

    #[test]
    fn test_tilt_change_reported_only_when_still() {
        let mut c = classifier();
        settle_flat_still(&mut c);
        let count = counter(&mut c);

        // Still device tilted up: reported
        tilt(&mut c, 0.0, -12.0);
        assert!(c.tick());
        assert_eq!(count.get(), 1);

        // Start moving while tilted: not reported (moving change gated by !tilted)
        motion(&mut c, 5.0, 0.0);
        assert!(!c.tick());
        assert_eq!(count.get(), 1);

        // Lay flat while moving: not reported either (tilt change gated by !moving)
        tilt(&mut c, 0.0, 0.0);
        assert!(!c.tick());
        assert_eq!(count.get(), 1);

        // Stop while flat: reported
        motion(&mut c, 0.0, 0.0);
        assert!(c.tick());
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn test_moving_requires_both_samples() {
        let mut c = classifier();
        c.ingest(SensorEvent::Motion {
            acceleration: Some(Acceleration::new(50.0, 50.0, 50.0)),
            rotation_rate: None,
        });
        c.tick();
        assert!(!c.is_moving());

        motion(&mut c, 50.0, 0.0);
        c.tick();
        assert!(c.is_moving());
    }

    #[test]
    fn test_rotation_alone_counts_as_moving() {
        let mut c = classifier();
        settle_flat_still(&mut c);
        motion(&mut c, 0.5, 2.5);
        c.tick();
        assert!(c.is_moving());
    }

    #[test]
    fn test_thresholds_are_strict() {
        let mut c = classifier();
        tilt(&mut c, 5.0, -5.0);
        motion(&mut c, 1.0, 2.0);
        c.tick();
        assert!(!c.is_tilted());
        assert!(!c.is_moving());
    }

    #[test]
    fn test_partial_orientation_keeps_known_angles() {
        let mut c = classifier();
        tilt(&mut c, 20.0, 0.0);
        c.ingest(SensorEvent::Orientation(OrientationReading {
            alpha: Some(90.0),
            beta: None,
            gamma: None,
        }));
        let sample = c.sample();
        assert_eq!(sample.orientation.alpha, 90.0);
        assert_eq!(sample.orientation.beta, 20.0);
        c.tick();
        assert!(c.is_tilted());
    }

    #[test]
    fn test_events_without_grant_are_ignored() {
        let grant = SensorGrant::none().with(SensorKind::Orientation);
        let mut c = MotionClassifier::new("dev", ClassifierConfig::default(), grant).unwrap();
        motion(&mut c, 9.0, 9.0);
        c.tick();
        assert!(!c.is_moving());
        assert!(c.sample().acceleration.is_none());
    }

    #[test]
    fn test_observer_receives_new_status() {
        let mut c = classifier();
        settle_flat_still(&mut c);

        let seen = Rc::new(Cell::new(None));
        let handle = Rc::clone(&seen);
        c.register_on_motion_changed(Box::new(move |status| handle.set(Some(status.movement))));

        motion(&mut c, 2.0, 0.0);
        c.tick();
        assert_eq!(seen.get(), Some(Movement::Moving));
    }

    #[test]
    fn test_unregister_observer() {
        let mut c = classifier();
        let count = Rc::new(Cell::new(0));
        let handle = Rc::clone(&count);
        let id = c.register_on_motion_changed(Box::new(move |_| handle.set(handle.get() + 1)));
        assert!(c.unregister(id));
        assert!(!c.unregister(id));

        settle_flat_still(&mut c);
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_smoothing_damps_single_spike() {
        let config = ClassifierConfig {
            smoothing: Some(FilterConfig::with_frequency(60.0)),
            ..Default::default()
        };
        let mut c = MotionClassifier::new("dev", config, SensorGrant::all()).unwrap();
        motion(&mut c, 0.0, 0.0);
        c.tick();

        // A one-sample 5 m/s² spike is smoothed below the 1.0 threshold
        motion(&mut c, 5.0, 0.0);
        c.tick();
        assert!(!c.is_moving());
    }

    #[test]
    fn test_smoothing_survives_non_finite_samples() {
        let config = ClassifierConfig {
            smoothing: Some(FilterConfig::with_frequency(60.0)),
            ..Default::default()
        };
        let mut c = MotionClassifier::new("dev", config, SensorGrant::all()).unwrap();
        motion(&mut c, 0.0, 0.0);
        c.tick();

        motion(&mut c, f64::NAN, 0.0);
        c.tick();
        motion(&mut c, f64::INFINITY, f64::NEG_INFINITY);
        c.tick();
        assert!(!c.is_moving());
        let accel = c.sample().acceleration.unwrap();
        assert!(accel.to_array().iter().all(|v| v.is_finite()));

        // Sustained real motion still gets through the smoothing stage
        for _ in 0..200 {
            motion(&mut c, 50.0, 0.0);
            c.tick();
        }
        assert!(c.is_moving());
    }

    #[test]
    fn test_non_finite_orientation_keeps_last_angle() {
        let mut c = classifier();
        tilt(&mut c, 0.0, 0.0);
        tilt(&mut c, f64::INFINITY, f64::NAN);
        c.tick();
        assert!(!c.is_tilted());
        assert_eq!(c.sample().orientation.beta, 0.0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ClassifierConfig {
            tick_hz: 0.0,
            ..Default::default()
        };
        assert!(MotionClassifier::new("dev", config, SensorGrant::all()).is_err());

        let config = ClassifierConfig {
            accel_threshold: -1.0,
            ..Default::default()
        };
        assert!(MotionClassifier::new("dev", config, SensorGrant::all()).is_err());
    }
}
