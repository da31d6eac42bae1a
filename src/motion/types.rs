//! Sensor sample and device status types.
//!
//! ## Conventions
//!
//! Samples follow the W3C DeviceMotion/DeviceOrientation conventions used by
//! handheld browsers:
//! - **Acceleration**: m/s² excluding gravity, device frame (x, y, z)
//! - **Rotation rate**: deg/s around the alpha (z), beta (x), gamma (y) axes
//! - **Orientation**: degrees; beta ∈ [-180, 180) front/back, gamma ∈ [-90, 90)
//!   left/right, alpha ∈ [0, 360) compass
//!
//! Every field may be missing on a given platform. Missing values are
//! neutral (0.0) for classification.

use serde::{Deserialize, Serialize};

/// Linear acceleration sample (m/s²)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Acceleration {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl Acceleration {
    /// Sample with every axis present.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: Some(z),
        }
    }

    /// Axes as an array, missing values as 0.0.
    pub fn to_array(&self) -> [f64; 3] {
        [
            self.x.unwrap_or(0.0),
            self.y.unwrap_or(0.0),
            self.z.unwrap_or(0.0),
        ]
    }

    /// Largest absolute axis value.
    pub fn max_abs(&self) -> f64 {
        max_abs(self.to_array())
    }

    /// Same sample with NaN and infinite axes treated as missing.
    pub fn finite_only(self) -> Self {
        Self {
            x: finite(self.x),
            y: finite(self.y),
            z: finite(self.z),
        }
    }
}

/// Angular velocity sample (deg/s)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RotationRate {
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub gamma: Option<f64>,
}

impl RotationRate {
    /// Sample with every axis present.
    pub fn new(alpha: f64, beta: f64, gamma: f64) -> Self {
        Self {
            alpha: Some(alpha),
            beta: Some(beta),
            gamma: Some(gamma),
        }
    }

    /// Axes as an array, missing values as 0.0.
    pub fn to_array(&self) -> [f64; 3] {
        [
            self.alpha.unwrap_or(0.0),
            self.beta.unwrap_or(0.0),
            self.gamma.unwrap_or(0.0),
        ]
    }

    /// Largest absolute axis value.
    pub fn max_abs(&self) -> f64 {
        max_abs(self.to_array())
    }

    /// Same sample with NaN and infinite axes treated as missing.
    pub fn finite_only(self) -> Self {
        Self {
            alpha: finite(self.alpha),
            beta: finite(self.beta),
            gamma: finite(self.gamma),
        }
    }
}

/// Absolute orientation reading (degrees). Missing angles leave the
/// previously known angle in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OrientationReading {
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub gamma: Option<f64>,
}

impl OrientationReading {
    pub fn new(alpha: f64, beta: f64, gamma: f64) -> Self {
        Self {
            alpha: Some(alpha),
            beta: Some(beta),
            gamma: Some(gamma),
        }
    }
}

/// Last known device orientation (degrees)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Orientation {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

/// One event from the platform sensor feed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorEvent {
    /// Devicemotion event. Either part may be absent; an absent part
    /// replaces the previous sample.
    Motion {
        acceleration: Option<Acceleration>,
        rotation_rate: Option<RotationRate>,
    },
    /// Deviceorientation event.
    Orientation(OrientationReading),
}

/// Snapshot of everything the classifier has been fed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionSample {
    pub acceleration: Option<Acceleration>,
    pub rotation_rate: Option<RotationRate>,
    pub orientation: Orientation,
}

/// Movement classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Movement {
    Moving,
    Stationary,
}

impl Movement {
    pub fn from_moving(moving: bool) -> Self {
        if moving {
            Movement::Moving
        } else {
            Movement::Stationary
        }
    }
}

/// Tilt classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tilt {
    Tilted,
    Horizontal,
}

impl Tilt {
    pub fn from_tilted(tilted: bool) -> Self {
        if tilted { Tilt::Tilted } else { Tilt::Horizontal }
    }
}

/// Device status as published to the shared surface.
///
/// Wire format (JSON):
/// ```json
/// {"device_id":"…","device_movement":"moving","device_tilt":"horizontal"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device_id: String,
    #[serde(rename = "device_movement")]
    pub movement: Movement,
    #[serde(rename = "device_tilt")]
    pub tilt: Tilt,
}

impl DeviceStatus {
    /// Serialize to the JSON wire format.
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[inline]
fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

fn max_abs(values: [f64; 3]) -> f64 {
    values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
}
