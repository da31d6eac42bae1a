//! Simulated handheld sensor feed.
//!
//! Scripts a phone that is repeatedly picked up from the table, held at an
//! angle, and laid down again. Gaussian noise is added to every channel.
//!
//! ```text
//! phase:   0: flat      1: lifting     2: held       3: lowering
//! accel:   ~0           ~3 m/s²        ~0            ~3 m/s²
//! rate:    ~0           +30 deg/s      ~0            -30 deg/s
//! beta:    ~0           0 → 35°        35°           35° → 0
//! ```
//!
//! Used by the demo binary and by tests; the real feed comes from the host
//! platform.

use super::types::{Acceleration, OrientationReading, RotationRate, SensorEvent};
use rand::prelude::*;
use rand::rngs::SmallRng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Simulation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// RNG seed (0 = random)
    pub seed: u64,
    /// Accelerometer noise standard deviation (m/s²)
    pub accel_noise: f64,
    /// Gyroscope noise standard deviation (deg/s)
    pub rotation_noise: f64,
    /// Orientation noise standard deviation (degrees)
    pub orientation_noise: f64,
    /// Duration of each scripted phase (seconds)
    pub phase_secs: f64,
    /// Sensor event rate (Hz)
    pub rate_hz: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            accel_noise: 0.1,
            rotation_noise: 0.3,
            orientation_noise: 0.5,
            phase_secs: 2.0,
            rate_hz: 60.0,
        }
    }
}

/// Scripted device posture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Flat,
    Lifting,
    Held,
    Lowering,
}

/// Pitch while held (degrees)
const HELD_PITCH_DEG: f64 = 35.0;

/// Acceleration while lifting or lowering (m/s²)
const HANDLING_ACCEL: f64 = 3.0;

/// Rotation rate while lifting or lowering (deg/s)
const HANDLING_RATE: f64 = 30.0;

/// Gaussian noise source with deterministic seeding
#[derive(Clone)]
pub struct NoiseGenerator {
    rng: SmallRng,
}

impl NoiseGenerator {
    /// Seed 0 draws from entropy; any other seed is reproducible.
    pub fn new(seed: u64) -> Self {
        let rng = if seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(seed)
        };
        Self { rng }
    }

    /// Zero-mean Gaussian sample with the given standard deviation.
    #[inline]
    pub fn gaussian(&mut self, stddev: f64) -> f64 {
        if stddev == 0.0 {
            return 0.0;
        }
        let n: f64 = self.rng.sample(StandardNormal);
        n * stddev
    }
}

/// Generates motion and orientation events for a scripted handheld device.
pub struct HandheldSimulator {
    config: SimulationConfig,
    noise: NoiseGenerator,
}

impl HandheldSimulator {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            noise: NoiseGenerator::new(config.seed),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Phase active at `t` seconds.
    pub fn phase_at(&self, t: f64) -> Phase {
        let index = (t.max(0.0) / self.config.phase_secs) as u64 % 4;
        match index {
            0 => Phase::Flat,
            1 => Phase::Lifting,
            2 => Phase::Held,
            _ => Phase::Lowering,
        }
    }

    /// Motion and orientation events for time `t` (seconds).
    pub fn generate(&mut self, t: f64) -> [SensorEvent; 2] {
        let phase = self.phase_at(t);
        let progress = (t.max(0.0) % self.config.phase_secs) / self.config.phase_secs;

        let (accel_z, rate_beta, pitch) = match phase {
            Phase::Flat => (0.0, 0.0, 0.0),
            Phase::Lifting => (HANDLING_ACCEL, HANDLING_RATE, HELD_PITCH_DEG * progress),
            Phase::Held => (0.0, 0.0, HELD_PITCH_DEG),
            Phase::Lowering => (
                HANDLING_ACCEL,
                -HANDLING_RATE,
                HELD_PITCH_DEG * (1.0 - progress),
            ),
        };

        let a = self.config.accel_noise;
        let r = self.config.rotation_noise;
        let o = self.config.orientation_noise;

        let motion = SensorEvent::Motion {
            acceleration: Some(Acceleration::new(
                self.noise.gaussian(a),
                self.noise.gaussian(a),
                accel_z + self.noise.gaussian(a),
            )),
            rotation_rate: Some(RotationRate::new(
                self.noise.gaussian(r),
                rate_beta + self.noise.gaussian(r),
                self.noise.gaussian(r),
            )),
        };
        let orientation = SensorEvent::Orientation(OrientationReading::new(
            self.noise.gaussian(o).rem_euclid(360.0),
            pitch + self.noise.gaussian(o),
            self.noise.gaussian(o),
        ));

        [motion, orientation]
    }
}
