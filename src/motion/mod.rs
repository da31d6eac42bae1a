//! Device motion: sensor samples, permission grants and the motion/tilt
//! classifier.

pub mod classifier;
pub mod permission;
pub mod sim;
pub mod types;

pub use classifier::{ClassifierConfig, MotionCallback, MotionClassifier, ObserverId};
pub use permission::{GrantAll, PermissionProvider, SensorGrant, SensorKind};
pub use sim::{HandheldSimulator, SimulationConfig};
pub use types::{
    Acceleration, DeviceStatus, MotionSample, Movement, Orientation, OrientationReading,
    RotationRate, SensorEvent, Tilt,
};
