//! Sensor access as an explicit capability.
//!
//! Platforms may gate motion and orientation sensors behind a user prompt.
//! Negotiating that prompt is the host's job; the classifier only sees the
//! resulting [`SensorGrant`] and ignores events of kinds it was not granted.

use super::types::SensorEvent;

/// Sensor categories that are granted separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    /// Acceleration and rotation rate
    Motion,
    /// Absolute orientation angles
    Orientation,
}

impl SensorKind {
    /// Kind of sensor that produced `event`.
    pub fn of(event: &SensorEvent) -> Self {
        match event {
            SensorEvent::Motion { .. } => SensorKind::Motion,
            SensorEvent::Orientation(_) => SensorKind::Orientation,
        }
    }
}

/// Proof that the host obtained access to some sensor kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorGrant {
    motion: bool,
    orientation: bool,
}

impl SensorGrant {
    /// No access at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Access to every sensor kind.
    pub fn all() -> Self {
        Self {
            motion: true,
            orientation: true,
        }
    }

    /// Add access to `kind`.
    pub fn with(mut self, kind: SensorKind) -> Self {
        match kind {
            SensorKind::Motion => self.motion = true,
            SensorKind::Orientation => self.orientation = true,
        }
        self
    }

    /// True if `kind` may be consumed.
    pub fn allows(&self, kind: SensorKind) -> bool {
        match kind {
            SensorKind::Motion => self.motion,
            SensorKind::Orientation => self.orientation,
        }
    }

    /// True if at least one kind is granted.
    pub fn is_any(&self) -> bool {
        self.motion || self.orientation
    }
}

/// Host-side permission negotiation.
pub trait PermissionProvider {
    /// Ask for access to `kind`. Returns false when refused.
    fn request(&mut self, kind: SensorKind) -> bool;

    /// Request every kind and collect the result into a grant.
    fn request_all(&mut self) -> SensorGrant {
        let mut grant = SensorGrant::none();
        for kind in [SensorKind::Motion, SensorKind::Orientation] {
            if self.request(kind) {
                grant = grant.with(kind);
            } else {
                log::warn!("Sensor access refused: {:?}", kind);
            }
        }
        grant
    }
}

/// Provider for platforms without a permission prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantAll;

impl PermissionProvider for GrantAll {
    fn request(&mut self, _kind: SensorKind) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::types::OrientationReading;

    struct OrientationOnly;

    impl PermissionProvider for OrientationOnly {
        fn request(&mut self, kind: SensorKind) -> bool {
            kind == SensorKind::Orientation
        }
    }

    #[test]
    fn test_grant_all() {
        let grant = GrantAll.request_all();
        assert_eq!(grant, SensorGrant::all());
        assert!(grant.allows(SensorKind::Motion));
        assert!(grant.allows(SensorKind::Orientation));
    }

    #[test]
    fn test_partial_grant() {
        let grant = OrientationOnly.request_all();
        assert!(grant.is_any());
        assert!(!grant.allows(SensorKind::Motion));
        assert!(grant.allows(SensorKind::Orientation));
        assert!(!SensorGrant::none().is_any());
    }

    #[test]
    fn test_kind_of_event() {
        let event = SensorEvent::Orientation(OrientationReading::default());
        assert_eq!(SensorKind::of(&event), SensorKind::Orientation);
        let event = SensorEvent::Motion {
            acceleration: None,
            rotation_rate: None,
        };
        assert_eq!(SensorKind::of(&event), SensorKind::Motion);
    }
}
