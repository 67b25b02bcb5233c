// Skid-steer distribution for the six-wheel rover
// Maps a (forward, turn) body command to one velocity per wheel position.
// Pure functions only: no bus, no clock, no actuators.

use serde::Serialize;

use crate::messages::VelocityCommand;

/// Number of driven wheels
pub const WHEEL_COUNT: usize = 6;

/// Wheel positions in target order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WheelPosition {
    FrontLeft,
    MidLeft,
    RearLeft,
    FrontRight,
    MidRight,
    RearRight,
}

impl WheelPosition {
    pub const ALL: [WheelPosition; WHEEL_COUNT] = [
        WheelPosition::FrontLeft,
        WheelPosition::MidLeft,
        WheelPosition::RearLeft,
        WheelPosition::FrontRight,
        WheelPosition::MidRight,
        WheelPosition::RearRight,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_left(self) -> bool {
        matches!(
            self,
            WheelPosition::FrontLeft | WheelPosition::MidLeft | WheelPosition::RearLeft
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            WheelPosition::FrontLeft => "front-left",
            WheelPosition::MidLeft => "mid-left",
            WheelPosition::RearLeft => "rear-left",
            WheelPosition::FrontRight => "front-right",
            WheelPosition::MidRight => "mid-right",
            WheelPosition::RearRight => "rear-right",
        }
    }
}

/// Geometry and limits used by the distribution function
#[derive(Debug, Clone, Copy)]
pub struct DriveGeometry {
    /// Lateral distance between left and right wheel contact lines (m)
    pub track_width: f32,
    /// Absolute limit on any wheel target (m/s)
    pub max_wheel_velocity: f32,
}

/// Per-wheel velocity targets (m/s), indexed by `WheelPosition`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct WheelTargets([f32; WHEEL_COUNT]);

impl WheelTargets {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Same velocity on every wheel of a side
    pub fn from_sides(left: f32, right: f32) -> Self {
        Self([left, left, left, right, right, right])
    }

    pub fn as_array(&self) -> [f32; WHEEL_COUNT] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&v| v == 0.0)
    }

    /// Iterate `(position, velocity)` pairs in target order
    pub fn iter(&self) -> impl Iterator<Item = (WheelPosition, f32)> + '_ {
        WheelPosition::ALL.iter().map(move |&p| (p, self.0[p.index()]))
    }
}

/// Clamp to [-limit, limit]
///
/// NaN collapses to zero. A NaN or negative limit (rejected by
/// `DriveConfig::validate`) leaves the wheel stopped.
pub fn clamp_velocity(velocity: f64, limit: f32) -> f32 {
    if velocity.is_nan() || limit.is_nan() || limit < 0.0 {
        return 0.0;
    }
    let limit = f64::from(limit);
    velocity.clamp(-limit, limit) as f32
}

/// Raw per-side velocities before clamping, as `(left, right)`
///
/// Computed in f64 so finite f32 inputs cannot overflow.
pub fn side_velocities(forward: f32, turn_rate: f32, track_width: f32) -> (f64, f64) {
    let offset = f64::from(turn_rate) * (f64::from(track_width) / 2.0);
    let forward = f64::from(forward);
    (forward - offset, forward + offset)
}

/// Distribute a body command onto the six wheels
///
/// Positive turn rate is counter-clockwise: the left side slows and the right
/// side speeds up. Every target is clamped to `max_wheel_velocity`. If either
/// side is not a number, both sides stop.
pub fn skid_steer(command: &VelocityCommand, geometry: &DriveGeometry) -> WheelTargets {
    let (left, right) = side_velocities(
        command.forward_velocity,
        command.turn_rate,
        geometry.track_width,
    );
    if left.is_nan() || right.is_nan() {
        return WheelTargets::zero();
    }
    let limit = geometry.max_wheel_velocity;
    WheelTargets::from_sides(clamp_velocity(left, limit), clamp_velocity(right, limit))
}
