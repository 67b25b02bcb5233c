// Message types for the drive runtime

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::drive::{DriveMode, WheelTargets, WHEEL_COUNT};

// Command frame from teleop/mission control -> runtime, as it appears on the bus
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CommandFrame {
    pub forward_vel: f32,
    pub turn_rate: f32,
}

/// Rover velocity command stamped with its arrival time
///
/// This is the snapshot the drive core reads each cycle. It is `Copy` so a read
/// always yields a whole command, never fields from two different frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityCommand {
    /// Forward velocity in m/s (positive = forward)
    pub forward_velocity: f32,
    /// Turn rate in rad/s (positive = counter-clockwise)
    pub turn_rate: f32,
    /// Monotonic arrival time
    pub timestamp: Instant,
}

impl VelocityCommand {
    pub fn new(forward_velocity: f32, turn_rate: f32, timestamp: Instant) -> Self {
        Self {
            forward_velocity,
            turn_rate,
            timestamp,
        }
    }

    pub fn from_frame(frame: CommandFrame, timestamp: Instant) -> Self {
        Self::new(frame.forward_vel, frame.turn_rate, timestamp)
    }

    /// Both components are usable numbers
    pub fn is_finite(&self) -> bool {
        self.forward_velocity.is_finite() && self.turn_rate.is_finite()
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriveHealth {
    Ok,
    CmdStale,
    CmdInvalid,
}

// Wheel targets actually sent this cycle, runtime -> telemetry
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WheelTelemetry {
    pub mode: DriveMode,
    pub targets: WheelTargets,
    /// Wheels whose last write failed, in target order
    pub faulted: [bool; WHEEL_COUNT],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_frame() {
        let frame: CommandFrame =
            serde_json::from_str(r#"{"forward_vel": 0.5, "turn_rate": -0.25}"#).unwrap();
        assert_eq!(frame.forward_vel, 0.5);
        assert_eq!(frame.turn_rate, -0.25);
    }

    #[test]
    fn test_frame_missing_field_rejected() {
        let parsed = serde_json::from_str::<CommandFrame>(r#"{"forward_vel": 0.5}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_health_serialization() {
        assert_eq!(serde_json::to_string(&DriveHealth::Ok).unwrap(), "\"ok\"");
        assert_eq!(
            serde_json::to_string(&DriveHealth::CmdStale).unwrap(),
            "\"cmd_stale\""
        );
        assert_eq!(
            serde_json::to_string(&DriveHealth::CmdInvalid).unwrap(),
            "\"cmd_invalid\""
        );
    }

    #[test]
    fn test_telemetry_serialization() {
        let telemetry = WheelTelemetry {
            mode: DriveMode::Normal,
            targets: WheelTargets::from_sides(-0.5, 0.5),
            faulted: [false, false, false, false, true, false],
        };
        let json = serde_json::to_string(&telemetry).unwrap();
        assert_eq!(
            json,
            r#"{"mode":"normal","targets":[-0.5,-0.5,-0.5,0.5,0.5,0.5],"faulted":[false,false,false,false,true,false]}"#
        );
    }

    #[test]
    fn test_non_finite_command() {
        let now = Instant::now();
        assert!(VelocityCommand::new(1.0, 0.0, now).is_finite());
        assert!(!VelocityCommand::new(f32::NAN, 0.0, now).is_finite());
        assert!(!VelocityCommand::new(0.0, f32::NEG_INFINITY, now).is_finite());
    }
}
