// Timeouts, topics, drive geometry and motor configuration
//
// Every value has a default so the runtime starts without a config file; a JSON
// file given with --config overrides any subset of them.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::drive::{DriveGeometry, DriveParams, WHEEL_COUNT};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Command timeout for watchdog
pub const STALE_COMMAND_MS: u64 = 200;

// Zenoh topics
pub const TOPIC_CMD_DRIVE: &str = "rover/cmd/drive"; // commands
pub const TOPIC_RT_WHEELS: &str = "rover/rt/wheels"; // actuation
pub const TOPIC_HEALTH: &str = "rover/state/health"; // health status

// Serial port for the wheel servo bus
pub const MOTOR_PORT: &str = "/dev/ttyUSB0";
pub const MOTOR_BAUDRATE: u32 = 1_000_000;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub loop_hz: u64,
    pub drive: DriveConfig,
    pub topics: TopicConfig,
    pub motor: MotorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Distance between left and right wheel contact lines (m)
    pub track_width: f32,
    /// Limit on any single wheel target (m/s)
    pub max_wheel_velocity: f32,
    /// Commands older than this are ignored (ms)
    pub stale_command_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub command: String,
    pub wheels: String,
    pub health: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorConfig {
    /// Drive real servos; when false wheels are simulated
    pub enabled: bool,
    pub port: String,
    pub baudrate: u32,
    /// Servo IDs in wheel position order (FL, ML, RL, FR, MR, RR)
    pub ids: [u8; WHEEL_COUNT],
    /// Reverse the servo direction for mirrored wheels
    pub inverted: [bool; WHEEL_COUNT],
    /// Wheel radius (m)
    pub wheel_radius: f32,
    /// Safety limit on the raw velocity register
    pub max_raw: i16,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            loop_hz: LOOP_HZ,
            drive: DriveConfig::default(),
            topics: TopicConfig::default(),
            motor: MotorConfig::default(),
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            track_width: 0.6,
            max_wheel_velocity: 1.0,
            stale_command_ms: STALE_COMMAND_MS,
        }
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            command: TOPIC_CMD_DRIVE.to_string(),
            wheels: TOPIC_RT_WHEELS.to_string(),
            health: TOPIC_HEALTH.to_string(),
        }
    }
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: MOTOR_PORT.to_string(),
            baudrate: MOTOR_BAUDRATE,
            ids: [1, 2, 3, 4, 5, 6],
            // Right-side servos are mounted mirrored
            inverted: [false, false, false, true, true, true],
            wheel_radius: 0.1,
            max_raw: 3000,
        }
    }
}

impl RuntimeConfig {
    /// Load and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.loop_hz == 0 {
            return Err(invalid("loop_hz", "must be at least 1"));
        }
        if self.loop_period().is_zero() {
            return Err(invalid("loop_hz", "period rounds to zero, max is 1000000"));
        }
        self.drive.validate()?;
        if self.motor.enabled {
            self.motor.validate()?;
        }
        Ok(())
    }

    pub fn loop_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.loop_hz)
    }
}

impl DriveConfig {
    pub fn validate(&self) -> Result<()> {
        positive("drive.track_width", self.track_width)?;
        positive("drive.max_wheel_velocity", self.max_wheel_velocity)?;
        if self.stale_command_ms == 0 {
            return Err(invalid("drive.stale_command_ms", "must be at least 1"));
        }
        Ok(())
    }

    pub fn params(&self) -> DriveParams {
        DriveParams {
            geometry: DriveGeometry {
                track_width: self.track_width,
                max_wheel_velocity: self.max_wheel_velocity,
            },
            stale_threshold: Duration::from_millis(self.stale_command_ms),
        }
    }
}

impl MotorConfig {
    pub fn validate(&self) -> Result<()> {
        positive("motor.wheel_radius", self.wheel_radius)?;
        if self.max_raw <= 0 {
            return Err(invalid("motor.max_raw", "must be positive"));
        }
        let unique: HashSet<u8> = self.ids.iter().copied().collect();
        if unique.len() != WHEEL_COUNT {
            return Err(invalid("motor.ids", format!("duplicate id in {:?}", self.ids)));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn positive(field: &'static str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("{} is not a positive number", value)))
    }
}
