// Drive base: latest command -> freshness check -> skid-steer -> six wheels
//
// Note: the freshness check is a watchdog. If the command stream stops (teleop
// crashed, bus unplugged) or carries garbage, every wheel is driven to zero on
// the very next cycle instead of replaying the last command forever.

pub mod kinematics;

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::messages::{DriveHealth, VelocityCommand};

pub use kinematics::{
    skid_steer, DriveGeometry, WheelPosition, WheelTargets, WHEEL_COUNT,
};

/// Read side of the command bus
pub trait CommandSource {
    /// Most recent fully received command, `None` before the first one arrives
    fn latest(&self) -> Option<VelocityCommand>;
}

impl<T: CommandSource + ?Sized> CommandSource for &T {
    fn latest(&self) -> Option<VelocityCommand> {
        (**self).latest()
    }
}

/// Write side of a single wheel's closed-loop controller
pub trait WheelActuator {
    /// Hand the wheel a new velocity target (m/s)
    fn set_target(&mut self, velocity: f32);

    /// Last write to the wheel failed
    fn is_faulted(&self) -> bool {
        false
    }
}

impl<T: WheelActuator + ?Sized> WheelActuator for Box<T> {
    fn set_target(&mut self, velocity: f32) {
        (**self).set_target(velocity)
    }

    fn is_faulted(&self) -> bool {
        (**self).is_faulted()
    }
}

/// Drive base operating mode, re-evaluated every cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    Normal,
    Failsafe,
}

/// Construction-time drive parameters
///
/// Expected to come from a validated `DriveConfig`. A NaN or negative
/// `max_wheel_velocity` keeps every wheel stopped.
#[derive(Debug, Clone, Copy)]
pub struct DriveParams {
    pub geometry: DriveGeometry,
    /// Maximum age of a command before it is ignored
    pub stale_threshold: Duration,
}

/// Six-wheel skid-steer drive base
pub struct DriveBase<S, A: WheelActuator> {
    source: S,
    wheels: [A; WHEEL_COUNT],
    targets: WheelTargets,
    params: DriveParams,
    mode: DriveMode,
    health: DriveHealth,
}

impl<S, A> DriveBase<S, A>
where
    S: CommandSource,
    A: WheelActuator,
{
    /// Wheels are given in `WheelPosition` order
    pub fn new(source: S, wheels: [A; WHEEL_COUNT], params: DriveParams) -> Self {
        info!(
            "Drive base ready: track width {} m, max wheel velocity {} m/s, {}ms stale threshold",
            params.geometry.track_width,
            params.geometry.max_wheel_velocity,
            params.stale_threshold.as_millis()
        );
        Self {
            source,
            wheels,
            targets: WheelTargets::zero(),
            params,
            // Start in failsafe until the first fresh command
            mode: DriveMode::Failsafe,
            health: DriveHealth::CmdStale,
        }
    }

    /// Run one control cycle against the current monotonic time
    ///
    /// The clock is read after the snapshot, so a command stamped by the
    /// reception side is never newer than `now`.
    pub fn update_velocity(&mut self) {
        let command = self.source.latest();
        self.recompute(command, Instant::now());
        self.write_wheels();
    }

    /// Run one control cycle as if the clock read `now`
    pub fn update_velocity_at(&mut self, now: Instant) {
        self.target_velocity(now);
        self.write_wheels();
    }

    /// Fetch the latest command and recompute the wheel targets
    ///
    /// Does not touch the actuators.
    pub fn target_velocity(&mut self, now: Instant) -> WheelTargets {
        let command = self.source.latest();
        self.recompute(command, now)
    }

    fn write_wheels(&mut self) {
        for (wheel, (_, velocity)) in self.wheels.iter_mut().zip(self.targets.iter()) {
            wheel.set_target(velocity);
        }
    }

    fn recompute(&mut self, command: Option<VelocityCommand>, now: Instant) -> WheelTargets {
        let health = match evaluate(command, now, self.params.stale_threshold) {
            Ok(command) => {
                self.targets = skid_steer(&command, &self.params.geometry);
                DriveHealth::Ok
            }
            Err(health) => {
                self.targets = WheelTargets::zero();
                health
            }
        };
        self.set_health(health);
        self.targets
    }

    /// Zero every wheel immediately, regardless of the command source
    pub fn stop(&mut self) {
        self.targets = WheelTargets::zero();
        for wheel in self.wheels.iter_mut() {
            wheel.set_target(0.0);
        }
    }

    pub fn targets(&self) -> WheelTargets {
        self.targets
    }

    pub fn mode(&self) -> DriveMode {
        self.mode
    }

    pub fn health(&self) -> DriveHealth {
        self.health
    }

    /// Wheels whose last write failed, in `WheelPosition` order
    pub fn faulted_wheels(&self) -> [bool; WHEEL_COUNT] {
        std::array::from_fn(|i| self.wheels[i].is_faulted())
    }

    fn set_health(&mut self, health: DriveHealth) {
        let mode = match health {
            DriveHealth::Ok => DriveMode::Normal,
            DriveHealth::CmdStale | DriveHealth::CmdInvalid => DriveMode::Failsafe,
        };

        if health != self.health {
            match health {
                DriveHealth::Ok => info!("Fresh command received, driving"),
                DriveHealth::CmdStale => warn!("Command stale, stopping rover"),
                DriveHealth::CmdInvalid => warn!("Command invalid, stopping rover"),
            }
        }

        self.mode = mode;
        self.health = health;
    }
}

impl<S, A: WheelActuator> Drop for DriveBase<S, A> {
    fn drop(&mut self) {
        // Leave the wheels stopped
        for wheel in self.wheels.iter_mut() {
            wheel.set_target(0.0);
        }
    }
}

/// Decide whether a command may drive the wheels at time `now`
///
/// Missing and expired commands are `CmdStale`. Non-finite values and
/// timestamps from the future are `CmdInvalid`.
fn evaluate(
    command: Option<VelocityCommand>,
    now: Instant,
    stale_threshold: Duration,
) -> Result<VelocityCommand, DriveHealth> {
    let command = command.ok_or(DriveHealth::CmdStale)?;

    let age = now
        .checked_duration_since(command.timestamp)
        .ok_or(DriveHealth::CmdInvalid)?;
    if age > stale_threshold {
        return Err(DriveHealth::CmdStale);
    }
    if !command.is_finite() {
        return Err(DriveHealth::CmdInvalid);
    }
    Ok(command)
}
