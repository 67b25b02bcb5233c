// Wheel actuators for the six-wheel rover
//
// Provides:
// - Smart-servo serial protocol (velocity mode)
// - Servo-backed and simulated WheelActuator implementations
// - Construction of the wheel set from configuration

pub mod servo_bus;
pub mod wheel;

use std::sync::{Arc, Mutex};

use tracing::info;

use crate::config::MotorConfig;
use crate::drive::{WheelActuator, WheelPosition, WHEEL_COUNT};

pub use servo_bus::{ServoBus, ServoError};
pub use wheel::{mps_to_raw, ServoWheel, ServoWheelParams, SimWheel};

/// Wheel handle as held by the runtime's drive base
pub type DynWheel = Box<dyn WheelActuator + Send>;

/// Per-wheel servo parameters in wheel position order
pub fn servo_params(config: &MotorConfig) -> [ServoWheelParams; WHEEL_COUNT] {
    std::array::from_fn(|i| ServoWheelParams {
        id: config.ids[i],
        wheel_radius: config.wheel_radius,
        inverted: config.inverted[i],
        max_raw: config.max_raw,
    })
}

/// Open the servo bus and bring every wheel up in velocity mode
pub fn servo_wheels(config: &MotorConfig) -> Result<[DynWheel; WHEEL_COUNT], ServoError> {
    info!("Opening servo bus on {}", config.port);
    let mut bus = ServoBus::open(&config.port, config.baudrate)?;

    info!("Initializing servos {:?} for velocity control", config.ids);
    bus.initialize(&config.ids)?;
    info!("Servos initialized successfully");

    let bus = Arc::new(Mutex::new(bus));
    let params = servo_params(config);
    Ok(std::array::from_fn(|i| {
        Box::new(ServoWheel::new(bus.clone(), WheelPosition::ALL[i], params[i])) as DynWheel
    }))
}

/// Simulated wheels for runs without hardware
pub fn sim_wheels() -> [DynWheel; WHEEL_COUNT] {
    WheelPosition::ALL.map(|p| Box::new(SimWheel::new(p)) as DynWheel)
}
