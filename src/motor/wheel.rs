// Wheel actuators: drive-core targets (m/s) -> servo goal velocity
//
// Each wheel owns a handle to the shared servo bus and writes its own goal
// velocity. Writes are broadcast sync-writes, so no reply is awaited.

use std::f32::consts::PI;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, PoisonError};

use serialport::SerialPort;
use tracing::{debug, info, warn};

use super::servo_bus::{ServoBus, ServoError};
use crate::drive::{WheelActuator, WheelPosition};

/// Motor resolution: 4096 steps per revolution
const STEPS_PER_REVOLUTION: f32 = 4096.0;

/// Servo-side parameters of one wheel
#[derive(Debug, Clone, Copy)]
pub struct ServoWheelParams {
    pub id: u8,
    pub wheel_radius: f32,
    pub inverted: bool,
    pub max_raw: i16,
}

/// Convert a wheel surface velocity (m/s) to raw servo steps/s
pub fn mps_to_raw(velocity: f32, params: &ServoWheelParams) -> i16 {
    if !velocity.is_finite() {
        return 0;
    }
    let revs_per_sec = velocity / (2.0 * PI * params.wheel_radius);
    let steps = (revs_per_sec * STEPS_PER_REVOLUTION).round();
    let limit = params.max_raw as f32;
    let raw = steps.clamp(-limit, limit) as i16;
    if params.inverted { -raw } else { raw }
}

/// Wheel backed by a servo on the shared bus
pub struct ServoWheel<P = Box<dyn SerialPort>> {
    bus: Arc<Mutex<ServoBus<P>>>,
    position: WheelPosition,
    params: ServoWheelParams,
    faulted: bool,
}

impl<P: Read + Write> ServoWheel<P> {
    pub fn new(bus: Arc<Mutex<ServoBus<P>>>, position: WheelPosition, params: ServoWheelParams) -> Self {
        Self {
            bus,
            position,
            params,
            faulted: false,
        }
    }

    fn report(&mut self, result: Result<(), ServoError>) {
        match result {
            Ok(()) if self.faulted => {
                info!("{} wheel (servo {}) recovered", self.position.name(), self.params.id);
                self.faulted = false;
            }
            Err(e) if !self.faulted => {
                warn!(
                    "{} wheel (servo {}) write failed: {}",
                    self.position.name(),
                    self.params.id,
                    e
                );
                self.faulted = true;
            }
            _ => {}
        }
    }
}

impl<P: Read + Write> WheelActuator for ServoWheel<P> {
    fn set_target(&mut self, velocity: f32) {
        let raw = mps_to_raw(velocity, &self.params);
        let result = self
            .bus
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_velocity(self.params.id, raw);
        self.report(result);
    }

    fn is_faulted(&self) -> bool {
        self.faulted
    }
}

/// Wheel used when no hardware is attached; remembers and logs its target
#[derive(Debug)]
pub struct SimWheel {
    position: WheelPosition,
    target: f32,
}

impl SimWheel {
    pub fn new(position: WheelPosition) -> Self {
        Self {
            position,
            target: 0.0,
        }
    }

    pub fn target(&self) -> f32 {
        self.target
    }
}

impl WheelActuator for SimWheel {
    fn set_target(&mut self, velocity: f32) {
        if velocity != self.target {
            debug!("{} wheel -> {:.3} m/s", self.position.name(), velocity);
        }
        self.target = velocity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::servo_bus::tests::MockPort;
    use crate::motor::servo_bus::{encode_sign_magnitude, Register, BROADCAST_ID};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Port whose writes fail while `down` is set
    struct FlakyPort {
        down: Arc<AtomicBool>,
        writes: usize,
    }

    impl Read for FlakyPort {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::TimedOut.into())
        }
    }

    impl Write for FlakyPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.down.load(Ordering::SeqCst) {
                return Err(std::io::ErrorKind::BrokenPipe.into());
            }
            self.writes += 1;
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn params(inverted: bool) -> ServoWheelParams {
        ServoWheelParams {
            id: 4,
            wheel_radius: 0.1,
            inverted,
            max_raw: 3000,
        }
    }

    #[test]
    fn test_mps_to_raw_one_revolution() {
        // One wheel circumference per second = 4096 steps/s, above the limit
        let circumference = 2.0 * PI * 0.1;
        assert_eq!(mps_to_raw(circumference, &params(false)), 3000);
        assert_eq!(mps_to_raw(circumference / 2.0, &params(false)), 2048);
        assert_eq!(mps_to_raw(circumference / 2.0, &params(true)), -2048);
    }

    #[test]
    fn test_mps_to_raw_zero_and_non_finite() {
        assert_eq!(mps_to_raw(0.0, &params(false)), 0);
        assert_eq!(mps_to_raw(f32::NAN, &params(false)), 0);
        assert_eq!(mps_to_raw(-100.0, &params(false)), -3000);
    }

    #[test]
    fn test_servo_wheel_writes_goal_velocity() {
        let bus = Arc::new(Mutex::new(ServoBus::from_port(MockPort::default())));
        let mut wheel = ServoWheel::new(bus.clone(), WheelPosition::FrontRight, params(true));
        wheel.set_target(PI * 0.1);

        let bus = bus.lock().unwrap();
        let tx = &bus.get_ref().tx;
        assert_eq!(tx[2], BROADCAST_ID);
        assert_eq!(&tx[5..7], &[Register::GoalVelocity as u8, 2]);
        let [lo, hi] = encode_sign_magnitude(-2048).to_le_bytes();
        assert_eq!(&tx[7..10], &[4, lo, hi]);
        assert!(!wheel.is_faulted());
    }

    #[test]
    fn test_sim_wheel_tracks_target() {
        let mut wheel = SimWheel::new(WheelPosition::RearLeft);
        wheel.set_target(0.25);
        assert_eq!(wheel.target(), 0.25);
        wheel.set_target(0.0);
        assert_eq!(wheel.target(), 0.0);
    }

    #[test]
    fn test_servo_wheel_fault_and_recovery() {
        let down = Arc::new(AtomicBool::new(true));
        let port = FlakyPort {
            down: down.clone(),
            writes: 0,
        };
        let bus = Arc::new(Mutex::new(ServoBus::from_port(port)));
        let mut wheel = ServoWheel::new(bus.clone(), WheelPosition::MidLeft, params(false));

        wheel.set_target(0.2);
        assert!(wheel.is_faulted());
        // Still faulted, still not blocking
        wheel.set_target(0.2);
        assert!(wheel.is_faulted());

        down.store(false, Ordering::SeqCst);
        wheel.set_target(0.2);
        assert!(!wheel.is_faulted());
        assert_eq!(bus.lock().unwrap().get_ref().writes, 1);
    }

    #[test]
    fn test_servo_wheel_survives_poisoned_bus() {
        let bus = Arc::new(Mutex::new(ServoBus::from_port(MockPort::default())));
        let poisoner = bus.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("bus holder crashed");
        })
        .join();
        assert!(bus.is_poisoned());

        let mut wheel = ServoWheel::new(bus.clone(), WheelPosition::RearRight, params(false));
        wheel.set_target(0.0);
        assert!(!wheel.is_faulted());
        let bus = bus.lock().unwrap_or_else(PoisonError::into_inner);
        assert!(!bus.get_ref().tx.is_empty());
    }
}
