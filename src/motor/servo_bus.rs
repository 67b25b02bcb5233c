// Smart-servo serial bus (STS-series protocol, velocity mode)
//
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// Length counts instruction + params + checksum. Checksum is the inverted low
// byte of the sum of every byte after the header.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use tracing::debug;

pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Broadcast ID, used by sync write
pub const BROADCAST_ID: u8 = 0xFE;

const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Largest packet we build or accept
const MAX_PACKET: usize = 32;

/// Largest parameter block that fits in `MAX_PACKET`
const MAX_PARAMS: usize = MAX_PACKET - 6;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Ping = 0x01,
    Write = 0x03,
    SyncWrite = 0x83,
}

/// Control table addresses used by the drive
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Register {
    OperatingMode = 33,   // 1 byte: 0=position, 1=velocity
    TorqueEnable = 40,    // 1 byte
    GoalVelocity = 46,    // 2 bytes, sign-magnitude
    Lock = 55,            // 1 byte
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Position = 0,
    Velocity = 1,
}

#[derive(Debug, thiserror::Error)]
pub enum ServoError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from servo {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for servo {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Servo {id} returned error status: 0x{status:02X}")]
    Status { id: u8, status: u8 },

    #[error("Timeout waiting for response from servo {id}")]
    Timeout { id: u8 },

    #[error("Packet needs {len} parameter bytes, limit is {}", MAX_PARAMS)]
    PacketTooLong { len: usize },
}

pub type Result<T> = std::result::Result<T, ServoError>;

/// Encoded packet in a fixed buffer
#[derive(Debug, Clone, Copy)]
pub struct Packet {
    buf: [u8; MAX_PACKET],
    len: usize,
}

impl Packet {
    pub fn encode(id: u8, instruction: Instruction, params: &[u8]) -> Result<Self> {
        if params.len() > MAX_PARAMS {
            return Err(ServoError::PacketTooLong { len: params.len() });
        }
        let mut buf = [0u8; MAX_PACKET];
        buf[..2].copy_from_slice(&HEADER);
        buf[2] = id;
        buf[3] = (params.len() + 2) as u8;
        buf[4] = instruction as u8;
        buf[5..5 + params.len()].copy_from_slice(params);
        let end = 5 + params.len();
        buf[end] = checksum(&buf[2..end]);
        Ok(Self { buf, len: end + 1 })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// Parameters returned in a status packet
#[derive(Debug, Clone, Copy)]
pub struct StatusParams {
    buf: [u8; MAX_PACKET],
    len: usize,
}

impl StatusParams {
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

pub fn checksum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    !sum
}

/// Bit 15 = direction (1 = negative), bits 0-14 = magnitude
pub fn encode_sign_magnitude(value: i16) -> u16 {
    let magnitude = value.unsigned_abs().min(0x7FFF);
    if value < 0 { 0x8000 | magnitude } else { magnitude }
}

/// Read one status packet addressed from `expected_id`
pub fn read_status<R: Read>(port: &mut R, expected_id: u8) -> Result<StatusParams> {
    let timeout = |e: std::io::Error| {
        if e.kind() == std::io::ErrorKind::TimedOut {
            ServoError::Timeout { id: expected_id }
        } else {
            ServoError::Io(e)
        }
    };

    let mut head = [0u8; 4];
    port.read_exact(&mut head).map_err(timeout)?;
    if head[..2] != HEADER {
        return Err(ServoError::InvalidResponse {
            id: expected_id,
            reason: format!("Invalid header: {:02X?}", &head[..2]),
        });
    }
    let (id, length) = (head[2], head[3] as usize);
    if id != expected_id {
        return Err(ServoError::InvalidResponse {
            id: expected_id,
            reason: format!("ID mismatch: got {}", id),
        });
    }
    // error byte + params + checksum
    if !(2..=MAX_PACKET - 4).contains(&length) {
        return Err(ServoError::InvalidResponse {
            id,
            reason: format!("Bad length {}", length),
        });
    }

    let mut body = [0u8; MAX_PACKET];
    port.read_exact(&mut body[..length]).map_err(timeout)?;

    let expected = !body[..length - 1]
        .iter()
        .fold(id.wrapping_add(length as u8), |acc, &b| acc.wrapping_add(b));
    if expected != body[length - 1] {
        return Err(ServoError::ChecksumMismatch { id });
    }
    if body[0] != 0 {
        return Err(ServoError::Status {
            id,
            status: body[0],
        });
    }

    let mut params = StatusParams {
        buf: [0u8; MAX_PACKET],
        len: length - 2,
    };
    params.buf[..length - 2].copy_from_slice(&body[1..length - 1]);
    Ok(params)
}

/// Servo bus over any byte stream, a serial port in production
pub struct ServoBus<P = Box<dyn SerialPort>> {
    port: P,
}

impl ServoBus {
    /// Open a serial port for the servo bus
    pub fn open(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;
        Ok(Self::from_port(port))
    }
}

impl<P: Read + Write> ServoBus<P> {
    pub fn from_port(port: P) -> Self {
        Self { port }
    }

    pub fn get_ref(&self) -> &P {
        &self.port
    }

    fn send(&mut self, packet: &Packet) -> Result<()> {
        self.port.write_all(packet.as_bytes())?;
        self.port.flush()?;
        Ok(())
    }

    /// Check if a servo answers
    pub fn ping(&mut self, id: u8) -> Result<bool> {
        self.send(&Packet::encode(id, Instruction::Ping, &[])?)?;
        match read_status(&mut self.port, id) {
            Ok(_) => Ok(true),
            Err(ServoError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        debug!("Write u8 to servo {}: reg={:?}, value={}", id, register, value);
        self.send(&Packet::encode(id, Instruction::Write, &[register as u8, value])?)?;
        read_status(&mut self.port, id)?;
        Ok(())
    }

    /// Write a signed 16-bit register on several servos at once
    ///
    /// Broadcast; servos do not reply.
    pub fn sync_write_i16(&mut self, register: Register, data: &[(u8, i16)]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let len = 2 + data.len() * 3;
        if len > MAX_PARAMS {
            return Err(ServoError::PacketTooLong { len });
        }

        let mut params = [0u8; MAX_PARAMS];
        params[0] = register as u8;
        params[1] = 2;
        for (chunk, &(id, value)) in params[2..len].chunks_exact_mut(3).zip(data) {
            let [lo, hi] = encode_sign_magnitude(value).to_le_bytes();
            chunk.copy_from_slice(&[id, lo, hi]);
        }
        self.send(&Packet::encode(
            BROADCAST_ID,
            Instruction::SyncWrite,
            &params[..len],
        )?)
    }

    pub fn enable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 1)?;
        self.write_u8(id, Register::Lock, 1)
    }

    pub fn disable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 0)?;
        self.write_u8(id, Register::Lock, 0)
    }

    /// Must be called with torque disabled
    pub fn set_operating_mode(&mut self, id: u8, mode: OperatingMode) -> Result<()> {
        self.write_u8(id, Register::OperatingMode, mode as u8)
    }

    /// Goal velocity for one servo, sent without waiting for a reply
    pub fn set_velocity(&mut self, id: u8, velocity: i16) -> Result<()> {
        self.sync_write_i16(Register::GoalVelocity, &[(id, velocity)])
    }

    /// Bring servos up in velocity mode
    ///
    /// Every servo must answer a ping; torque is dropped while the mode changes.
    pub fn initialize(&mut self, ids: &[u8]) -> Result<()> {
        for &id in ids {
            if !self.ping(id)? {
                return Err(ServoError::Timeout { id });
            }
            debug!("Servo {} responding", id);
        }
        for &id in ids {
            self.disable_torque(id)?;
            self.set_operating_mode(id, OperatingMode::Velocity)?;
            self.enable_torque(id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory port: reads come from `rx`, writes land in `tx`
    #[derive(Default)]
    pub(crate) struct MockPort {
        pub rx: VecDeque<u8>,
        pub tx: Vec<u8>,
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.rx.is_empty() {
                return Err(std::io::ErrorKind::TimedOut.into());
            }
            let n = buf.len().min(self.rx.len());
            for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.tx.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn status_packet(id: u8, error: u8, params: &[u8]) -> Vec<u8> {
        let mut packet = vec![0xFF, 0xFF, id, (params.len() + 2) as u8, error];
        packet.extend_from_slice(params);
        packet.push(checksum(&packet[2..]));
        packet
    }

    #[test]
    fn test_checksum() {
        // ~(1+4+3+30+0+2) = ~40 = 215
        assert_eq!(checksum(&[1, 4, 0x03, 30, 0, 2]), 215);
    }

    #[test]
    fn test_ping_packet_layout() {
        let packet = Packet::encode(1, Instruction::Ping, &[]).unwrap();
        assert_eq!(packet.as_bytes(), &[0xFF, 0xFF, 1, 2, 0x01, 0xFB]);
    }

    #[test]
    fn test_sign_magnitude() {
        assert_eq!(encode_sign_magnitude(100), 100);
        assert_eq!(encode_sign_magnitude(-100), 0x8064);
        assert_eq!(encode_sign_magnitude(i16::MIN), 0xFFFF);
    }

    #[test]
    fn test_sync_write_six_servos() {
        let mut bus = ServoBus::from_port(MockPort::default());
        let data: Vec<(u8, i16)> = (1..=6).map(|id| (id, -(id as i16))).collect();
        bus.sync_write_i16(Register::GoalVelocity, &data).unwrap();

        let tx = &bus.port.tx;
        assert_eq!(tx[2], BROADCAST_ID);
        assert_eq!(tx[3] as usize, 2 + 2 + 18);
        assert_eq!(tx[4], Instruction::SyncWrite as u8);
        assert_eq!(&tx[5..7], &[Register::GoalVelocity as u8, 2]);
        // First entry: id 1, velocity -1
        assert_eq!(&tx[7..10], &[1, 0x01, 0x80]);
        assert_eq!(*tx.last().unwrap(), checksum(&tx[2..tx.len() - 1]));
    }

    #[test]
    fn test_sync_write_too_many_entries() {
        let mut bus = ServoBus::from_port(MockPort::default());
        let data = [(1u8, 0i16); 9];
        assert!(matches!(
            bus.sync_write_i16(Register::GoalVelocity, &data),
            Err(ServoError::PacketTooLong { .. })
        ));
        assert!(bus.port.tx.is_empty());
    }

    #[test]
    fn test_read_status_ok_and_errors() {
        let mut port = MockPort::default();
        port.rx.extend(status_packet(3, 0, &[0x10, 0x80]));
        let params = read_status(&mut port, 3).unwrap();
        assert_eq!(params.as_bytes(), &[0x10, 0x80]);

        port.rx.extend(status_packet(3, 0x20, &[]));
        assert!(matches!(
            read_status(&mut port, 3),
            Err(ServoError::Status { id: 3, status: 0x20 })
        ));

        let mut corrupt = status_packet(3, 0, &[]);
        *corrupt.last_mut().unwrap() ^= 0xFF;
        port.rx.extend(corrupt);
        assert!(matches!(
            read_status(&mut port, 3),
            Err(ServoError::ChecksumMismatch { id: 3 })
        ));

        assert!(matches!(
            read_status(&mut port, 3),
            Err(ServoError::Timeout { id: 3 })
        ));
    }

    #[test]
    fn test_ping_timeout_is_false() {
        let mut bus = ServoBus::from_port(MockPort::default());
        assert!(!bus.ping(9).unwrap());
    }

    #[test]
    fn test_initialize_fails_on_silent_servo() {
        let mut port = MockPort::default();
        port.rx.extend(status_packet(1, 0, &[]));
        let mut bus = ServoBus::from_port(port);
        assert!(matches!(
            bus.initialize(&[1, 2]),
            Err(ServoError::Timeout { id: 2 })
        ));
    }
}
