//! Vehicle telemetry
//!
//! State reports flowing from the flight controller (or the simulator
//! standing in for it) towards the ground.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::{read_i16s, write_i16s, MotorSignals};
use crate::message::{Message, MessageError, MessageType, ANY_MESSAGE};

/// Attitude, position and battery readings of the vehicle
pub static SENSOR_DATA: MessageType = MessageType {
    name: "SensorData",
    parents: &[&ANY_MESSAGE],
    decoder: Some(decode_sensor_data),
};

/// Raw controller board report
pub static JAVIATOR_DATA: MessageType = MessageType {
    name: "JaviatorData",
    parents: &[&ANY_MESSAGE],
    decoder: Some(decode_javiator_data),
};

/// Rotor offsets applied by the attitude controller
pub static MOTOR_OFFSETS: MessageType = MessageType {
    name: "MotorOffsets",
    parents: &[&ANY_MESSAGE],
    decoder: Some(decode_motor_offsets),
};

/// Sensor data, motor state and flight mode in one report
pub static GROUND_REPORT: MessageType = MessageType {
    name: "GroundReport",
    parents: &[&ANY_MESSAGE],
    decoder: Some(decode_ground_report),
};

/// Full-precision plant state from the simulator
pub static SIMULATION_DATA: MessageType = MessageType {
    name: "SimulationData",
    parents: &[&ANY_MESSAGE],
    decoder: Some(decode_simulation_data),
};

/// Attitude, position and battery readings
///
/// Angles and their derivatives travel in milliradians, positions in
/// millimeters, velocities in centimeters per second and the battery voltage
/// in millivolts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct SensorData {
    pub roll: i16,
    pub pitch: i16,
    pub yaw: i16,
    pub d_roll: i16,
    pub d_pitch: i16,
    pub d_yaw: i16,
    pub dd_roll: i16,
    pub dd_pitch: i16,
    pub dd_yaw: i16,
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub dx: i16,
    pub dy: i16,
    pub dz: i16,
    pub ddx: i16,
    pub ddy: i16,
    pub ddz: i16,
    pub battery: i16,
}

impl SensorData {
    /// Encoded size in bytes
    pub const PAYLOAD_LENGTH: usize = 38;

    /// Milliradians to degrees
    pub const ANGLE_FACTOR: f64 = 0.18 / std::f64::consts::PI;

    /// Millimeters to meters
    pub const LENGTH_FACTOR: f64 = 0.001;

    /// Millivolts to volts
    pub const BATTERY_FACTOR: f64 = 0.001;

    /// Decode from a frame payload
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::PayloadLength`] unless the payload is 38 bytes.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, MessageError> {
        let [
            roll,
            pitch,
            yaw,
            d_roll,
            d_pitch,
            d_yaw,
            dd_roll,
            dd_pitch,
            dd_yaw,
            x,
            y,
            z,
            dx,
            dy,
            dz,
            ddx,
            ddy,
            ddz,
            battery,
        ] = read_i16s(&SENSOR_DATA, payload)?;
        Ok(Self {
            roll,
            pitch,
            yaw,
            d_roll,
            d_pitch,
            d_yaw,
            dd_roll,
            dd_pitch,
            dd_yaw,
            x,
            y,
            z,
            dx,
            dy,
            dz,
            ddx,
            ddy,
            ddz,
            battery,
        })
    }

    fn fields(&self) -> [i16; 19] {
        [
            self.roll,
            self.pitch,
            self.yaw,
            self.d_roll,
            self.d_pitch,
            self.d_yaw,
            self.dd_roll,
            self.dd_pitch,
            self.dd_yaw,
            self.x,
            self.y,
            self.z,
            self.dx,
            self.dy,
            self.dz,
            self.ddx,
            self.ddy,
            self.ddz,
            self.battery,
        ]
    }

    /// Roll in degrees
    #[must_use]
    pub fn roll_degrees(&self) -> f64 {
        f64::from(self.roll) * Self::ANGLE_FACTOR
    }

    /// Pitch in degrees
    #[must_use]
    pub fn pitch_degrees(&self) -> f64 {
        f64::from(self.pitch) * Self::ANGLE_FACTOR
    }

    /// Yaw in degrees
    #[must_use]
    pub fn yaw_degrees(&self) -> f64 {
        f64::from(self.yaw) * Self::ANGLE_FACTOR
    }

    /// Position in meters as `(x, y, z)`
    #[must_use]
    pub fn position(&self) -> (f64, f64, f64) {
        (
            f64::from(self.x) * Self::LENGTH_FACTOR,
            f64::from(self.y) * Self::LENGTH_FACTOR,
            f64::from(self.z) * Self::LENGTH_FACTOR,
        )
    }

    /// Battery voltage in volts
    #[must_use]
    pub fn battery_volts(&self) -> f64 {
        f64::from(self.battery) * Self::BATTERY_FACTOR
    }
}

impl Message for SensorData {
    fn message_type(&self) -> &'static MessageType {
        &SENSOR_DATA
    }

    fn to_bytes(&self) -> Vec<u8> {
        write_i16s(&self.fields())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Display for SensorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SensorData: roll={}, pitch={}, yaw={}, dRoll={}, dPitch={}, dYaw={}, \
             ddRoll={}, ddPitch={}, ddYaw={}, x={}, y={}, z={}, dx={}, dy={}, dz={}, \
             ddx={}, ddy={}, ddz={}, battery={}",
            self.roll,
            self.pitch,
            self.yaw,
            self.d_roll,
            self.d_pitch,
            self.d_yaw,
            self.dd_roll,
            self.dd_pitch,
            self.dd_yaw,
            self.x,
            self.y,
            self.z,
            self.dx,
            self.dy,
            self.dz,
            self.ddx,
            self.ddy,
            self.ddz,
            self.battery
        )
    }
}

fn decode_sensor_data(payload: &[u8]) -> Result<Arc<dyn Message>, MessageError> {
    Ok(Arc::new(SensorData::from_bytes(payload)?))
}

/// Raw report of the controller board
///
/// The laser positions arrive as eight ASCII digits of millimeters each.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JaviatorData {
    /// Barometric pressure, 24-bit ADC reading
    pub maps: u32,
    /// Temperature ADC reading
    pub temperature: i16,
    /// Battery ADC reading
    pub battery: i16,
    /// Sonar ADC reading
    pub sonar: i16,
    /// `ST_NEW_DATA_*` flags
    pub state: i16,
    /// Transmission identifier
    pub id: i16,
    /// Laser X position as ASCII digits
    pub x_position: [u8; 8],
    /// Laser Y position as ASCII digits
    pub y_position: [u8; 8],
    /// Euler angles in `2π / 65536` radian units
    pub roll: i16,
    /// See `roll`
    pub pitch: i16,
    /// See `roll`
    pub yaw: i16,
    /// Angular rates
    pub d_roll: i16,
    /// See `d_roll`
    pub d_pitch: i16,
    /// See `d_roll`
    pub d_yaw: i16,
    /// Linear accelerations
    pub ddx: i16,
    /// See `ddx`
    pub ddy: i16,
    /// See `ddx`
    pub ddz: i16,
}

impl Default for JaviatorData {
    fn default() -> Self {
        Self {
            maps: 0,
            temperature: 0,
            battery: 0,
            sonar: 0,
            state: 0,
            id: 0,
            x_position: [b'0'; 8],
            y_position: [b'0'; 8],
            roll: 0,
            pitch: 0,
            yaw: 0,
            d_roll: 0,
            d_pitch: 0,
            d_yaw: 0,
            ddx: 0,
            ddy: 0,
            ddz: 0,
        }
    }
}

impl JaviatorData {
    /// Encoded size in bytes
    pub const PAYLOAD_LENGTH: usize = 48;

    /// IMU data present
    pub const ST_NEW_DATA_IMU: i16 = 0x01;
    /// Barometer data present
    pub const ST_NEW_DATA_BMU: i16 = 0x02;
    /// Sonar data present
    pub const ST_NEW_DATA_SONAR: i16 = 0x04;
    /// Laser X position present
    pub const ST_NEW_DATA_POS_X: i16 = 0x08;
    /// Laser Y position present
    pub const ST_NEW_DATA_POS_Y: i16 = 0x10;

    /// Euler angle units to radians
    pub const FACTOR_EULER_ANGLE: f64 = 2.0 * std::f64::consts::PI / 65536.0;

    /// Sonar units to meters
    pub const FACTOR_SONAR: f64 = 3.0 / 1024.0;

    /// Battery units to volts
    pub const FACTOR_BATTERY: f64 = 18.0 / 1024.0;

    /// Decode from a frame payload
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::PayloadLength`] unless the payload is 48 bytes.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, MessageError> {
        if payload.len() != Self::PAYLOAD_LENGTH {
            return Err(MessageError::PayloadLength {
                message_type: JAVIATOR_DATA.name,
                expected: Self::PAYLOAD_LENGTH,
                actual: payload.len(),
            });
        }
        let maps = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let [temperature, battery, sonar, state, id] = read_i16s(&JAVIATOR_DATA, &payload[4..14])?;
        let mut x_position = [0u8; 8];
        x_position.copy_from_slice(&payload[14..22]);
        let mut y_position = [0u8; 8];
        y_position.copy_from_slice(&payload[22..30]);
        let [roll, pitch, yaw, d_roll, d_pitch, d_yaw, ddx, ddy, ddz] =
            read_i16s(&JAVIATOR_DATA, &payload[30..])?;

        Ok(Self {
            maps,
            temperature,
            battery,
            sonar,
            state,
            id,
            x_position,
            y_position,
            roll,
            pitch,
            yaw,
            d_roll,
            d_pitch,
            d_yaw,
            ddx,
            ddy,
            ddz,
        })
    }

    /// Whether `flag` is set in the state word
    #[must_use]
    pub fn has(&self, flag: i16) -> bool {
        self.state & flag != 0
    }

    /// Laser X position in meters
    #[must_use]
    pub fn x_meters(&self) -> f64 {
        digits_to_meters(&self.x_position)
    }

    /// Laser Y position in meters
    #[must_use]
    pub fn y_meters(&self) -> f64 {
        digits_to_meters(&self.y_position)
    }

    /// Set the laser X position; negative values clamp to zero
    pub fn set_x_meters(&mut self, meters: f64) {
        self.x_position = meters_to_digits(meters);
    }

    /// Set the laser Y position; negative values clamp to zero
    pub fn set_y_meters(&mut self, meters: f64) {
        self.y_position = meters_to_digits(meters);
    }

    /// Roll in radians
    #[must_use]
    pub fn roll_radians(&self) -> f64 {
        f64::from(self.roll) * Self::FACTOR_EULER_ANGLE
    }

    /// Sonar altitude in meters
    #[must_use]
    pub fn sonar_meters(&self) -> f64 {
        f64::from(self.sonar) * Self::FACTOR_SONAR
    }

    /// Battery voltage in volts
    #[must_use]
    pub fn battery_volts(&self) -> f64 {
        f64::from(self.battery) * Self::FACTOR_BATTERY
    }
}

fn digits_to_meters(digits: &[u8; 8]) -> f64 {
    let millimeters = digits.iter().fold(0.0, |acc, digit| {
        acc * 10.0 + f64::from(i16::from(*digit) - i16::from(b'0'))
    });
    millimeters / 1000.0
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn meters_to_digits(meters: f64) -> [u8; 8] {
    let mut millimeters = (meters * 1000.0) as u64;
    let mut digits = [b'0'; 8];
    for digit in digits.iter_mut().rev() {
        *digit = b'0' + (millimeters % 10) as u8;
        millimeters /= 10;
    }
    digits
}

impl Message for JaviatorData {
    fn message_type(&self) -> &'static MessageType {
        &JAVIATOR_DATA
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::PAYLOAD_LENGTH);
        bytes.extend_from_slice(&self.maps.to_be_bytes());
        bytes.extend(write_i16s(&[
            self.temperature,
            self.battery,
            self.sonar,
            self.state,
            self.id,
        ]));
        bytes.extend_from_slice(&self.x_position);
        bytes.extend_from_slice(&self.y_position);
        bytes.extend(write_i16s(&[
            self.roll,
            self.pitch,
            self.yaw,
            self.d_roll,
            self.d_pitch,
            self.d_yaw,
            self.ddx,
            self.ddy,
            self.ddz,
        ]));
        bytes
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Display for JaviatorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JaviatorData: maps={}, temp={}, batt={}, sonar={} ({:.3}), state={}, id={}, \
             x_pos={}, y_pos={}, roll={}, pitch={}, yaw={}, droll={}, dpitch={}, dyaw={}, \
             ddx={}, ddy={}, ddz={}",
            self.maps,
            self.temperature,
            self.battery,
            self.sonar,
            self.sonar_meters(),
            self.state,
            self.id,
            String::from_utf8_lossy(&self.x_position),
            String::from_utf8_lossy(&self.y_position),
            self.roll,
            self.pitch,
            self.yaw,
            self.d_roll,
            self.d_pitch,
            self.d_yaw,
            self.ddx,
            self.ddy,
            self.ddz
        )
    }
}

fn decode_javiator_data(payload: &[u8]) -> Result<Arc<dyn Message>, MessageError> {
    Ok(Arc::new(JaviatorData::from_bytes(payload)?))
}

/// Rotor offsets in raw motor units
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MotorOffsets {
    /// Roll contribution
    pub roll: i16,
    /// Pitch contribution
    pub pitch: i16,
    /// Yaw contribution
    pub yaw: i16,
    /// Thrust contribution
    pub z: i16,
}

impl MotorOffsets {
    /// Encoded size in bytes
    pub const PAYLOAD_LENGTH: usize = 8;

    /// Decode from a frame payload
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::PayloadLength`] unless the payload is 8 bytes.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, MessageError> {
        let [roll, pitch, yaw, z] = read_i16s(&MOTOR_OFFSETS, payload)?;
        Ok(Self {
            roll,
            pitch,
            yaw,
            z,
        })
    }
}

impl Message for MotorOffsets {
    fn message_type(&self) -> &'static MessageType {
        &MOTOR_OFFSETS
    }

    fn to_bytes(&self) -> Vec<u8> {
        write_i16s(&[self.roll, self.pitch, self.yaw, self.z])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn decode_motor_offsets(payload: &[u8]) -> Result<Arc<dyn Message>, MessageError> {
    Ok(Arc::new(MotorOffsets::from_bytes(payload)?))
}

/// Composite state report for the ground station
///
/// `state` and `mode` are the ordinals of the controller's flying state and
/// flying mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GroundReport {
    /// Current sensor readings
    pub sensor_data: SensorData,
    /// Signals last sent to the rotors
    pub motor_signals: MotorSignals,
    /// Offsets applied by the controller
    pub motor_offsets: MotorOffsets,
    /// Flying state ordinal
    pub state: u8,
    /// Flying mode ordinal
    pub mode: u8,
}

impl GroundReport {
    /// Encoded size in bytes
    pub const PAYLOAD_LENGTH: usize =
        SensorData::PAYLOAD_LENGTH + MotorSignals::PAYLOAD_LENGTH + MotorOffsets::PAYLOAD_LENGTH + 2;

    /// Decode from a frame payload
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::PayloadLength`] unless the payload is 58 bytes.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, MessageError> {
        if payload.len() != Self::PAYLOAD_LENGTH {
            return Err(MessageError::PayloadLength {
                message_type: GROUND_REPORT.name,
                expected: Self::PAYLOAD_LENGTH,
                actual: payload.len(),
            });
        }
        let (sensor, rest) = payload.split_at(SensorData::PAYLOAD_LENGTH);
        let (signals, rest) = rest.split_at(MotorSignals::PAYLOAD_LENGTH);
        let (offsets, flags) = rest.split_at(MotorOffsets::PAYLOAD_LENGTH);

        Ok(Self {
            sensor_data: SensorData::from_bytes(sensor)?,
            motor_signals: MotorSignals::from_bytes(signals)?,
            motor_offsets: MotorOffsets::from_bytes(offsets)?,
            state: flags[0],
            mode: flags[1],
        })
    }
}

impl Message for GroundReport {
    fn message_type(&self) -> &'static MessageType {
        &GROUND_REPORT
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::PAYLOAD_LENGTH);
        bytes.extend(self.sensor_data.to_bytes());
        bytes.extend(self.motor_signals.to_bytes());
        bytes.extend(self.motor_offsets.to_bytes());
        bytes.push(self.state);
        bytes.push(self.mode);
        bytes
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn decode_ground_report(payload: &[u8]) -> Result<Arc<dyn Message>, MessageError> {
    Ok(Arc::new(GroundReport::from_bytes(payload)?))
}

/// Plant state in SI units as big-endian `f64` values
///
/// At 144 bytes the payload exceeds the frame ceiling, so this message only
/// travels on the bus; mapping it onto a link makes every send fail with
/// [`crate::FrameError::PayloadTooLarge`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[allow(missing_docs)]
pub struct SimulationData {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub d_roll: f64,
    pub d_pitch: f64,
    pub d_yaw: f64,
    pub dd_roll: f64,
    pub dd_pitch: f64,
    pub dd_yaw: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    pub ddx: f64,
    pub ddy: f64,
    pub ddz: f64,
}

impl SimulationData {
    /// Encoded size in bytes
    pub const PAYLOAD_LENGTH: usize = 144;

    /// Decode from a payload
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::PayloadLength`] unless the payload is 144 bytes.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, MessageError> {
        if payload.len() != Self::PAYLOAD_LENGTH {
            return Err(MessageError::PayloadLength {
                message_type: SIMULATION_DATA.name,
                expected: Self::PAYLOAD_LENGTH,
                actual: payload.len(),
            });
        }
        let mut values = [0f64; 18];
        for (value, chunk) in values.iter_mut().zip(payload.chunks_exact(8)) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            *value = f64::from_be_bytes(raw);
        }
        let [
            roll,
            pitch,
            yaw,
            d_roll,
            d_pitch,
            d_yaw,
            dd_roll,
            dd_pitch,
            dd_yaw,
            x,
            y,
            z,
            dx,
            dy,
            dz,
            ddx,
            ddy,
            ddz,
        ] = values;
        Ok(Self {
            roll,
            pitch,
            yaw,
            d_roll,
            d_pitch,
            d_yaw,
            dd_roll,
            dd_pitch,
            dd_yaw,
            x,
            y,
            z,
            dx,
            dy,
            dz,
            ddx,
            ddy,
            ddz,
        })
    }
}

impl Message for SimulationData {
    fn message_type(&self) -> &'static MessageType {
        &SIMULATION_DATA
    }

    fn to_bytes(&self) -> Vec<u8> {
        [
            self.roll,
            self.pitch,
            self.yaw,
            self.d_roll,
            self.d_pitch,
            self.d_yaw,
            self.dd_roll,
            self.dd_pitch,
            self.dd_yaw,
            self.x,
            self.y,
            self.z,
            self.dx,
            self.dy,
            self.dz,
            self.ddx,
            self.ddy,
            self.ddz,
        ]
        .iter()
        .flat_map(|value| value.to_be_bytes())
        .collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn decode_simulation_data(payload: &[u8]) -> Result<Arc<dyn Message>, MessageError> {
    Ok(Arc::new(SimulationData::from_bytes(payload)?))
}
