//! Bundled Vehicle Messages
//!
//! Payload layouts spoken by the flight controller. Unless a type says
//! otherwise every field is a signed 16-bit big-endian integer on the wire;
//! constructors and accessors convert to engineering units where the field
//! has one.
//!
//! - this module: setpoints and controller tuning sent to the vehicle
//! - [`telemetry`]: state reports coming back from it
//! - [`pilot`]: autopilot command text

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::message::{Message, MessageError, MessageType, ANY_MESSAGE};

pub mod pilot;
pub mod telemetry;

pub use pilot::{PilotCommand, PilotData, PILOT_DATA};
pub use telemetry::{
    GroundReport, JaviatorData, MotorOffsets, SensorData, SimulationData, GROUND_REPORT,
    JAVIATOR_DATA, MOTOR_OFFSETS, SENSOR_DATA, SIMULATION_DATA,
};

/// Setpoint sent from the ground terminal to the flight controller
pub static COMMAND_DATA: MessageType = MessageType {
    name: "CommandData",
    parents: &[&ANY_MESSAGE],
    decoder: Some(decode_command_data),
};

/// Raw signals for the four rotors
pub static MOTOR_SIGNALS: MessageType = MessageType {
    name: "MotorSignals",
    parents: &[&ANY_MESSAGE],
    decoder: Some(decode_motor_signals),
};

/// Idle speed limit of the rotors
pub static IDLE_LIMIT: MessageType = MessageType {
    name: "IdleLimit",
    parents: &[&ANY_MESSAGE],
    decoder: Some(decode_idle_limit),
};

/// Sensor enable switch
pub static ENABLE_SENSORS: MessageType = MessageType {
    name: "EnableSensors",
    parents: &[&ANY_MESSAGE],
    decoder: Some(decode_enable_sensors),
};

/// Attitude trim in milliradians
pub static TRIM_VALUES: MessageType = MessageType {
    name: "TrimValues",
    parents: &[&ANY_MESSAGE],
    decoder: Some(decode_trim_values),
};

/// Rotor spin-up and spin-down tuning
pub static REVVING_PARAMETERS: MessageType = MessageType {
    name: "RevvingParameters",
    parents: &[&ANY_MESSAGE],
    decoder: Some(decode_revving_parameters),
};

/// Family of all controller gain sets
pub static CONTROLLER_PARAMETERS: MessageType = MessageType {
    name: "ControllerParameters",
    parents: &[&ANY_MESSAGE],
    decoder: None,
};

/// Gains of the position controller
pub static POSITION_CONTROLLER_PARAMETERS: MessageType = MessageType {
    name: "PositionControllerParameters",
    parents: &[&CONTROLLER_PARAMETERS],
    decoder: Some(decode_position_controller_parameters),
};

/// Gains of the yaw controller
pub static YAW_CONTROLLER_PARAMETERS: MessageType = MessageType {
    name: "YawControllerParameters",
    parents: &[&CONTROLLER_PARAMETERS],
    decoder: Some(decode_yaw_controller_parameters),
};

/// Every bundled type, families included
pub static ALL_TYPES: [&MessageType; 15] = [
    &COMMAND_DATA,
    &MOTOR_SIGNALS,
    &IDLE_LIMIT,
    &ENABLE_SENSORS,
    &TRIM_VALUES,
    &REVVING_PARAMETERS,
    &CONTROLLER_PARAMETERS,
    &POSITION_CONTROLLER_PARAMETERS,
    &YAW_CONTROLLER_PARAMETERS,
    &SENSOR_DATA,
    &JAVIATOR_DATA,
    &MOTOR_OFFSETS,
    &GROUND_REPORT,
    &SIMULATION_DATA,
    &PILOT_DATA,
];

fn read_i16s<const N: usize>(
    message_type: &MessageType,
    payload: &[u8],
) -> Result<[i16; N], MessageError> {
    if payload.len() != N * 2 {
        return Err(MessageError::PayloadLength {
            message_type: message_type.name,
            expected: N * 2,
            actual: payload.len(),
        });
    }
    let mut values = [0i16; N];
    for (value, chunk) in values.iter_mut().zip(payload.chunks_exact(2)) {
        *value = i16::from_be_bytes([chunk[0], chunk[1]]);
    }
    Ok(values)
}

fn write_i16s(values: &[i16]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_be_bytes()).collect()
}

#[allow(clippy::cast_possible_truncation)]
fn scale(value: f64, factor: f64) -> i16 {
    (value * factor) as i16
}

/// Attitude and height setpoint
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommandData {
    roll: i16,
    pitch: i16,
    yaw: i16,
    height: i16,
}

impl CommandData {
    /// Degrees to the milliradians carried on the wire
    pub const ANGLE_FACTOR: f64 = std::f64::consts::PI / 0.18;

    /// Meters to the millimeters carried on the wire
    pub const HEIGHT_FACTOR: f64 = 1000.0;

    const PAYLOAD_LENGTH: usize = 8;

    /// Create from angles in degrees and height above ground in meters
    #[must_use]
    pub fn new(roll: f64, pitch: f64, yaw: f64, height: f64) -> Self {
        Self {
            roll: scale(roll, Self::ANGLE_FACTOR),
            pitch: scale(pitch, Self::ANGLE_FACTOR),
            yaw: scale(yaw, Self::ANGLE_FACTOR),
            height: scale(height, Self::HEIGHT_FACTOR),
        }
    }

    /// Decode from a frame payload
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::PayloadLength`] unless the payload is 8 bytes.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, MessageError> {
        let [roll, pitch, yaw, height] = read_i16s(&COMMAND_DATA, payload)?;
        Ok(Self {
            roll,
            pitch,
            yaw,
            height,
        })
    }

    /// Roll in degrees
    #[must_use]
    pub fn roll(&self) -> f64 {
        f64::from(self.roll) / Self::ANGLE_FACTOR
    }

    /// Pitch in degrees
    #[must_use]
    pub fn pitch(&self) -> f64 {
        f64::from(self.pitch) / Self::ANGLE_FACTOR
    }

    /// Yaw in degrees
    #[must_use]
    pub fn yaw(&self) -> f64 {
        f64::from(self.yaw) / Self::ANGLE_FACTOR
    }

    /// Height above ground in meters
    #[must_use]
    pub fn height(&self) -> f64 {
        f64::from(self.height) / Self::HEIGHT_FACTOR
    }

    /// Height above ground in millimeters, as sent
    #[must_use]
    pub fn raw_height(&self) -> i16 {
        self.height
    }
}

impl Message for CommandData {
    fn message_type(&self) -> &'static MessageType {
        &COMMAND_DATA
    }

    fn to_bytes(&self) -> Vec<u8> {
        let bytes = write_i16s(&[self.roll, self.pitch, self.yaw, self.height]);
        debug_assert_eq!(bytes.len(), Self::PAYLOAD_LENGTH);
        bytes
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Display for CommandData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CommandData: roll={:.4}, pitch={:.4}, yaw={:.4}, height above ground={:.3}",
            self.roll(),
            self.pitch(),
            self.yaw(),
            self.height()
        )
    }
}

fn decode_command_data(payload: &[u8]) -> Result<Arc<dyn Message>, MessageError> {
    Ok(Arc::new(CommandData::from_bytes(payload)?))
}

/// Signals for the four rotors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MotorSignals {
    /// Front rotor
    pub front: i16,
    /// Right rotor
    pub right: i16,
    /// Rear rotor
    pub rear: i16,
    /// Left rotor
    pub left: i16,
    /// Sequence identifier
    pub id: i16,
}

impl MotorSignals {
    /// Encoded size in bytes
    pub const PAYLOAD_LENGTH: usize = 10;

    /// Decode from a frame payload
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::PayloadLength`] unless the payload is 10 bytes.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, MessageError> {
        let [front, right, rear, left, id] = read_i16s(&MOTOR_SIGNALS, payload)?;
        Ok(Self {
            front,
            right,
            rear,
            left,
            id,
        })
    }
}

impl Message for MotorSignals {
    fn message_type(&self) -> &'static MessageType {
        &MOTOR_SIGNALS
    }

    fn to_bytes(&self) -> Vec<u8> {
        write_i16s(&[self.front, self.right, self.rear, self.left, self.id])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Display for MotorSignals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MotorSignals: front={}, right={}, rear={}, left={}, id={}",
            self.front, self.right, self.rear, self.left, self.id
        )
    }
}

fn decode_motor_signals(payload: &[u8]) -> Result<Arc<dyn Message>, MessageError> {
    Ok(Arc::new(MotorSignals::from_bytes(payload)?))
}

/// Idle speed limit
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IdleLimit {
    /// Limit in raw motor units
    pub limit: i16,
}

impl IdleLimit {
    /// Decode from a frame payload
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::PayloadLength`] unless the payload is 2 bytes.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, MessageError> {
        let [limit] = read_i16s(&IDLE_LIMIT, payload)?;
        Ok(Self { limit })
    }
}

impl Message for IdleLimit {
    fn message_type(&self) -> &'static MessageType {
        &IDLE_LIMIT
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.limit.to_be_bytes().to_vec()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn decode_idle_limit(payload: &[u8]) -> Result<Arc<dyn Message>, MessageError> {
    Ok(Arc::new(IdleLimit::from_bytes(payload)?))
}

/// Switches the vehicle's sensors on or off
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnableSensors {
    /// Sensors enabled
    pub enabled: bool,
}

impl EnableSensors {
    /// Decode from a frame payload; any non-zero byte enables
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::PayloadLength`] unless the payload is 1 byte.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, MessageError> {
        match payload {
            [flag] => Ok(Self { enabled: *flag != 0 }),
            _ => Err(MessageError::PayloadLength {
                message_type: ENABLE_SENSORS.name,
                expected: 1,
                actual: payload.len(),
            }),
        }
    }
}

impl Message for EnableSensors {
    fn message_type(&self) -> &'static MessageType {
        &ENABLE_SENSORS
    }

    fn to_bytes(&self) -> Vec<u8> {
        vec![u8::from(self.enabled)]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn decode_enable_sensors(payload: &[u8]) -> Result<Arc<dyn Message>, MessageError> {
    Ok(Arc::new(EnableSensors::from_bytes(payload)?))
}

/// Attitude trim applied on top of every command
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrimValues {
    roll: i16,
    pitch: i16,
    yaw: i16,
}

impl TrimValues {
    /// Create from angles in degrees
    #[must_use]
    pub fn new(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self {
            roll: scale(roll, CommandData::ANGLE_FACTOR),
            pitch: scale(pitch, CommandData::ANGLE_FACTOR),
            yaw: scale(yaw, CommandData::ANGLE_FACTOR),
        }
    }

    /// Decode from a frame payload
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::PayloadLength`] unless the payload is 6 bytes.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, MessageError> {
        let [roll, pitch, yaw] = read_i16s(&TRIM_VALUES, payload)?;
        Ok(Self { roll, pitch, yaw })
    }

    /// Roll trim in degrees
    #[must_use]
    pub fn roll(&self) -> f64 {
        f64::from(self.roll) / CommandData::ANGLE_FACTOR
    }

    /// Pitch trim in degrees
    #[must_use]
    pub fn pitch(&self) -> f64 {
        f64::from(self.pitch) / CommandData::ANGLE_FACTOR
    }

    /// Yaw trim in degrees
    #[must_use]
    pub fn yaw(&self) -> f64 {
        f64::from(self.yaw) / CommandData::ANGLE_FACTOR
    }
}

impl Message for TrimValues {
    fn message_type(&self) -> &'static MessageType {
        &TRIM_VALUES
    }

    fn to_bytes(&self) -> Vec<u8> {
        write_i16s(&[self.roll, self.pitch, self.yaw])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Display for TrimValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TrimValues: roll={:.4}, pitch={:.4}, yaw={:.4}",
            self.roll(),
            self.pitch(),
            self.yaw()
        )
    }
}

fn decode_trim_values(payload: &[u8]) -> Result<Arc<dyn Message>, MessageError> {
    Ok(Arc::new(TrimValues::from_bytes(payload)?))
}

/// Rotor spin-up and spin-down tuning
///
/// The payload carries two reserved zero bytes after the four fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RevvingParameters {
    /// Idle speed limit in raw motor units
    pub idle_speed_limit: i16,
    /// Increment per step while revving up
    pub revving_up_step: i16,
    /// Decrement per step while revving down
    pub revving_down_step: i16,
    /// Integral decrement per step while revving down
    pub integral_down_step: i16,
}

impl RevvingParameters {
    /// Encoded size in bytes, reserved tail included
    pub const PAYLOAD_LENGTH: usize = 10;

    /// Decode from a frame payload; the reserved tail is ignored
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::PayloadLength`] unless the payload is 10 bytes.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, MessageError> {
        let [idle_speed_limit, revving_up_step, revving_down_step, integral_down_step, _reserved] =
            read_i16s(&REVVING_PARAMETERS, payload)?;
        Ok(Self {
            idle_speed_limit,
            revving_up_step,
            revving_down_step,
            integral_down_step,
        })
    }
}

impl Message for RevvingParameters {
    fn message_type(&self) -> &'static MessageType {
        &REVVING_PARAMETERS
    }

    fn to_bytes(&self) -> Vec<u8> {
        write_i16s(&[
            self.idle_speed_limit,
            self.revving_up_step,
            self.revving_down_step,
            self.integral_down_step,
            0,
        ])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn decode_revving_parameters(payload: &[u8]) -> Result<Arc<dyn Message>, MessageError> {
    Ok(Arc::new(RevvingParameters::from_bytes(payload)?))
}

/// Gain set shared by every controller parameter message
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControllerGains {
    /// Proportional gain
    pub proportional: i16,
    /// Integral gain
    pub integral: i16,
    /// Derivative gain
    pub derivative: i16,
    /// Second derivative gain
    pub second_derivative: i16,
}

impl ControllerGains {
    fn decode(message_type: &MessageType, payload: &[u8]) -> Result<Self, MessageError> {
        let [proportional, integral, derivative, second_derivative] =
            read_i16s(message_type, payload)?;
        Ok(Self {
            proportional,
            integral,
            derivative,
            second_derivative,
        })
    }

    fn encode(&self) -> Vec<u8> {
        write_i16s(&[
            self.proportional,
            self.integral,
            self.derivative,
            self.second_derivative,
        ])
    }
}

impl fmt::Display for ControllerGains {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "kProportional={}, kIntegral={}, kDerivative={}, kSecondDerivative={}",
            self.proportional, self.integral, self.derivative, self.second_derivative
        )
    }
}

/// Gains of the position controller
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PositionControllerParameters(pub ControllerGains);

impl PositionControllerParameters {
    /// Decode from a frame payload
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::PayloadLength`] unless the payload is 8 bytes.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, MessageError> {
        ControllerGains::decode(&POSITION_CONTROLLER_PARAMETERS, payload).map(Self)
    }
}

impl Message for PositionControllerParameters {
    fn message_type(&self) -> &'static MessageType {
        &POSITION_CONTROLLER_PARAMETERS
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.0.encode()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn decode_position_controller_parameters(
    payload: &[u8],
) -> Result<Arc<dyn Message>, MessageError> {
    Ok(Arc::new(PositionControllerParameters::from_bytes(payload)?))
}

/// Gains of the yaw controller
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct YawControllerParameters(pub ControllerGains);

impl YawControllerParameters {
    /// Decode from a frame payload
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::PayloadLength`] unless the payload is 8 bytes.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, MessageError> {
        ControllerGains::decode(&YAW_CONTROLLER_PARAMETERS, payload).map(Self)
    }
}

impl Message for YawControllerParameters {
    fn message_type(&self) -> &'static MessageType {
        &YAW_CONTROLLER_PARAMETERS
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.0.encode()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn decode_yaw_controller_parameters(payload: &[u8]) -> Result<Arc<dyn Message>, MessageError> {
    Ok(Arc::new(YawControllerParameters::from_bytes(payload)?))
}
