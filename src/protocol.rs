use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::MessageIds;
use crate::device::{DataFields, HkFields};

/// Primary plus secondary command header, counted in every observed length.
pub const CMD_HEADER_SIZE: usize = 8;
pub const NOARGS_CMD_SIZE: usize = CMD_HEADER_SIZE;
pub const CONFIG_CMD_SIZE: usize = CMD_HEADER_SIZE + 4;
/// Switch number then requested state, one byte each.
pub const SWITCH_CMD_SIZE: usize = CMD_HEADER_SIZE + 2;

pub const MAX_MESSAGE_SIZE: usize = 512;
pub const MAX_PACKET_SIZE: usize = 1024;

pub type MessageBuffer = ArrayString<MAX_MESSAGE_SIZE>;
pub type PacketBuffer = ArrayString<MAX_PACKET_SIZE>;

/// Inbound bus message as delivered on the command pipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub msg_id: u16,
    pub command_code: u16,
    #[serde(with = "serde_bytes", default)]
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(msg_id: u16, command_code: u16) -> Self {
        Self {
            msg_id,
            command_code,
            payload: Vec::new(),
        }
    }

    pub fn with_payload(msg_id: u16, command_code: u16, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            msg_id,
            command_code,
            payload: payload.into(),
        }
    }

    /// Total message length including the command header.
    pub fn total_length(&self) -> usize {
        CMD_HEADER_SIZE + self.payload.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundCode {
    Noop,
    ResetCounters,
    Enable,
    Disable,
    Configure,
    Switch,
    Unknown(u16),
}

impl From<u16> for GroundCode {
    fn from(code: u16) -> Self {
        match code {
            0 => GroundCode::Noop,
            1 => GroundCode::ResetCounters,
            2 => GroundCode::Enable,
            3 => GroundCode::Disable,
            4 => GroundCode::Configure,
            5 => GroundCode::Switch,
            other => GroundCode::Unknown(other),
        }
    }
}

impl GroundCode {
    pub fn code(self) -> u16 {
        match self {
            GroundCode::Noop => 0,
            GroundCode::ResetCounters => 1,
            GroundCode::Enable => 2,
            GroundCode::Disable => 3,
            GroundCode::Configure => 4,
            GroundCode::Switch => 5,
            GroundCode::Unknown(code) => code,
        }
    }

    /// Registered message size for the code, `None` when unrecognized.
    pub fn expected_size(self) -> Option<usize> {
        match self {
            GroundCode::Configure => Some(CONFIG_CMD_SIZE),
            GroundCode::Switch => Some(SWITCH_CMD_SIZE),
            GroundCode::Unknown(_) => None,
            _ => Some(NOARGS_CMD_SIZE),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryCode {
    Housekeeping,
    DeviceData,
    Unknown(u16),
}

impl From<u16> for TelemetryCode {
    fn from(code: u16) -> Self {
        match code {
            0 => TelemetryCode::Housekeeping,
            1 => TelemetryCode::DeviceData,
            other => TelemetryCode::Unknown(other),
        }
    }
}

impl TelemetryCode {
    pub fn code(self) -> u16 {
        match self {
            TelemetryCode::Housekeeping => 0,
            TelemetryCode::DeviceData => 1,
            TelemetryCode::Unknown(code) => code,
        }
    }

    pub fn expected_size(self) -> Option<usize> {
        match self {
            TelemetryCode::Unknown(_) => None,
            _ => Some(NOARGS_CMD_SIZE),
        }
    }
}

/// Top-level category of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    GroundCommand(GroundCode),
    TelemetryRequest(TelemetryCode),
    Unknown(u16),
}

impl Route {
    pub fn classify(message: &Message, ids: &MessageIds) -> Self {
        if message.msg_id == ids.cmd {
            Route::GroundCommand(GroundCode::from(message.command_code))
        } else if message.msg_id == ids.req_hk {
            Route::TelemetryRequest(TelemetryCode::from(message.command_code))
        } else {
            Route::Unknown(message.msg_id)
        }
    }
}

/// Ground command decoded from a length-checked message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundCommand {
    Noop,
    ResetCounters,
    Enable,
    Disable,
    Configure { device_cfg: u32 },
    Switch { switch: u8, state: u8 },
}

/// Telemetry request decoded from a length-checked message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryRequest {
    Housekeeping,
    DeviceData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    Disabled,
    Enabled,
}

impl DeviceState {
    pub fn is_enabled(self) -> bool {
        matches!(self, DeviceState::Enabled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    pub msg_id: u16,
    pub timestamp_ms: u64,
    pub sequence: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HousekeepingRecord {
    pub command_error_count: u32,
    pub command_count: u32,
    pub device_error_count: u32,
    pub device_count: u32,
    pub device_enabled: DeviceState,
    pub device_hk: HkFields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDataRecord {
    pub counter: u32,
    pub x: u16,
    pub y: u16,
    pub z: u16,
}

impl From<DataFields> for DeviceDataRecord {
    fn from(data: DataFields) -> Self {
        Self {
            counter: data.counter,
            x: data.x,
            y: data.y,
            z: data.z,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TelemetryBody {
    Housekeeping(HousekeepingRecord),
    DeviceData(DeviceDataRecord),
}

/// Timestamped telemetry handed to the bus for publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundPacket {
    pub header: PacketHeader,
    pub body: TelemetryBody,
}

impl OutboundPacket {
    pub fn housekeeping(&self) -> Option<&HousekeepingRecord> {
        match &self.body {
            TelemetryBody::Housekeeping(record) => Some(record),
            TelemetryBody::DeviceData(_) => None,
        }
    }

    pub fn device_data(&self) -> Option<&DeviceDataRecord> {
        match &self.body {
            TelemetryBody::DeviceData(record) => Some(record),
            TelemetryBody::Housekeeping(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid JSON format")]
    InvalidJson,
    #[error("message exceeds buffer size")]
    MessageTooLarge,
    #[error("serialization failed")]
    SerializationError,
}

/// Line-oriented JSON codec used on the TCP side of the bus.
#[derive(Debug)]
pub struct LineCodec {
    message_buffer: MessageBuffer,
    packet_buffer: PacketBuffer,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LineCodec {
    pub fn new() -> Self {
        Self {
            message_buffer: ArrayString::new(),
            packet_buffer: ArrayString::new(),
        }
    }

    pub fn parse_message(&mut self, line: &str) -> Result<Message, ProtocolError> {
        self.message_buffer.clear();
        self.message_buffer
            .try_push_str(line)
            .map_err(|_| ProtocolError::MessageTooLarge)?;

        serde_json::from_str::<Message>(&self.message_buffer)
            .map_err(|_| ProtocolError::InvalidJson)
    }

    pub fn serialize_message(&mut self, message: &Message) -> Result<&str, ProtocolError> {
        self.message_buffer.clear();
        let json = serde_json::to_string(message).map_err(|_| ProtocolError::SerializationError)?;
        self.message_buffer
            .try_push_str(&json)
            .map_err(|_| ProtocolError::MessageTooLarge)?;
        Ok(&self.message_buffer)
    }

    pub fn serialize_packet(&mut self, packet: &OutboundPacket) -> Result<&str, ProtocolError> {
        self.packet_buffer.clear();
        let json = serde_json::to_string(packet).map_err(|_| ProtocolError::SerializationError)?;
        self.packet_buffer
            .try_push_str(&json)
            .map_err(|_| ProtocolError::MessageTooLarge)?;
        Ok(&self.packet_buffer)
    }

    pub fn parse_packet(&self, line: &str) -> Result<OutboundPacket, ProtocolError> {
        if line.len() > MAX_PACKET_SIZE {
            return Err(ProtocolError::MessageTooLarge);
        }
        serde_json::from_str(line).map_err(|_| ProtocolError::InvalidJson)
    }
}
