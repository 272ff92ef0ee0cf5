use thiserror::Error;

use crate::bus::BusError;
use crate::device::DeviceError;
use crate::protocol::DeviceState;
use crate::validator::LengthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOperation {
    Open,
    Close,
    ReadStatus,
    ReadData,
    WriteConfig,
    Switch,
}

impl core::fmt::Display for DeviceOperation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DeviceOperation::Open => write!(f, "open"),
            DeviceOperation::Close => write!(f, "close"),
            DeviceOperation::ReadStatus => write!(f, "read status"),
            DeviceOperation::ReadData => write!(f, "read data"),
            DeviceOperation::WriteConfig => write!(f, "write config"),
            DeviceOperation::Switch => write!(f, "switch"),
        }
    }
}

/// Recoverable failures. The dispatcher absorbs all of these; they surface
/// only as counter increments and events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error(transparent)]
    LengthMismatch(#[from] LengthError),

    #[error("invalid command packet, MID = 0x{0:04X}")]
    UnknownIdentifier(u16),

    #[error("invalid command code for packet, MID = 0x{msg_id:04X}, cmdCode = 0x{command_code:X}")]
    UnknownCommandCode { msg_id: u16, command_code: u16 },

    #[error("device {operation} rejected while {state:?}")]
    InvalidDeviceState {
        operation: DeviceOperation,
        state: DeviceState,
    },

    #[error("device {operation} failed: {source}")]
    DeviceOperation {
        operation: DeviceOperation,
        source: DeviceError,
    },
}

/// Failures that stop the application.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("error creating command pipe: {0}")]
    CreatePipe(#[source] BusError),

    #[error("error subscribing to MID 0x{msg_id:04X}: {source}")]
    Subscribe { msg_id: u16, source: BusError },

    #[error("command pipe read error: {0}")]
    Receive(#[source] BusError),

    #[error("application has not been initialized")]
    NotInitialized,
}
