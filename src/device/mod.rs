//! Power board access.
//!
//! [`DeviceGateway`] is the synchronous request/response seam the dispatcher
//! drives. [`SerialGateway`] implements it with the framed board protocol over
//! any [`DeviceLink`]; [`SimulatedEps`] is a link that behaves like the board.

pub mod frame;
pub mod serial;
pub mod sim;

pub use frame::{DeviceCommand, FrameError};
pub use serial::{DeviceLink, LinkError, SerialGateway};
pub use sim::{DeviceFault, SimulatedEps};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of switched load outputs on the board.
pub const SWITCH_COUNT: u8 = 8;
pub const SWITCH_ON: u8 = 0xAA;
pub const SWITCH_OFF: u8 = 0x00;

/// Health words reported by the board on a housekeeping request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HkFields {
    pub counter: u32,
    pub config: u32,
    pub status: u32,
}

/// Measurement block reported by the board on a data request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFields {
    pub counter: u32,
    pub x: u16,
    pub y: u16,
    pub z: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle(pub i32);

/// An open connection to the board. Only exists while the device is enabled.
#[derive(Debug, PartialEq, Eq)]
pub struct Session {
    handle: DeviceHandle,
    port: String,
}

impl Session {
    pub fn new(handle: DeviceHandle, port: impl Into<String>) -> Self {
        Self {
            handle,
            port: port.into(),
        }
    }

    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    pub fn port(&self) -> &str {
        &self.port
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    #[error("bad reply frame: {0}")]
    Frame(#[from] FrameError),

    #[error("timed out after {received} of {expected} reply bytes")]
    Timeout { expected: usize, received: usize },

    #[error("session handle {0:?} does not match the open port")]
    StaleSession(DeviceHandle),

    #[error("command echo mismatch")]
    EchoMismatch,

    #[error("switch {switch} cannot be set to 0x{state:02X}")]
    InvalidSwitch { switch: u8, state: u8 },
}

/// Synchronous access to the power board. Every call blocks until the board
/// answers or the transport gives up.
pub trait DeviceGateway {
    fn open(&mut self) -> Result<Session, DeviceError>;
    fn close(&mut self, session: &Session) -> Result<(), DeviceError>;
    fn read_status(&mut self, session: &Session) -> Result<HkFields, DeviceError>;
    fn read_data(&mut self, session: &Session) -> Result<DataFields, DeviceError>;
    fn write_config(&mut self, handle: DeviceHandle, payload: u32) -> Result<(), DeviceError>;
    /// Turns one load output on ([`SWITCH_ON`]) or off ([`SWITCH_OFF`]).
    fn command_switch(
        &mut self,
        handle: DeviceHandle,
        switch: u8,
        state: u8,
    ) -> Result<(), DeviceError>;
}
