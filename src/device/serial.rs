use thiserror::Error;
use tracing::{debug, trace};

use super::frame::{self, DeviceCommand, CMD_FRAME_SIZE, DATA_REPLY_SIZE, HK_REPLY_SIZE};
use super::{
    DataFields, DeviceError, DeviceGateway, DeviceHandle, HkFields, Session, SWITCH_COUNT,
    SWITCH_OFF, SWITCH_ON,
};
use crate::config::DeviceConfig;

/// Upper bound on bytes dropped by a single [`DeviceLink::discard_input`].
pub const MAX_DISCARD_BYTES: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("port is not open")]
    NotOpen,

    #[error("port is already open")]
    AlreadyOpen,

    #[error("bus busy")]
    Busy,

    #[error("write not acknowledged")]
    Nack,

    #[error("i/o error: {0}")]
    Io(String),
}

/// Byte-level transport to the board (UART, I2C bridge, simulator).
pub trait DeviceLink {
    fn open(&mut self, port: &str, baud_rate: u32) -> Result<(), LinkError>;
    fn close(&mut self) -> Result<(), LinkError>;
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError>;
    /// Returns `WouldBlock` while no reply byte is available yet.
    fn read_byte(&mut self) -> nb::Result<u8, LinkError>;

    /// Drops bytes already waiting on the link and returns how many were
    /// dropped. Stops at [`MAX_DISCARD_BYTES`].
    fn discard_input(&mut self) -> Result<usize, LinkError> {
        let mut dropped = 0;
        while dropped < MAX_DISCARD_BYTES {
            match self.read_byte() {
                Ok(_) => dropped += 1,
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
        Ok(dropped)
    }
}

/// Gateway speaking the framed board protocol over a [`DeviceLink`].
#[derive(Debug)]
pub struct SerialGateway<L: DeviceLink> {
    link: L,
    config: DeviceConfig,
}

impl<L: DeviceLink> SerialGateway<L> {
    pub fn new(link: L, config: DeviceConfig) -> Self {
        Self { link, config }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn handle(&self) -> DeviceHandle {
        DeviceHandle(self.config.handle)
    }

    fn check_session(&self, handle: DeviceHandle) -> Result<(), DeviceError> {
        if handle == self.handle() {
            Ok(())
        } else {
            Err(DeviceError::StaleSession(handle))
        }
    }

    /// Writes a command frame. Anything left over from an earlier exchange is
    /// dropped first so the next reply read belongs to this command.
    fn send(
        &mut self,
        command: DeviceCommand,
        payload: u32,
    ) -> Result<[u8; CMD_FRAME_SIZE], DeviceError> {
        let stale = self.link.discard_input()?;
        if stale > 0 {
            debug!(stale, ?command, "dropped stale reply bytes before command");
        }
        let frame = frame::encode_command(command, payload);
        trace!(?command, payload, "writing device frame");
        self.link.write_all(&frame)?;
        Ok(frame)
    }

    /// Drains the link after an unusable reply and hands the error back.
    fn resync(&mut self, error: DeviceError) -> DeviceError {
        match self.link.discard_input() {
            Ok(0) => {}
            Ok(dropped) => debug!(dropped, "dropped remainder of unusable reply"),
            Err(e) => debug!("could not drain link after bad reply: {}", e),
        }
        error
    }

    /// Sends a command the board answers by echoing the frame.
    fn echoed(&mut self, command: DeviceCommand, payload: u32) -> Result<(), DeviceError> {
        let sent = self.send(command, payload)?;
        let mut echo = [0u8; CMD_FRAME_SIZE];
        self.read_reply(&mut echo)?;
        if echo != sent {
            return Err(self.resync(DeviceError::EchoMismatch));
        }
        Ok(())
    }

    fn read_reply(&mut self, buf: &mut [u8]) -> Result<(), DeviceError> {
        let budget = self.config.read_poll_budget;
        let mut received = 0;
        let mut idle_polls = 0u32;

        while received < buf.len() {
            match self.link.read_byte() {
                Ok(byte) => {
                    buf[received] = byte;
                    received += 1;
                    idle_polls = 0;
                }
                Err(nb::Error::WouldBlock) => {
                    idle_polls += 1;
                    if idle_polls >= budget {
                        return Err(self.resync(DeviceError::Timeout {
                            expected: buf.len(),
                            received,
                        }));
                    }
                }
                Err(nb::Error::Other(e)) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl<L: DeviceLink> DeviceGateway for SerialGateway<L> {
    fn open(&mut self) -> Result<Session, DeviceError> {
        self.link.open(&self.config.port, self.config.baud_rate)?;
        debug!(port = %self.config.port, baud = self.config.baud_rate, "device port opened");
        Ok(Session::new(self.handle(), self.config.port.clone()))
    }

    fn close(&mut self, session: &Session) -> Result<(), DeviceError> {
        self.check_session(session.handle())?;
        self.link.close()?;
        debug!(port = %session.port(), "device port closed");
        Ok(())
    }

    fn read_status(&mut self, session: &Session) -> Result<HkFields, DeviceError> {
        self.check_session(session.handle())?;
        self.send(DeviceCommand::RequestHk, 0)?;
        let mut reply = [0u8; HK_REPLY_SIZE];
        self.read_reply(&mut reply)?;
        frame::decode_hk(&reply).map_err(|e| self.resync(e.into()))
    }

    fn read_data(&mut self, session: &Session) -> Result<DataFields, DeviceError> {
        self.check_session(session.handle())?;
        self.send(DeviceCommand::RequestData, 0)?;
        let mut reply = [0u8; DATA_REPLY_SIZE];
        self.read_reply(&mut reply)?;
        frame::decode_data(&reply).map_err(|e| self.resync(e.into()))
    }

    fn write_config(&mut self, handle: DeviceHandle, payload: u32) -> Result<(), DeviceError> {
        self.check_session(handle)?;
        self.echoed(DeviceCommand::Configure, payload)
    }

    fn command_switch(
        &mut self,
        handle: DeviceHandle,
        switch: u8,
        state: u8,
    ) -> Result<(), DeviceError> {
        self.check_session(handle)?;
        if switch >= SWITCH_COUNT || !matches!(state, SWITCH_ON | SWITCH_OFF) {
            return Err(DeviceError::InvalidSwitch { switch, state });
        }
        self.echoed(DeviceCommand::Switch, frame::switch_payload(switch, state))
    }
}
