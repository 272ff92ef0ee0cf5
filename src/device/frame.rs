//! Board wire frames.
//!
//! ```text
//! command : DE AD | cmd:u8 | payload:u32 BE | BE EF          (9 bytes)
//! switch  : payload = 00 00 | switch:u8 | state:u8
//! hk      : DE AD | counter:u32 | config:u32 | status:u32 | BE EF   (16 bytes)
//! data    : DE AD | counter:u32 | x:u16 | y:u16 | z:u16 | BE EF     (14 bytes)
//! ```

use static_assertions::const_assert_eq;
use thiserror::Error;

use super::{DataFields, HkFields};

pub const FRAME_HEADER: [u8; 2] = [0xDE, 0xAD];
pub const FRAME_TRAILER: [u8; 2] = [0xBE, 0xEF];
pub const HDR_TRL_LEN: usize = 4;

pub const CMD_FRAME_SIZE: usize = 9;
pub const HK_FIELDS_LEN: usize = 12;
pub const HK_REPLY_SIZE: usize = HK_FIELDS_LEN + HDR_TRL_LEN;
pub const DATA_FIELDS_LEN: usize = 10;
pub const DATA_REPLY_SIZE: usize = DATA_FIELDS_LEN + HDR_TRL_LEN;

const_assert_eq!(HDR_TRL_LEN, FRAME_HEADER.len() + FRAME_TRAILER.len());
const_assert_eq!(CMD_FRAME_SIZE, HDR_TRL_LEN + 1 + 4);
const_assert_eq!(HK_REPLY_SIZE, 16);
const_assert_eq!(DATA_REPLY_SIZE, 14);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceCommand {
    Noop = 0x00,
    RequestHk = 0x01,
    RequestData = 0x02,
    Configure = 0x03,
    Switch = 0x04,
}

impl TryFrom<u8> for DeviceCommand {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(DeviceCommand::Noop),
            0x01 => Ok(DeviceCommand::RequestHk),
            0x02 => Ok(DeviceCommand::RequestData),
            0x03 => Ok(DeviceCommand::Configure),
            0x04 => Ok(DeviceCommand::Switch),
            other => Err(FrameError::UnknownCommand(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("bad frame header {0:02X?}")]
    BadHeader([u8; 2]),

    #[error("bad frame trailer {0:02X?}")]
    BadTrailer([u8; 2]),

    #[error("unknown device command 0x{0:02X}")]
    UnknownCommand(u8),
}

pub fn encode_command(command: DeviceCommand, payload: u32) -> [u8; CMD_FRAME_SIZE] {
    let mut frame = [0u8; CMD_FRAME_SIZE];
    frame[..2].copy_from_slice(&FRAME_HEADER);
    frame[2] = command as u8;
    frame[3..7].copy_from_slice(&payload.to_be_bytes());
    frame[7..].copy_from_slice(&FRAME_TRAILER);
    frame
}

pub fn decode_command(frame: &[u8]) -> Result<(DeviceCommand, u32), FrameError> {
    let body = unwrap_envelope(frame, CMD_FRAME_SIZE)?;
    let command = DeviceCommand::try_from(body[0])?;
    Ok((command, read_u32(&body[1..5])))
}

pub fn switch_payload(switch: u8, state: u8) -> u32 {
    u32::from_be_bytes([0, 0, switch, state])
}

/// Splits a switch command payload into `(switch, state)`.
pub fn split_switch_payload(payload: u32) -> (u8, u8) {
    let [_, _, switch, state] = payload.to_be_bytes();
    (switch, state)
}

pub fn encode_hk(fields: &HkFields) -> [u8; HK_REPLY_SIZE] {
    let mut frame = [0u8; HK_REPLY_SIZE];
    frame[..2].copy_from_slice(&FRAME_HEADER);
    frame[2..6].copy_from_slice(&fields.counter.to_be_bytes());
    frame[6..10].copy_from_slice(&fields.config.to_be_bytes());
    frame[10..14].copy_from_slice(&fields.status.to_be_bytes());
    frame[14..].copy_from_slice(&FRAME_TRAILER);
    frame
}

pub fn decode_hk(frame: &[u8]) -> Result<HkFields, FrameError> {
    let body = unwrap_envelope(frame, HK_REPLY_SIZE)?;
    Ok(HkFields {
        counter: read_u32(&body[0..4]),
        config: read_u32(&body[4..8]),
        status: read_u32(&body[8..12]),
    })
}

pub fn encode_data(fields: &DataFields) -> [u8; DATA_REPLY_SIZE] {
    let mut frame = [0u8; DATA_REPLY_SIZE];
    frame[..2].copy_from_slice(&FRAME_HEADER);
    frame[2..6].copy_from_slice(&fields.counter.to_be_bytes());
    frame[6..8].copy_from_slice(&fields.x.to_be_bytes());
    frame[8..10].copy_from_slice(&fields.y.to_be_bytes());
    frame[10..12].copy_from_slice(&fields.z.to_be_bytes());
    frame[12..].copy_from_slice(&FRAME_TRAILER);
    frame
}

pub fn decode_data(frame: &[u8]) -> Result<DataFields, FrameError> {
    let body = unwrap_envelope(frame, DATA_REPLY_SIZE)?;
    Ok(DataFields {
        counter: read_u32(&body[0..4]),
        x: read_u16(&body[4..6]),
        y: read_u16(&body[6..8]),
        z: read_u16(&body[8..10]),
    })
}

/// Checks length, header and trailer, returning the bytes between them.
fn unwrap_envelope(frame: &[u8], expected: usize) -> Result<&[u8], FrameError> {
    if frame.len() != expected {
        return Err(FrameError::Length {
            expected,
            actual: frame.len(),
        });
    }
    let header = [frame[0], frame[1]];
    if header != FRAME_HEADER {
        return Err(FrameError::BadHeader(header));
    }
    let trailer = [frame[expected - 2], frame[expected - 1]];
    if trailer != FRAME_TRAILER {
        return Err(FrameError::BadTrailer(trailer));
    }
    Ok(&frame[2..expected - 2])
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}
