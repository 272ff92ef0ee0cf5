//! Structural checks run before any command takes effect.

use thiserror::Error;

use crate::protocol::{GroundCode, GroundCommand, Message, TelemetryCode, TelemetryRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid msg length: ID = 0x{msg_id:04X}, CC = {command_code}, Len = {observed}, Expected = {expected}")]
pub struct LengthError {
    pub msg_id: u16,
    pub command_code: u16,
    pub observed: usize,
    pub expected: usize,
}

/// Compares the observed message length with the size registered for its
/// command code.
pub fn validate(message: &Message, expected: usize) -> Result<(), LengthError> {
    let observed = message.total_length();
    if observed == expected {
        Ok(())
    } else {
        Err(LengthError {
            msg_id: message.msg_id,
            command_code: message.command_code,
            observed,
            expected,
        })
    }
}

/// Length-checks a ground command and decodes its arguments.
///
/// Returns `None` for unrecognized codes, which carry no registered size.
pub fn decode_ground(
    message: &Message,
    code: GroundCode,
) -> Option<Result<GroundCommand, LengthError>> {
    let expected = code.expected_size()?;
    let command = match code {
        GroundCode::Noop => GroundCommand::Noop,
        GroundCode::ResetCounters => GroundCommand::ResetCounters,
        GroundCode::Enable => GroundCommand::Enable,
        GroundCode::Disable => GroundCommand::Disable,
        GroundCode::Configure => return Some(decode_configure(message, expected)),
        GroundCode::Switch => return Some(decode_switch(message, expected)),
        GroundCode::Unknown(_) => return None,
    };
    Some(validate(message, expected).map(|()| command))
}

fn decode_configure(message: &Message, expected: usize) -> Result<GroundCommand, LengthError> {
    validate(message, expected)?;
    let word: [u8; 4] = message.payload.as_slice().try_into().map_err(|_| LengthError {
        msg_id: message.msg_id,
        command_code: message.command_code,
        observed: message.total_length(),
        expected,
    })?;
    Ok(GroundCommand::Configure {
        device_cfg: u32::from_be_bytes(word),
    })
}

fn decode_switch(message: &Message, expected: usize) -> Result<GroundCommand, LengthError> {
    validate(message, expected)?;
    match *message.payload.as_slice() {
        [switch, state] => Ok(GroundCommand::Switch { switch, state }),
        _ => Err(LengthError {
            msg_id: message.msg_id,
            command_code: message.command_code,
            observed: message.total_length(),
            expected,
        }),
    }
}

/// Length-checks a telemetry request. `None` for unrecognized codes.
pub fn decode_telemetry(
    message: &Message,
    code: TelemetryCode,
) -> Option<Result<TelemetryRequest, LengthError>> {
    let expected = code.expected_size()?;
    let request = match code {
        TelemetryCode::Housekeeping => TelemetryRequest::Housekeeping,
        TelemetryCode::DeviceData => TelemetryRequest::DeviceData,
        TelemetryCode::Unknown(_) => return None,
    };
    Some(validate(message, expected).map(|()| request))
}
