//! Message classification and command execution.
//!
//! Every inbound message is routed by identifier, then by command code. The
//! length check always runs before a command has any effect, and a command's
//! action always runs before the telemetry it produces is published.
//!
//! Counter bookkeeping per message:
//! - exactly one of `command_count` / `command_error_count` moves;
//! - each device-gateway attempt (or rejected lifecycle transition) moves
//!   exactly one of `device_count` / `device_error_count`.

use tracing::debug;

use crate::bus::SoftwareBus;
use crate::config::MessageIds;
use crate::device::{DeviceGateway, DeviceHandle, Session};
use crate::error::{CommandError, DeviceOperation};
use crate::events::{EventId, EventSink, Severity};
use crate::protocol::{
    DeviceState, GroundCode, GroundCommand, Message, Route, TelemetryCode, TelemetryRequest,
};
use crate::state::ApplicationState;
use crate::telemetry::TelemetryAggregator;
use crate::validator::{self, LengthError};

/// What a successfully processed message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Noop,
    CountersReset,
    DeviceEnabled,
    DeviceDisabled,
    Configured,
    SwitchSet,
    HousekeepingPublished,
    DeviceDataPublished,
    DeviceDataSkipped,
}

/// Everything a single dispatch may touch, borrowed from the driver loop.
pub struct DispatchContext<'a, G, B, E> {
    pub state: &'a mut ApplicationState,
    pub telemetry: &'a mut TelemetryAggregator,
    pub gateway: &'a mut G,
    pub bus: &'a mut B,
    pub events: &'a mut E,
}

#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    ids: MessageIds,
    device_handle: DeviceHandle,
}

impl CommandDispatcher {
    pub fn new(ids: MessageIds, device_handle: DeviceHandle) -> Self {
        Self { ids, device_handle }
    }

    pub fn message_ids(&self) -> &MessageIds {
        &self.ids
    }

    pub fn dispatch<G, B, E>(
        &self,
        message: &Message,
        cx: &mut DispatchContext<'_, G, B, E>,
    ) -> Result<Action, CommandError>
    where
        G: DeviceGateway,
        B: SoftwareBus,
        E: EventSink,
    {
        match Route::classify(message, &self.ids) {
            Route::GroundCommand(code) => self.process_ground_command(message, code, cx),
            Route::TelemetryRequest(code) => self.process_telemetry_request(message, code, cx),
            Route::Unknown(msg_id) => {
                cx.state.counters.record_command(false);
                let error = CommandError::UnknownIdentifier(msg_id);
                cx.events.emit_fmt(
                    EventId::ProcessCmdErr,
                    Severity::Error,
                    format_args!("EPS: {}", error),
                );
                Err(error)
            }
        }
    }

    fn process_ground_command<G, B, E>(
        &self,
        message: &Message,
        code: GroundCode,
        cx: &mut DispatchContext<'_, G, B, E>,
    ) -> Result<Action, CommandError>
    where
        G: DeviceGateway,
        B: SoftwareBus,
        E: EventSink,
    {
        let command = match validator::decode_ground(message, code) {
            Some(Ok(command)) => {
                cx.state.counters.record_command(true);
                command
            }
            Some(Err(length)) => return Err(reject_length(length, cx)),
            None => return Err(reject_code(message, EventId::CmdErr, cx)),
        };

        match command {
            GroundCommand::Noop => {
                cx.events.emit(
                    EventId::CmdNoopInf,
                    Severity::Information,
                    "EPS: NOOP command received",
                );
                Ok(Action::Noop)
            }
            GroundCommand::ResetCounters => {
                cx.events.emit(
                    EventId::CmdResetInf,
                    Severity::Information,
                    "EPS: RESET counters command received",
                );
                cx.state.counters.reset();
                Ok(Action::CountersReset)
            }
            GroundCommand::Enable => {
                cx.events.emit(
                    EventId::CmdEnableInf,
                    Severity::Information,
                    "EPS: Enable command received",
                );
                self.enable_device(cx)
            }
            GroundCommand::Disable => {
                cx.events.emit(
                    EventId::CmdDisableInf,
                    Severity::Information,
                    "EPS: Disable command received",
                );
                self.disable_device(cx)
            }
            GroundCommand::Configure { device_cfg } => {
                cx.events.emit(
                    EventId::CmdConfigInf,
                    Severity::Information,
                    "EPS: Configuration command received",
                );
                self.configure_device(device_cfg, cx)
            }
            GroundCommand::Switch { switch, state } => {
                cx.events.emit(
                    EventId::CmdSwitchInf,
                    Severity::Information,
                    "EPS: Switch command received",
                );
                self.command_switch(switch, state, cx)
            }
        }
    }

    fn process_telemetry_request<G, B, E>(
        &self,
        message: &Message,
        code: TelemetryCode,
        cx: &mut DispatchContext<'_, G, B, E>,
    ) -> Result<Action, CommandError>
    where
        G: DeviceGateway,
        B: SoftwareBus,
        E: EventSink,
    {
        let request = match validator::decode_telemetry(message, code) {
            Some(Ok(request)) => {
                cx.state.counters.record_command(true);
                request
            }
            Some(Err(length)) => return Err(reject_length(length, cx)),
            None => return Err(reject_code(message, EventId::DeviceTlmErr, cx)),
        };

        match request {
            TelemetryRequest::Housekeeping => self.report_housekeeping(cx),
            TelemetryRequest::DeviceData => self.report_device_data(cx),
        }
    }

    /// Opens the device session. Rejected without touching the gateway when
    /// a session is already open.
    pub fn enable_device<G, B, E>(
        &self,
        cx: &mut DispatchContext<'_, G, B, E>,
    ) -> Result<Action, CommandError>
    where
        G: DeviceGateway,
        E: EventSink,
    {
        if cx.state.device_enabled().is_enabled() {
            cx.state.counters.record_device(false);
            cx.events.emit(
                EventId::EnableErr,
                Severity::Error,
                "EPS: Device enable failed, already enabled",
            );
            return Err(CommandError::InvalidDeviceState {
                operation: DeviceOperation::Open,
                state: DeviceState::Enabled,
            });
        }

        match cx.gateway.open() {
            Ok(session) => {
                cx.state.counters.record_device(true);
                cx.state.attach_session(session);
                cx.events.emit(EventId::EnableInf, Severity::Information, "EPS: Device enabled");
                Ok(Action::DeviceEnabled)
            }
            Err(source) => {
                cx.state.counters.record_device(false);
                cx.events.emit_fmt(
                    EventId::UartInitErr,
                    Severity::Error,
                    format_args!("EPS: UART port initialization error: {}", source),
                );
                Err(CommandError::DeviceOperation {
                    operation: DeviceOperation::Open,
                    source,
                })
            }
        }
    }

    /// Closes the device session. A failed close leaves the device marked
    /// enabled; the session's real condition is then unknown.
    pub fn disable_device<G, B, E>(
        &self,
        cx: &mut DispatchContext<'_, G, B, E>,
    ) -> Result<Action, CommandError>
    where
        G: DeviceGateway,
        E: EventSink,
    {
        let Some(session) = cx.state.session() else {
            cx.state.counters.record_device(false);
            cx.events.emit(
                EventId::DisableErr,
                Severity::Error,
                "EPS: Device disable failed, already disabled",
            );
            return Err(CommandError::InvalidDeviceState {
                operation: DeviceOperation::Close,
                state: DeviceState::Disabled,
            });
        };

        match cx.gateway.close(session) {
            Ok(()) => {
                cx.state.counters.record_device(true);
                cx.state.detach_session();
                cx.events.emit(EventId::DisableInf, Severity::Information, "EPS: Device disabled");
                Ok(Action::DeviceDisabled)
            }
            Err(source) => {
                cx.state.counters.record_device(false);
                cx.events.emit_fmt(
                    EventId::UartCloseErr,
                    Severity::Error,
                    format_args!("EPS: UART port close error: {}", source),
                );
                Err(CommandError::DeviceOperation {
                    operation: DeviceOperation::Close,
                    source,
                })
            }
        }
    }

    /// Issued whether or not the device is enabled; the outcome shows up in
    /// the device counters only.
    fn configure_device<G, B, E>(
        &self,
        device_cfg: u32,
        cx: &mut DispatchContext<'_, G, B, E>,
    ) -> Result<Action, CommandError>
    where
        G: DeviceGateway,
    {
        let handle = cx.state.session().map_or(self.device_handle, Session::handle);
        match cx.gateway.write_config(handle, device_cfg) {
            Ok(()) => {
                cx.state.counters.record_device(true);
                debug!(device_cfg, "device configuration written");
                Ok(Action::Configured)
            }
            Err(source) => {
                cx.state.counters.record_device(false);
                debug!(device_cfg, "device configuration failed: {}", source);
                Err(CommandError::DeviceOperation {
                    operation: DeviceOperation::WriteConfig,
                    source,
                })
            }
        }
    }

    /// Drives one load output. Like Configure it goes to the board whatever
    /// the lifecycle state, but both outcomes are reported as events.
    fn command_switch<G, B, E>(
        &self,
        switch: u8,
        state: u8,
        cx: &mut DispatchContext<'_, G, B, E>,
    ) -> Result<Action, CommandError>
    where
        G: DeviceGateway,
        E: EventSink,
    {
        let handle = cx.state.session().map_or(self.device_handle, Session::handle);
        match cx.gateway.command_switch(handle, switch, state) {
            Ok(()) => {
                cx.state.counters.record_device(true);
                cx.events.emit_fmt(
                    EventId::SwitchInf,
                    Severity::Information,
                    format_args!("EPS: Switch {} set to 0x{:02x}", switch, state),
                );
                Ok(Action::SwitchSet)
            }
            Err(source) => {
                cx.state.counters.record_device(false);
                cx.events.emit_fmt(
                    EventId::SwitchErr,
                    Severity::Error,
                    format_args!(
                        "EPS: Set switch {} to 0x{:02x} failed: {}",
                        switch, state, source
                    ),
                );
                Err(CommandError::DeviceOperation {
                    operation: DeviceOperation::Switch,
                    source,
                })
            }
        }
    }

    /// Refreshes the snapshot when enabled, then always publishes
    /// housekeeping. A disabled device is not an error here.
    fn report_housekeeping<G, B, E>(
        &self,
        cx: &mut DispatchContext<'_, G, B, E>,
    ) -> Result<Action, CommandError>
    where
        G: DeviceGateway,
        B: SoftwareBus,
        E: EventSink,
    {
        let read = match cx.state.session() {
            Some(session) => Some(cx.gateway.read_status(session)),
            None => None,
        };

        let outcome = match read {
            Some(Ok(hk)) => {
                cx.state.housekeeping_snapshot = hk;
                cx.state.counters.record_device(true);
                Ok(Action::HousekeepingPublished)
            }
            Some(Err(source)) => {
                cx.state.counters.record_device(false);
                cx.events.emit_fmt(
                    EventId::ReqHkErr,
                    Severity::Error,
                    format_args!("EPS: Request device HK reported error: {}", source),
                );
                Err(CommandError::DeviceOperation {
                    operation: DeviceOperation::ReadStatus,
                    source,
                })
            }
            None => Ok(Action::HousekeepingPublished),
        };

        cx.telemetry.publish_housekeeping(cx.state, cx.bus);
        outcome
    }

    /// Publishes device data only after a successful read on an enabled
    /// device. Disabled is silently skipped.
    fn report_device_data<G, B, E>(
        &self,
        cx: &mut DispatchContext<'_, G, B, E>,
    ) -> Result<Action, CommandError>
    where
        G: DeviceGateway,
        B: SoftwareBus,
        E: EventSink,
    {
        let Some(session) = cx.state.session() else {
            return Ok(Action::DeviceDataSkipped);
        };

        match cx.gateway.read_data(session) {
            Ok(data) => {
                cx.state.counters.record_device(true);
                cx.telemetry.publish_device_data(data, cx.bus);
                Ok(Action::DeviceDataPublished)
            }
            Err(source) => {
                cx.state.counters.record_device(false);
                cx.events.emit_fmt(
                    EventId::ReqDataErr,
                    Severity::Error,
                    format_args!("EPS: Request device data reported error: {}", source),
                );
                Err(CommandError::DeviceOperation {
                    operation: DeviceOperation::ReadData,
                    source,
                })
            }
        }
    }
}

fn reject_length<G, B, E: EventSink>(
    length: LengthError,
    cx: &mut DispatchContext<'_, G, B, E>,
) -> CommandError {
    cx.state.counters.record_command(false);
    cx.events.emit_fmt(EventId::LenErr, Severity::Error, format_args!("{}", length));
    CommandError::LengthMismatch(length)
}

fn reject_code<G, B, E: EventSink>(
    message: &Message,
    event: EventId,
    cx: &mut DispatchContext<'_, G, B, E>,
) -> CommandError {
    cx.state.counters.record_command(false);
    let error = CommandError::UnknownCommandCode {
        msg_id: message.msg_id,
        command_code: message.command_code,
    };
    cx.events.emit_fmt(event, Severity::Error, format_args!("EPS: {}", error));
    error
}
