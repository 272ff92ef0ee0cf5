use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::bus::{BusError, PipeId, SoftwareBus};
use crate::config::AppConfig;
use crate::device::{DeviceGateway, DeviceHandle, HkFields};
use crate::dispatcher::{Action, CommandDispatcher, DispatchContext};
use crate::error::{AppError, CommandError};
use crate::events::{EventId, EventLog, EventSink, Severity};
use crate::executive::{Executive, RunStatus};
use crate::protocol::Message;
use crate::state::ApplicationState;
use crate::telemetry::{TelemetryAggregator, TelemetryMetrics};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub messages_processed: u64,
    pub receive_timeouts: u64,
    pub last_dispatch_time_us: u32,
    pub max_dispatch_time_us: u32,
}

/// Driver loop for the power-system interface.
///
/// Owns the application state and its collaborators. Messages are processed
/// strictly one at a time, each to completion, in arrival order.
pub struct EpsApp<G, B, E = EventLog> {
    config: AppConfig,
    state: ApplicationState,
    dispatcher: CommandDispatcher,
    telemetry: TelemetryAggregator,
    gateway: G,
    bus: B,
    events: E,
    pipe: Option<PipeId>,
    stats: PerformanceStats,
}

impl<G, B, E> EpsApp<G, B, E>
where
    G: DeviceGateway,
    B: SoftwareBus,
    E: EventSink,
{
    pub fn new(config: AppConfig, gateway: G, bus: B, events: E) -> Self {
        let ids = config.message_ids;
        let handle = DeviceHandle(config.device.handle);
        Self {
            dispatcher: CommandDispatcher::new(ids, handle),
            telemetry: TelemetryAggregator::new(ids),
            state: ApplicationState::new(),
            config,
            gateway,
            bus,
            events,
            pipe: None,
            stats: PerformanceStats::default(),
        }
    }

    /// Creates the command pipe, subscribes to both inbound identifiers and
    /// resets the counters. Any failure leaves `run_status` at `Error`.
    pub fn init(&mut self) -> Result<(), AppError> {
        let result = self.setup_pipe();
        if let Err(e) = &result {
            self.state.run_status = RunStatus::Error;
            warn!("initialization failed: {}", e);
            return result;
        }

        self.state.counters.reset();
        self.state.housekeeping_snapshot = HkFields::default();
        self.state.run_status = RunStatus::Running;

        self.events.emit_fmt(
            EventId::StartupInf,
            Severity::Information,
            format_args!("EPS App Initialized. Version {}", AppConfig::version_string()),
        );
        Ok(())
    }

    fn setup_pipe(&mut self) -> Result<(), AppError> {
        let ids = self.config.message_ids;

        let pipe = match self.bus.create_pipe(self.config.pipe_depth, &self.config.pipe_name) {
            Ok(pipe) => pipe,
            Err(e) => {
                self.events.emit_fmt(
                    EventId::PipeErr,
                    Severity::Error,
                    format_args!("EPS: Error creating SB Command Pipe: {}", e),
                );
                return Err(AppError::CreatePipe(e));
            }
        };

        if let Err(e) = self.bus.subscribe(ids.cmd, pipe) {
            self.events.emit_fmt(
                EventId::SubCmdErr,
                Severity::Error,
                format_args!("EPS: Error Subscribing to Commands: {}", e),
            );
            return Err(AppError::Subscribe {
                msg_id: ids.cmd,
                source: e,
            });
        }

        if let Err(e) = self.bus.subscribe(ids.req_hk, pipe) {
            self.events.emit_fmt(
                EventId::SubReqHkErr,
                Severity::Error,
                format_args!("EPS: Error Subscribing to HK Request: {}", e),
            );
            return Err(AppError::Subscribe {
                msg_id: ids.req_hk,
                source: e,
            });
        }

        self.pipe = Some(pipe);
        Ok(())
    }

    /// Runs one message through the dispatcher. Recoverable errors are
    /// already reflected in counters and events when this returns.
    pub fn process_message(&mut self, message: &Message) -> Result<Action, CommandError> {
        let start = Instant::now();

        let mut cx = DispatchContext {
            state: &mut self.state,
            telemetry: &mut self.telemetry,
            gateway: &mut self.gateway,
            bus: &mut self.bus,
            events: &mut self.events,
        };
        let result = self.dispatcher.dispatch(message, &mut cx);

        let elapsed_us = u32::try_from(start.elapsed().as_micros()).unwrap_or(u32::MAX);
        self.stats.messages_processed = self.stats.messages_processed.saturating_add(1);
        self.stats.last_dispatch_time_us = elapsed_us;
        self.stats.max_dispatch_time_us = self.stats.max_dispatch_time_us.max(elapsed_us);

        match &result {
            Ok(action) => debug!(msg_id = message.msg_id, ?action, "message processed"),
            Err(e) => debug!(msg_id = message.msg_id, "message rejected: {}", e),
        }
        result
    }

    /// Pends on the command pipe for one message and processes it.
    ///
    /// A receive timeout is not an error. Any other receive failure is fatal:
    /// it is reported as an event and `run_status` becomes `Error`.
    pub fn run_once(&mut self) -> Result<Option<Action>, AppError> {
        let pipe = self.pipe.ok_or(AppError::NotInitialized)?;

        match self.bus.receive(pipe) {
            Ok(message) => Ok(self.process_message(&message).ok()),
            Err(BusError::Timeout) => {
                self.stats.receive_timeouts = self.stats.receive_timeouts.saturating_add(1);
                Ok(None)
            }
            Err(e) => {
                self.events.emit_fmt(
                    EventId::PipeErr,
                    Severity::Error,
                    format_args!("EPS: SB Pipe Read Error, App Will Exit: {}", e),
                );
                self.state.run_status = RunStatus::Error;
                Err(AppError::Receive(e))
            }
        }
    }

    /// Initializes if needed, then loops while the executive allows it. The
    /// device is disabled on the way out and the final status returned.
    pub fn run<X: Executive>(&mut self, executive: &mut X) -> RunStatus {
        if self.pipe.is_none() {
            if let Err(e) = self.init() {
                executive.report_fatal(&e.to_string());
                return self.state.run_status;
            }
        }

        info!(version = %AppConfig::version_string(), "entering main loop");
        while executive.should_run(self.state.run_status) {
            if let Err(e) = self.run_once() {
                executive.report_fatal(&e.to_string());
            }
        }

        self.shutdown();
        self.state.run_status
    }

    /// Closes the device session if one is open. Counters and events move
    /// exactly as for a ground Disable command.
    pub fn shutdown(&mut self) {
        if !self.state.device_enabled().is_enabled() {
            return;
        }

        let mut cx = DispatchContext {
            state: &mut self.state,
            telemetry: &mut self.telemetry,
            gateway: &mut self.gateway,
            bus: &mut self.bus,
            events: &mut self.events,
        };
        match self.dispatcher.disable_device(&mut cx) {
            Ok(_) => info!("device disabled on shutdown"),
            Err(e) => warn!("device disable on shutdown failed: {}", e),
        }
    }

    pub fn get_state(&self) -> &ApplicationState {
        &self.state
    }

    pub fn get_performance_stats(&self) -> PerformanceStats {
        self.stats
    }

    pub fn get_telemetry_metrics(&self) -> TelemetryMetrics {
        self.telemetry.get_metrics()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.pipe.is_some()
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn events(&self) -> &E {
        &self.events
    }
}
