use serde::{Deserialize, Serialize};

use crate::device::{HkFields, Session};
use crate::executive::RunStatus;
use crate::protocol::DeviceState;

/// Rolling application counters. They only move backwards through
/// [`Counters::reset`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub command_count: u32,
    pub command_error_count: u32,
    pub device_count: u32,
    pub device_error_count: u32,
}

impl Counters {
    pub fn record_command(&mut self, accepted: bool) {
        if accepted {
            self.command_count = self.command_count.saturating_add(1);
        } else {
            self.command_error_count = self.command_error_count.saturating_add(1);
        }
    }

    pub fn record_device(&mut self, succeeded: bool) {
        if succeeded {
            self.device_count = self.device_count.saturating_add(1);
        } else {
            self.device_error_count = self.device_error_count.saturating_add(1);
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// The single process-wide state record, owned by the driver loop and lent
/// to the dispatcher one message at a time.
///
/// The enabled flag is derived from the session slot, so a session exists
/// exactly when the device is enabled.
#[derive(Debug)]
pub struct ApplicationState {
    pub run_status: RunStatus,
    pub counters: Counters,
    pub housekeeping_snapshot: HkFields,
    device_session: Option<Session>,
}

impl Default for ApplicationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationState {
    pub fn new() -> Self {
        Self {
            run_status: RunStatus::Running,
            counters: Counters::default(),
            housekeeping_snapshot: HkFields::default(),
            device_session: None,
        }
    }

    pub fn device_enabled(&self) -> DeviceState {
        if self.device_session.is_some() {
            DeviceState::Enabled
        } else {
            DeviceState::Disabled
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.device_session.as_ref()
    }

    pub(crate) fn attach_session(&mut self, session: Session) {
        debug_assert!(
            self.device_session.is_none(),
            "attaching a session while one is already open"
        );
        self.device_session = Some(session);
    }

    pub(crate) fn detach_session(&mut self) -> Option<Session> {
        self.device_session.take()
    }
}
