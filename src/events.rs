//! Application event reporting.
//!
//! Every event carries a stable numeric id so ground tooling can filter on it.
//! [`EventLog`] keeps a bounded history of recent events and mirrors each one
//! to `tracing`.

use arrayvec::ArrayString;
use core::fmt::Write;
use heapless::Deque;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

pub const MAX_EVENT_HISTORY: usize = 64;
pub const MAX_EVENT_TEXT: usize = 122;

pub type EventText = ArrayString<MAX_EVENT_TEXT>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum EventId {
    Reserved = 0,
    StartupInf = 1,
    LenErr = 2,
    PipeErr = 3,
    SubCmdErr = 4,
    SubReqHkErr = 5,
    ProcessCmdErr = 6,

    CmdErr = 10,
    CmdNoopInf = 11,
    CmdResetInf = 12,
    CmdEnableInf = 13,
    EnableInf = 14,
    EnableErr = 15,
    CmdDisableInf = 16,
    DisableInf = 17,
    DisableErr = 18,

    CmdConfigInf = 20,
    ConfigInf = 21,
    ConfigErr = 22,
    CmdSwitchInf = 23,
    SwitchInf = 24,
    SwitchErr = 25,

    DeviceTlmErr = 30,
    ReqHkErr = 31,
    ReqDataErr = 32,

    UartInitErr = 40,
    UartCloseErr = 41,
    UartReadErr = 42,
    UartWriteErr = 43,
    UartTimeoutErr = 44,
}

impl EventId {
    pub fn value(self) -> u16 {
        self as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Debug,
    Information,
    Error,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub id: EventId,
    pub severity: Severity,
    pub text: EventText,
}

/// Destination for application events.
pub trait EventSink {
    fn emit(&mut self, id: EventId, severity: Severity, text: &str);

    /// Formats into a fixed buffer; overlong text is truncated.
    fn emit_fmt(&mut self, id: EventId, severity: Severity, args: core::fmt::Arguments<'_>) {
        let mut text = EventText::new();
        let _ = TruncatingWriter(&mut text).write_fmt(args);
        self.emit(id, severity, &text);
    }
}

struct TruncatingWriter<'a>(&'a mut EventText);

impl Write for TruncatingWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for c in s.chars() {
            if self.0.try_push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct EventLog {
    history: Deque<EventRecord, MAX_EVENT_HISTORY>,
    total_emitted: u32,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            history: Deque::new(),
            total_emitted: 0,
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &EventRecord> {
        self.history.iter()
    }

    pub fn last(&self) -> Option<&EventRecord> {
        self.history.back()
    }

    pub fn count_of(&self, id: EventId) -> usize {
        self.history.iter().filter(|record| record.id == id).count()
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.history.iter().any(|record| record.id == id)
    }

    pub fn total_emitted(&self) -> u32 {
        self.total_emitted
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

impl EventSink for EventLog {
    fn emit(&mut self, id: EventId, severity: Severity, text: &str) {
        let event_id = id.value();
        match severity {
            Severity::Debug => debug!(event_id, "{}", text),
            Severity::Information => info!(event_id, "{}", text),
            Severity::Error | Severity::Critical => error!(event_id, ?severity, "{}", text),
        }

        let mut stored = EventText::new();
        let _ = TruncatingWriter(&mut stored).write_str(text);

        if self.history.is_full() {
            self.history.pop_front();
        }
        let _ = self.history.push_back(EventRecord {
            id,
            severity,
            text: stored,
        });
        self.total_emitted = self.total_emitted.wrapping_add(1);
    }
}
