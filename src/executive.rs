use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Error,
}

/// Process-lifecycle service deciding whether the main loop keeps going.
pub trait Executive {
    fn should_run(&mut self, status: RunStatus) -> bool;
    fn report_fatal(&mut self, reason: &str);
}

/// Executive driven by a shared shutdown flag and an optional cycle limit.
#[derive(Debug, Clone)]
pub struct ProcessExecutive {
    shutdown: Arc<AtomicBool>,
    max_cycles: Option<u64>,
    cycles: u64,
    fatal_reported: bool,
}

impl Default for ProcessExecutive {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessExecutive {
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            max_cycles: None,
            cycles: 0,
            fatal_reported: false,
        }
    }

    pub fn with_max_cycles(max_cycles: u64) -> Self {
        Self {
            max_cycles: Some(max_cycles),
            ..Self::new()
        }
    }

    /// Handle other threads use to request shutdown.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn fatal_reported(&self) -> bool {
        self.fatal_reported
    }
}

impl Executive for ProcessExecutive {
    fn should_run(&mut self, status: RunStatus) -> bool {
        if status != RunStatus::Running || self.shutdown.load(Ordering::SeqCst) {
            return false;
        }
        if self.max_cycles.is_some_and(|max| self.cycles >= max) {
            return false;
        }
        self.cycles += 1;
        true
    }

    fn report_fatal(&mut self, reason: &str) {
        self.fatal_reported = true;
        error!("application exiting in error: {}", reason);
    }
}
