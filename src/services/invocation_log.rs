//! Per-invocation trace collector.

use crate::models::invocation::LogEntry;
use std::time::Instant;
use tracing::info;

/// Collects human-readable step messages for one invocation.
///
/// Every entry is also emitted through `tracing`, so the same trace shows up
/// in the service logs and in the report returned to the caller.
#[derive(Debug)]
pub struct InvocationLog {
    started: Instant,
    entries: Vec<LogEntry>,
}

impl InvocationLog {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            entries: Vec::new(),
        }
    }

    pub fn elapsed_millis(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn record(&mut self, message: impl Into<String>) {
        let message = message.into();
        let elapsed_millis = self.elapsed_millis();
        info!(elapsed_ms = elapsed_millis, "{}", message);
        self.entries.push(LogEntry {
            elapsed_millis,
            message,
        });
    }

    pub fn finish(self) -> (u64, Vec<LogEntry>) {
        (self.elapsed_millis(), self.entries)
    }
}
