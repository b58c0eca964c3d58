use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::breaker::BreakerState;
use crate::error::{FailureCategory, FailureKind};

/// Structured record of a terminal stage failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub service: String,
    /// `None` for failures that carry no kind (open circuit, unclassified).
    pub kind: Option<FailureKind>,
    pub category: FailureCategory,
    pub error_type: String,
    pub message: String,
    /// Retries made after the first attempt.
    pub retry_count: u32,
    pub breaker_state: BreakerState,
}

/// One appended log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogEntry {
    Error {
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        record: ErrorRecord,
    },
    Success {
        timestamp: DateTime<Utc>,
        service: String,
        message: String,
    },
    CircuitStateChange {
        timestamp: DateTime<Utc>,
        service: String,
        old_state: BreakerState,
        new_state: BreakerState,
    },
}

impl LogEntry {
    pub fn service(&self) -> &str {
        match self {
            LogEntry::Error { record, .. } => &record.service,
            LogEntry::Success { service, .. } | LogEntry::CircuitStateChange { service, .. } => {
                service
            }
        }
    }
}

/// Append-only sink for pipeline events.
pub trait EventLog: Send + Sync {
    fn log_error(&self, record: ErrorRecord);

    fn log_success(&self, service: &str, message: &str);

    fn log_state_change(&self, service: &str, old: BreakerState, new: BreakerState);
}

/// Keeps every entry in memory for later review.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    entries: RwLock<Vec<LogEntry>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().clone()
    }

    /// The last `count` entries, oldest first.
    pub fn recent(&self, count: usize) -> Vec<LogEntry> {
        let entries = self.entries.read();
        let start = entries.len().saturating_sub(count);
        entries[start..].to_vec()
    }

    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.entries
            .read()
            .iter()
            .filter_map(|e| match e {
                LogEntry::Error { record, .. } => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    fn push(&self, entry: LogEntry) {
        self.entries.write().push(entry);
    }
}

impl EventLog for MemoryEventLog {
    fn log_error(&self, record: ErrorRecord) {
        self.push(LogEntry::Error {
            timestamp: Utc::now(),
            record,
        });
    }

    fn log_success(&self, service: &str, message: &str) {
        self.push(LogEntry::Success {
            timestamp: Utc::now(),
            service: service.to_string(),
            message: message.to_string(),
        });
    }

    fn log_state_change(&self, service: &str, old: BreakerState, new: BreakerState) {
        self.push(LogEntry::CircuitStateChange {
            timestamp: Utc::now(),
            service: service.to_string(),
            old_state: old,
            new_state: new,
        });
    }
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn log_error(&self, record: ErrorRecord) {
        warn!(
            service = %record.service,
            error_type = %record.error_type,
            category = %record.category,
            retry_count = record.retry_count,
            breaker_state = %record.breaker_state,
            "{}", record.message
        );
    }

    fn log_success(&self, service: &str, message: &str) {
        info!(service, "{message}");
    }

    fn log_state_change(&self, service: &str, old: BreakerState, new: BreakerState) {
        info!(service, old_state = %old, new_state = %new, "circuit state change");
    }
}
