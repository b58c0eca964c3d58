//! Best-effort side channels for the orchestrator.
//!
//! [`EventLog`] receives error records, successes and breaker state changes;
//! [`AlertSink`] receives severity-tagged alerts. Both are infallible from the
//! caller's point of view: a sink must never push a failure back into the
//! pipeline.

mod alerts;
mod log;

pub use alerts::{Alert, AlertBoard, AlertSink, AlertStatus, Severity, TracingAlertSink};
pub use log::{ErrorRecord, EventLog, LogEntry, MemoryEventLog, TracingEventLog};
