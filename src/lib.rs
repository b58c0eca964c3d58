//! Resilient orchestration for speech-to-text → response → speech-synthesis
//! call pipelines.
//!
//! Every stage call runs through a per-stage [`CircuitBreaker`], wrapped by a
//! [`RetryExecutor`] that retries only transient failures. A stage that still
//! fails aborts the run, producing one [`ErrorRecord`] and one [`Alert`].

pub mod breaker;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod services;
pub mod sinks;

pub use breaker::{BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use config::CallguardConfig;
pub use error::{CallError, ConfigError, FailureCategory, FailureKind, ServiceError, classify};
pub use orchestrator::{
    CallOrchestrator, FnStage, PipelineBuilder, PipelineResult, Stage, StageAbort, StageOverride,
    StageStatus, SystemStatus, stage_fn,
};
pub use retry::{RetryExecutor, RetryFailure, RetryInfo, RetryPolicy};
pub use services::{MockService, Payload};
pub use sinks::{
    Alert, AlertBoard, AlertSink, AlertStatus, ErrorRecord, EventLog, LogEntry, MemoryEventLog,
    Severity, TracingAlertSink, TracingEventLog,
};
