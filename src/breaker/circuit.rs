use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::state::{Admission, BreakerRecord, BreakerState, Transition};
use crate::error::{CallError, ConfigError};
use crate::sinks::EventLog;

/// Tuning for a single circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// How long an open breaker waits before letting a probe through.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl BreakerConfig {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Result<Self, ConfigError> {
        if failure_threshold == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        Ok(Self {
            failure_threshold,
            reset_timeout,
        })
    }
}

/// Read-only view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub service: String,
    pub state: BreakerState,
    pub failure_count: u32,
}

/// Guards calls to one flaky dependency.
///
/// Shared by every pipeline run that touches the same service, so failure
/// evidence accumulates across runs. The record sits behind a mutex that is
/// never held across the guarded call.
pub struct CircuitBreaker {
    service: String,
    config: BreakerConfig,
    record: Mutex<BreakerRecord>,
    events: Option<Arc<dyn EventLog>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("service", &self.service)
            .field("config", &self.config)
            .field("record", &*self.record.lock())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            record: Mutex::new(BreakerRecord::default()),
            events: None,
        }
    }

    /// Report state changes to `events` in addition to tracing them.
    pub fn with_event_log(mut self, events: Arc<dyn EventLog>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    pub fn state(&self) -> BreakerState {
        self.record.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let record = self.record.lock();
        BreakerSnapshot {
            service: self.service.clone(),
            state: record.state,
            failure_count: record.failure_count,
        }
    }

    /// Run `f` through the breaker.
    ///
    /// Fails with [`CallError::CircuitOpen`] without invoking `f` while the
    /// circuit is open. Any error from `f` counts as a failure, whatever its kind.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, CallError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let (admission, transition) = {
            let mut record = self.record.lock();
            record.admit(Instant::now(), self.config.reset_timeout)
        };
        self.report(transition);

        if admission == Admission::Reject {
            debug!(service = %self.service, "circuit open, failing fast");
            return Err(CallError::CircuitOpen {
                service: self.service.clone(),
            });
        }

        let mut guard = ProbeGuard {
            breaker: self,
            armed: admission == Admission::Probe,
        };
        let result = f().await;
        guard.armed = false;

        let transition = {
            let mut record = self.record.lock();
            match &result {
                Ok(_) => record.on_success(admission),
                Err(_) => {
                    record.on_failure(admission, Instant::now(), self.config.failure_threshold)
                }
            }
        };
        self.report(transition);
        result
    }

    /// Force the breaker back to CLOSED with a zero failure count.
    pub fn reset(&self) {
        info!(service = %self.service, "manually resetting circuit breaker");
        let transition = self.record.lock().reset();
        self.report(transition);
    }

    fn report(&self, transition: Option<Transition>) {
        let Some(Transition { from, to }) = transition else {
            return;
        };
        match to {
            BreakerState::Open => {
                let failures = self.record.lock().failure_count;
                warn!(service = %self.service, %from, failures, "circuit breaker OPEN");
            }
            BreakerState::HalfOpen => {
                info!(service = %self.service, "circuit breaker HALF_OPEN, probing recovery");
            }
            BreakerState::Closed => {
                info!(service = %self.service, %from, "circuit breaker CLOSED");
            }
        }
        if let Some(events) = &self.events {
            events.log_state_change(&self.service, from, to);
        }
    }
}

/// Returns an abandoned half-open probe to OPEN so the breaker cannot wedge
/// with a probe that never completes.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let transition = {
            let mut record = self.breaker.record.lock();
            let threshold = self.breaker.config.failure_threshold;
            record.on_failure(Admission::Probe, Instant::now(), threshold)
        };
        self.breaker.report(transition);
    }
}
