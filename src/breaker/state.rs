use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// The three states of a circuit breaker.
///
/// CLOSED → OPEN after `failure_threshold` consecutive failures,
/// OPEN → HALF_OPEN once `reset_timeout` has elapsed,
/// HALF_OPEN → CLOSED on a successful probe, back to OPEN otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "CLOSED"),
            BreakerState::Open => write!(f, "OPEN"),
            BreakerState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// A state change produced by the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: BreakerState,
    pub to: BreakerState,
}

/// What the breaker decided for an incoming call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed, call goes through.
    Pass,
    /// The single half-open probe.
    Probe,
    /// Fail fast without invoking the call.
    Reject,
}

/// Mutable per-breaker fields. Always accessed under the breaker's lock.
#[derive(Debug, Clone)]
pub struct BreakerRecord {
    pub state: BreakerState,
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
    pub probe_in_flight: bool,
}

impl Default for BreakerRecord {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure: None,
            probe_in_flight: false,
        }
    }
}

impl BreakerRecord {
    /// Decide whether a call may proceed at `now`.
    pub fn admit(
        &mut self,
        now: Instant,
        reset_timeout: Duration,
    ) -> (Admission, Option<Transition>) {
        match self.state {
            BreakerState::Closed => (Admission::Pass, None),
            BreakerState::Open => {
                let elapsed = self.last_failure.map(|t| now.saturating_duration_since(t));
                match elapsed {
                    Some(elapsed) if elapsed >= reset_timeout => {
                        self.probe_in_flight = true;
                        let t = self.move_to(BreakerState::HalfOpen);
                        (Admission::Probe, t)
                    }
                    _ => (Admission::Reject, None),
                }
            }
            BreakerState::HalfOpen if self.probe_in_flight => (Admission::Reject, None),
            BreakerState::HalfOpen => {
                self.probe_in_flight = true;
                (Admission::Probe, None)
            }
        }
    }

    /// Record a successful call that was let through as `admission`.
    ///
    /// Only the probe resolves HALF_OPEN. A call admitted while CLOSED that
    /// finishes after the breaker left CLOSED changes nothing.
    pub fn on_success(&mut self, admission: Admission) -> Option<Transition> {
        match (admission, self.state) {
            (Admission::Probe, BreakerState::HalfOpen) if self.probe_in_flight => {
                self.probe_in_flight = false;
                self.failure_count = 0;
                self.last_failure = None;
                self.move_to(BreakerState::Closed)
            }
            (_, BreakerState::Closed) => {
                self.failure_count = 0;
                None
            }
            _ => None,
        }
    }

    /// Record a failed call that was let through as `admission`.
    pub fn on_failure(
        &mut self,
        admission: Admission,
        now: Instant,
        threshold: u32,
    ) -> Option<Transition> {
        match (admission, self.state) {
            (Admission::Probe, BreakerState::HalfOpen) if self.probe_in_flight => {
                self.probe_in_flight = false;
                self.count_failure(now);
                self.move_to(BreakerState::Open)
            }
            (_, BreakerState::Closed) => {
                self.count_failure(now);
                if self.failure_count >= threshold {
                    self.move_to(BreakerState::Open)
                } else {
                    None
                }
            }
            // Stale result from before the breaker tripped.
            _ => None,
        }
    }

    /// Administrative override back to a clean CLOSED record.
    pub fn reset(&mut self) -> Option<Transition> {
        self.failure_count = 0;
        self.last_failure = None;
        self.probe_in_flight = false;
        self.move_to(BreakerState::Closed)
    }

    fn count_failure(&mut self, now: Instant) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure = Some(now);
    }

    fn move_to(&mut self, next: BreakerState) -> Option<Transition> {
        let from = self.state;
        self.state = next;
        (from != next).then_some(Transition { from, to: next })
    }
}
