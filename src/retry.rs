//! Retry with exponential backoff.
//!
//! Only transient failures are retried. Everything else, including failures
//! with no classification, propagates on the first occurrence.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{CallError, ConfigError, FailureCategory};

/// Immutable backoff settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    initial_delay: Duration,
    backoff_multiplier: f64,
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        initial_delay: Duration,
        backoff_multiplier: f64,
        max_attempts: u32,
    ) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if backoff_multiplier.is_nan() || backoff_multiplier <= 1.0 {
            return Err(ConfigError::MultiplierTooSmall(backoff_multiplier));
        }
        Ok(Self {
            initial_delay,
            backoff_multiplier,
            max_attempts,
        })
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay that follows the `failed`-th failed attempt (1-indexed):
    /// `initial_delay * multiplier^(failed - 1)`.
    ///
    /// Returns `None` once `failed` reaches `max_attempts`, since no attempt
    /// follows the last one.
    pub fn delay_after(&self, failed: u32) -> Option<Duration> {
        if failed == 0 || failed >= self.max_attempts {
            return None;
        }
        let mut delay = self.initial_delay;
        for _ in 1..failed {
            delay = self.grow(delay);
        }
        Some(delay)
    }

    pub fn info(&self) -> RetryInfo {
        RetryInfo {
            initial_delay_ms: u64::try_from(self.initial_delay.as_millis()).unwrap_or(u64::MAX),
            backoff_multiplier: self.backoff_multiplier,
            max_attempts: self.max_attempts,
        }
    }

    fn grow(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.backoff_multiplier)
            .unwrap_or(Duration::MAX)
    }
}

/// Serializable view of a [`RetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryInfo {
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_attempts: u32,
}

/// The last error of a call that could not be completed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct RetryFailure {
    #[source]
    pub error: CallError,
    /// Invocations made, including the failing one.
    pub attempts: u32,
}

/// Stateless executor; safe to share between stages and tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke `op` until it succeeds, fails permanently, or the attempt budget
    /// runs out. At most `max_attempts` invocations and `max_attempts - 1` sleeps.
    pub async fn execute_with_retry<F, Fut, T>(
        &self,
        mut op: F,
        service: &str,
    ) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let max = self.policy.max_attempts;
        let mut attempt: u32 = 0;

        loop {
            let error = match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(service, retries = attempt, "succeeded after {attempt} retries");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };
            attempt += 1;

            if error.category() == FailureCategory::Permanent {
                warn!(service, error = %error, "permanent failure, not retrying");
                return Err(RetryFailure {
                    error,
                    attempts: attempt,
                });
            }

            warn!(service, attempt, max_attempts = max, error = %error, "attempt failed");
            let Some(delay) = self.policy.delay_after(attempt) else {
                warn!(service, "all retries exhausted");
                return Err(RetryFailure {
                    error,
                    attempts: attempt,
                });
            };

            debug!(service, delay_ms = delay.as_millis() as u64, "waiting before retry");
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, ServiceError};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn policy(initial_secs: u64, multiplier: f64, attempts: u32) -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(initial_secs), multiplier, attempts).unwrap()
    }

    /// Returns an op that fails with `script[i]` on call `i` (succeeding when
    /// the entry is `None`) and records the instant of each call.
    fn scripted(
        script: Vec<Option<FailureKind>>,
    ) -> (
        Arc<Mutex<Vec<Instant>>>,
        impl FnMut() -> std::future::Ready<Result<u32, CallError>>,
    ) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        let op = move || {
            let mut seen = seen.lock();
            let n = seen.len();
            seen.push(Instant::now());
            let result = match script.get(n).copied().flatten() {
                Some(kind) => Err(ServiceError::new(kind, format!("failure #{}", n + 1)).into()),
                None => Ok(n as u32 + 1),
            };
            std::future::ready(result)
        };
        (calls, op)
    }

    fn gaps(calls: &[Instant]) -> Vec<Duration> {
        calls.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[test]
    fn policy_validation() {
        assert_eq!(
            RetryPolicy::new(Duration::from_secs(1), 2.0, 0),
            Err(ConfigError::ZeroAttempts)
        );
        assert_eq!(
            RetryPolicy::new(Duration::from_secs(1), 1.0, 3),
            Err(ConfigError::MultiplierTooSmall(1.0))
        );
        assert!(RetryPolicy::new(Duration::from_secs(1), f64::NAN, 3).is_err());
    }

    #[test]
    fn delay_sequence() {
        let p = policy(5, 2.0, 4);
        assert_eq!(p.delay_after(0), None);
        assert_eq!(p.delay_after(1), Some(Duration::from_secs(5)));
        assert_eq!(p.delay_after(2), Some(Duration::from_secs(10)));
        assert_eq!(p.delay_after(3), Some(Duration::from_secs(20)));
        assert_eq!(p.delay_after(4), None);
    }

    #[test]
    fn info_reports_millis() {
        let info = RetryPolicy::default().info();
        assert_eq!(info.initial_delay_ms, 5000);
        assert_eq!(info.backoff_multiplier, 2.0);
        assert_eq!(info.max_attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_exhaust_budget() {
        let executor = RetryExecutor::new(policy(5, 2.0, 3));
        let (calls, op) = scripted(vec![Some(FailureKind::Timeout); 10]);
        let start = Instant::now();

        let failure = executor.execute_with_retry(op, "STT").await.unwrap_err();

        let calls = calls.lock();
        assert_eq!(calls.len(), 3);
        assert_eq!(
            gaps(&calls),
            vec![Duration::from_secs(5), Duration::from_secs(10)]
        );
        // No sleep after the final attempt.
        assert_eq!(Instant::now() - start, Duration::from_secs(15));
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.error.message(), "failure #3");
    }

    #[tokio::test(start_paused = true)]
    async fn executor_sleeps_follow_delay_after() {
        let p = RetryPolicy::new(Duration::from_secs(1), 1.5, 4).unwrap();
        let executor = RetryExecutor::new(p);
        let (calls, op) = scripted(vec![Some(FailureKind::RateLimited); 4]);

        let failure = executor.execute_with_retry(op, "TTS").await.unwrap_err();

        let expected: Vec<_> = (1..4).filter_map(|n| p.delay_after(n)).collect();
        assert_eq!(
            expected,
            vec![
                Duration::from_secs(1),
                Duration::from_millis(1500),
                Duration::from_millis(2250)
            ]
        );
        assert_eq!(gaps(&calls.lock()), expected);
        assert_eq!(failure.attempts, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let executor = RetryExecutor::new(policy(5, 2.0, 5));
        let (calls, op) = scripted(vec![Some(FailureKind::QuotaExceeded); 10]);
        let start = Instant::now();

        let failure = executor.execute_with_retry(op, "LLM").await.unwrap_err();

        assert_eq!(calls.lock().len(), 1);
        assert_eq!(Instant::now(), start);
        assert_eq!(failure.attempts, 1);
        assert_eq!(failure.error.kind(), Some(FailureKind::QuotaExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_one_transient_failure() {
        let executor = RetryExecutor::new(policy(5, 2.0, 3));
        let (calls, op) = scripted(vec![Some(FailureKind::RateLimited), None]);

        let value = executor.execute_with_retry(op, "TTS").await.unwrap();

        assert_eq!(value, 2);
        let calls = calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(gaps(&calls), vec![Duration::from_secs(5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_permanent_stops_immediately() {
        let executor = RetryExecutor::new(policy(1, 3.0, 5));
        let (calls, op) = scripted(vec![
            Some(FailureKind::NetworkError),
            Some(FailureKind::NotFound),
        ]);

        let failure = executor.execute_with_retry(op, "TTS").await.unwrap_err();
        assert_eq!(calls.lock().len(), 2);
        assert_eq!(failure.attempts, 2);
        assert_eq!(failure.error.kind(), Some(FailureKind::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn unclassified_and_open_circuit_are_not_retried() {
        let executor = RetryExecutor::new(policy(1, 2.0, 3));
        for error in [
            CallError::Unclassified("weird".into()),
            CallError::CircuitOpen {
                service: "STT".into(),
            },
        ] {
            let mut count = 0;
            let result: Result<(), _> = executor
                .execute_with_retry(
                    || {
                        count += 1;
                        std::future::ready(Err(error.clone()))
                    },
                    "STT",
                )
                .await;
            assert_eq!(result.unwrap_err().attempts, 1);
            assert_eq!(count, 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_policy_never_sleeps() {
        let executor = RetryExecutor::new(policy(5, 2.0, 1));
        let (calls, op) = scripted(vec![Some(FailureKind::Timeout)]);
        let start = Instant::now();
        let failure = executor.execute_with_retry(op, "STT").await.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.lock().len(), 1);
        assert_eq!(Instant::now(), start);
    }
}
