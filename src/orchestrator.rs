use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use crate::breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker};
use crate::error::{CallError, FailureCategory, FailureKind};
use crate::retry::{RetryExecutor, RetryFailure, RetryInfo, RetryPolicy};
use crate::sinks::{AlertSink, ErrorRecord, EventLog, Severity, TracingAlertSink, TracingEventLog};

/// Stage names used by the standard call-agent pipeline.
pub const TRANSCRIPTION: &str = "STT";
pub const GENERATION: &str = "LLM";
pub const SYNTHESIS: &str = "TTS";

/// One step of a pipeline: takes the previous stage's output and produces
/// the next stage's input.
#[async_trait]
pub trait Stage<P>: Send + Sync {
    async fn run(&self, input: P) -> Result<P, CallError>;
}

/// Adapts an async closure into a [`Stage`].
pub struct FnStage<F>(F);

pub fn stage_fn<F>(f: F) -> FnStage<F> {
    FnStage(f)
}

#[async_trait]
impl<P, F, Fut> Stage<P> for FnStage<F>
where
    P: Send + 'static,
    F: Fn(P) -> Fut + Send + Sync,
    Fut: Future<Output = Result<P, CallError>> + Send,
{
    async fn run(&self, input: P) -> Result<P, CallError> {
        (self.0)(input).await
    }
}

#[async_trait]
impl<P, S> Stage<P> for Arc<S>
where
    P: Send + 'static,
    S: Stage<P> + ?Sized,
{
    async fn run(&self, input: P) -> Result<P, CallError> {
        (**self).run(input).await
    }
}

/// Where and why a pipeline run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("pipeline aborted at {stage}: {message}")]
pub struct StageAbort {
    pub stage: String,
    pub kind: Option<FailureKind>,
    pub category: FailureCategory,
    pub message: String,
    pub attempts: u32,
}

/// Outcome of a full pipeline run. No partial output on abort.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineResult<P> {
    Completed(P),
    Aborted(StageAbort),
}

impl<P> PipelineResult<P> {
    pub fn is_completed(&self) -> bool {
        matches!(self, PipelineResult::Completed(_))
    }

    pub fn output(&self) -> Option<&P> {
        match self {
            PipelineResult::Completed(p) => Some(p),
            PipelineResult::Aborted(_) => None,
        }
    }

    pub fn abort(&self) -> Option<&StageAbort> {
        match self {
            PipelineResult::Aborted(a) => Some(a),
            PipelineResult::Completed(_) => None,
        }
    }

    pub fn into_result(self) -> Result<P, StageAbort> {
        match self {
            PipelineResult::Completed(p) => Ok(p),
            PipelineResult::Aborted(a) => Err(a),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageStatus {
    pub stage: String,
    pub breaker: BreakerSnapshot,
    pub retry: RetryInfo,
}

/// Diagnostic view returned by [`CallOrchestrator::system_status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStatus {
    /// Default policy shared by stages without an override.
    pub retry: RetryInfo,
    pub stages: Vec<StageStatus>,
}

/// Per-stage resilience override.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageOverride {
    pub retry: Option<RetryPolicy>,
    pub breaker: Option<BreakerConfig>,
}

struct StageSlot<P> {
    name: String,
    stage: Arc<dyn Stage<P>>,
    breaker: Arc<CircuitBreaker>,
    executor: RetryExecutor,
}

/// Collects stages and settings for a [`CallOrchestrator`].
pub struct PipelineBuilder<P> {
    retry: RetryPolicy,
    breaker: BreakerConfig,
    overrides: HashMap<String, StageOverride>,
    stages: Vec<(String, Arc<dyn Stage<P>>)>,
    events: Arc<dyn EventLog>,
    alerts: Arc<dyn AlertSink>,
}

impl<P> Default for PipelineBuilder<P> {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            overrides: HashMap::new(),
            stages: Vec::new(),
            events: Arc::new(TracingEventLog),
            alerts: Arc::new(TracingAlertSink),
        }
    }
}

impl<P> PipelineBuilder<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default retry policy for every stage without an override.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Default breaker settings for every stage without an override.
    pub fn breaker_config(mut self, config: BreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    pub fn stage_override(mut self, name: impl Into<String>, over: StageOverride) -> Self {
        self.overrides.insert(name.into(), over);
        self
    }

    pub fn event_log(mut self, events: Arc<dyn EventLog>) -> Self {
        self.events = events;
        self
    }

    pub fn alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    /// Append a stage. Stages run in the order they are added.
    pub fn stage(mut self, name: impl Into<String>, stage: impl Stage<P> + 'static) -> Self {
        let stage: Arc<dyn Stage<P>> = Arc::new(stage);
        self.stages.push((name.into(), stage));
        self
    }

    /// transcription → generation → synthesis.
    pub fn call_agent(
        self,
        transcribe: impl Stage<P> + 'static,
        generate: impl Stage<P> + 'static,
        synthesize: impl Stage<P> + 'static,
    ) -> Self {
        self.stage(TRANSCRIPTION, transcribe)
            .stage(GENERATION, generate)
            .stage(SYNTHESIS, synthesize)
    }

    pub fn build(self) -> CallOrchestrator<P> {
        let stages = self
            .stages
            .into_iter()
            .map(|(name, stage)| {
                let over = self.overrides.get(&name).copied().unwrap_or_default();
                let config = over.breaker.unwrap_or(self.breaker);
                let breaker =
                    CircuitBreaker::new(name.clone(), config).with_event_log(self.events.clone());
                StageSlot {
                    name,
                    stage,
                    breaker: Arc::new(breaker),
                    executor: RetryExecutor::new(over.retry.unwrap_or(self.retry)),
                }
            })
            .collect();

        CallOrchestrator {
            retry: self.retry,
            stages,
            events: self.events,
            alerts: self.alerts,
        }
    }
}

/// Drives a payload through an ordered list of guarded stages.
///
/// Each stage call goes through the stage's circuit breaker, wrapped by its
/// retry executor. A stage that still fails ends the run: one error record,
/// one alert, and [`PipelineResult::Aborted`]. Safe to share across tasks;
/// concurrent runs share the breakers.
pub struct CallOrchestrator<P> {
    retry: RetryPolicy,
    stages: Vec<StageSlot<P>>,
    events: Arc<dyn EventLog>,
    alerts: Arc<dyn AlertSink>,
}

impl<P> CallOrchestrator<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub fn builder() -> PipelineBuilder<P> {
        PipelineBuilder::new()
    }

    /// Run every stage in order, feeding each output into the next stage.
    pub async fn process(&self, input: P) -> PipelineResult<P> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", %run_id);
        self.run_stages(input).instrument(span).await
    }

    async fn run_stages(&self, input: P) -> PipelineResult<P> {
        info!(stages = self.stages.len(), "starting call processing");
        let mut payload = input;

        for slot in &self.stages {
            let breaker: &CircuitBreaker = &slot.breaker;
            let stage: &dyn Stage<P> = slot.stage.as_ref();
            let current = &payload;

            let result = slot
                .executor
                .execute_with_retry(
                    move || breaker.call(move || stage.run(current.clone())),
                    &slot.name,
                )
                .await;

            match result {
                Ok(output) => {
                    self.events.log_success(&slot.name, "stage completed");
                    payload = output;
                }
                Err(failure) => {
                    let abort = self.fail_stage(slot, failure);
                    return PipelineResult::Aborted(abort);
                }
            }
        }

        info!("call processing completed");
        PipelineResult::Completed(payload)
    }

    fn fail_stage(&self, slot: &StageSlot<P>, failure: RetryFailure) -> StageAbort {
        let RetryFailure { error, attempts } = failure;
        let category = error.category();
        let kind = error.kind();
        let message = error.message();
        let breaker_state = slot.breaker.state();

        error!(
            stage = %slot.name,
            %category,
            attempts,
            %breaker_state,
            "call processing failed: {error}"
        );

        self.events.log_error(ErrorRecord {
            service: slot.name.clone(),
            kind,
            category,
            error_type: error.label(),
            message: message.clone(),
            retry_count: attempts.saturating_sub(1),
            breaker_state,
        });
        self.alerts.send_alert(
            Severity::for_category(category),
            &slot.name,
            &format!("{category} error: {message}"),
            Some(serde_json::json!({
                "error_type": error.label(),
                "attempts": attempts,
                "breaker_state": breaker_state,
            })),
        );

        StageAbort {
            stage: slot.name.clone(),
            kind,
            category,
            message,
            attempts,
        }
    }
}

impl<P> CallOrchestrator<P> {
    /// Every breaker's snapshot plus the retry policies in force.
    pub fn system_status(&self) -> SystemStatus {
        SystemStatus {
            retry: self.retry.info(),
            stages: self
                .stages
                .iter()
                .map(|slot| StageStatus {
                    stage: slot.name.clone(),
                    breaker: slot.breaker.snapshot(),
                    retry: slot.executor.policy().info(),
                })
                .collect(),
        }
    }

    pub fn breaker(&self, stage: &str) -> Option<&Arc<CircuitBreaker>> {
        self.stages
            .iter()
            .find(|slot| slot.name == stage)
            .map(|slot| &slot.breaker)
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|slot| slot.name.as_str()).collect()
    }

    /// Administrative reset of every breaker.
    pub fn reset_breakers(&self) {
        for slot in &self.stages {
            slot.breaker.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerState;
    use crate::error::ServiceError;
    use crate::sinks::{AlertBoard, LogEntry, MemoryEventLog};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Stage that appends its tag, failing with the scripted kinds first.
    struct Scripted {
        tag: &'static str,
        failures: Vec<FailureKind>,
        calls: Arc<AtomicU32>,
    }

    impl Scripted {
        fn ok(tag: &'static str) -> (Self, Arc<AtomicU32>) {
            Self::failing(tag, vec![])
        }

        fn failing(tag: &'static str, failures: Vec<FailureKind>) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Self {
                    tag,
                    failures,
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl Stage<String> for Scripted {
        async fn run(&self, input: String) -> Result<String, CallError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.failures.get(n) {
                Some(kind) => Err(ServiceError::new(*kind, format!("{} failed", self.tag))
                    .with_service(self.tag)
                    .into()),
                None => Ok(format!("{input}>{}", self.tag)),
            }
        }
    }

    struct Harness {
        orchestrator: CallOrchestrator<String>,
        log: Arc<MemoryEventLog>,
        alerts: Arc<AlertBoard>,
    }

    fn harness(stt: Scripted, llm: Scripted, tts: Scripted) -> Harness {
        let log = Arc::new(MemoryEventLog::new());
        let alerts = Arc::new(AlertBoard::new());
        let orchestrator = CallOrchestrator::<String>::builder()
            .retry_policy(RetryPolicy::new(Duration::from_secs(5), 2.0, 3).unwrap())
            .breaker_config(BreakerConfig::new(3, Duration::from_secs(60)).unwrap())
            .event_log(log.clone())
            .alert_sink(alerts.clone())
            .call_agent(stt, llm, tts)
            .build();
        Harness {
            orchestrator,
            log,
            alerts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_runs_all_stages() {
        let (stt, _) = Scripted::ok("stt");
        let (llm, _) = Scripted::ok("llm");
        let (tts, _) = Scripted::ok("tts");
        let h = harness(stt, llm, tts);

        let result = h.orchestrator.process("audio".to_string()).await;

        assert_eq!(result, PipelineResult::Completed("audio>stt>llm>tts".into()));
        assert!(h.alerts.is_empty());
        assert!(h.log.errors().is_empty());
        assert_eq!(h.log.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_in_second_stage_aborts() {
        let (stt, stt_calls) = Scripted::ok("stt");
        let (llm, llm_calls) = Scripted::failing("llm", vec![FailureKind::QuotaExceeded]);
        let (tts, tts_calls) = Scripted::ok("tts");
        let h = harness(stt, llm, tts);

        let result = h.orchestrator.process("audio".to_string()).await;

        let abort = result.abort().expect("pipeline should abort");
        assert_eq!(abort.stage, GENERATION);
        assert_eq!(abort.kind, Some(FailureKind::QuotaExceeded));
        assert_eq!(abort.category, FailureCategory::Permanent);
        assert_eq!(abort.attempts, 1);
        assert!(result.output().is_none());

        assert_eq!(stt_calls.load(Ordering::SeqCst), 1);
        assert_eq!(llm_calls.load(Ordering::SeqCst), 1);
        assert_eq!(tts_calls.load(Ordering::SeqCst), 0);

        let status = h.orchestrator.system_status();
        assert_eq!(status.stages[0].breaker.state, BreakerState::Closed);
        assert_eq!(status.stages[0].breaker.failure_count, 0);
        assert_eq!(status.stages[1].breaker.state, BreakerState::Closed);
        assert_eq!(status.stages[1].breaker.failure_count, 1);
        assert_eq!(status.stages[2].breaker.failure_count, 0);

        let errors = h.log.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].service, GENERATION);
        assert_eq!(errors[0].error_type, "QuotaExceeded");
        assert_eq!(errors[0].retry_count, 0);

        let alerts = h.alerts.all();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::High);
        assert_eq!(alerts[0].message, "Permanent error: llm failed");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_transient_failure_raises_medium_alert_and_opens_breaker() {
        let (stt, stt_calls) = Scripted::failing("stt", vec![FailureKind::Timeout; 3]);
        let (llm, llm_calls) = Scripted::ok("llm");
        let (tts, _) = Scripted::ok("tts");
        let h = harness(stt, llm, tts);

        let result = h.orchestrator.process("audio".to_string()).await;

        let abort = result.abort().unwrap();
        assert_eq!(abort.stage, TRANSCRIPTION);
        assert_eq!(abort.category, FailureCategory::Transient);
        assert_eq!(abort.attempts, 3);
        assert_eq!(stt_calls.load(Ordering::SeqCst), 3);
        assert_eq!(llm_calls.load(Ordering::SeqCst), 0);

        let record = &h.log.errors()[0];
        assert_eq!(record.breaker_state, BreakerState::Open);
        assert_eq!(record.retry_count, 2);
        assert_eq!(h.alerts.all()[0].severity, Severity::Medium);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_within_retry_budget() {
        let (stt, _) = Scripted::ok("stt");
        let (llm, llm_calls) = Scripted::failing("llm", vec![FailureKind::ServiceUnavailable]);
        let (tts, _) = Scripted::ok("tts");
        let h = harness(stt, llm, tts);

        let result = h.orchestrator.process("a".to_string()).await;

        assert_eq!(result.into_result().unwrap(), "a>stt>llm>tts");
        assert_eq!(llm_calls.load(Ordering::SeqCst), 2);
        assert!(h.alerts.is_empty());
        let llm = h.orchestrator.breaker(GENERATION).unwrap();
        assert_eq!(llm.snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_aborts_later_runs_without_calling_stage() {
        let (stt, stt_calls) = Scripted::failing("stt", vec![FailureKind::NetworkError; 10]);
        let (llm, _) = Scripted::ok("llm");
        let (tts, _) = Scripted::ok("tts");
        let h = harness(stt, llm, tts);

        let _ = h.orchestrator.process("first".to_string()).await;
        assert_eq!(stt_calls.load(Ordering::SeqCst), 3);

        let second = h.orchestrator.process("second".to_string()).await;
        let abort = second.abort().unwrap();
        assert_eq!(abort.kind, None);
        assert_eq!(abort.category, FailureCategory::Permanent);
        assert_eq!(abort.attempts, 1);
        assert_eq!(stt_calls.load(Ordering::SeqCst), 3);

        // Each terminal failure yields exactly one record and one alert.
        assert_eq!(h.log.errors().len(), 2);
        assert_eq!(h.alerts.len(), 2);
        assert_eq!(h.alerts.all()[1].severity, Severity::High);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_transitions_are_logged() {
        let (stt, _) = Scripted::failing("stt", vec![FailureKind::Timeout; 3]);
        let (llm, _) = Scripted::ok("llm");
        let (tts, _) = Scripted::ok("tts");
        let h = harness(stt, llm, tts);

        let _ = h.orchestrator.process("x".to_string()).await;

        let opened = h.log.entries().into_iter().any(|e| {
            matches!(
                e,
                LogEntry::CircuitStateChange {
                    new_state: BreakerState::Open,
                    ..
                }
            )
        });
        assert!(opened);

        h.orchestrator.reset_breakers();
        assert_eq!(
            h.orchestrator.breaker(TRANSCRIPTION).unwrap().state(),
            BreakerState::Closed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stage_override_applies_distinct_policy() {
        let log = Arc::new(MemoryEventLog::new());
        let (stt, stt_calls) = Scripted::failing("stt", vec![FailureKind::Timeout; 10]);
        let orchestrator = CallOrchestrator::<String>::builder()
            .event_log(log)
            .alert_sink(Arc::new(AlertBoard::new()))
            .stage_override(
                "stt",
                StageOverride {
                    retry: Some(RetryPolicy::new(Duration::from_millis(10), 2.0, 5).unwrap()),
                    breaker: Some(BreakerConfig::new(10, Duration::from_secs(1)).unwrap()),
                },
            )
            .stage("stt", stt)
            .build();

        let result = orchestrator.process(String::new()).await;
        assert_eq!(result.abort().unwrap().attempts, 5);
        assert_eq!(stt_calls.load(Ordering::SeqCst), 5);

        let status = orchestrator.system_status();
        assert_eq!(status.retry.max_attempts, 3);
        assert_eq!(status.stages[0].retry.max_attempts, 5);
        assert_eq!(status.stages[0].breaker.state, BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn fn_stage_and_unclassified_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let orchestrator = CallOrchestrator::<u32>::builder()
            .alert_sink(Arc::new(AlertBoard::new()))
            .stage("double", stage_fn(|n: u32| async move { Ok::<_, CallError>(n * 2) }))
            .stage(
                "broken",
                stage_fn(move |_n: u32| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err::<u32, _>(CallError::Unclassified("socket closed".into())) }
                }),
            )
            .build();

        let result = orchestrator.process(21).await;
        let abort = result.into_result().unwrap_err();
        assert_eq!(abort.stage, "broken");
        assert_eq!(abort.category, FailureCategory::Permanent);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.stage_names(), vec!["double", "broken"]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_runs_share_breaker_evidence() {
        let (stt, stt_calls) =
            Scripted::failing("stt", vec![FailureKind::AuthenticationFailed; 100]);
        let (llm, _) = Scripted::ok("llm");
        let (tts, _) = Scripted::ok("tts");
        let h = harness(stt, llm, tts);
        let orchestrator = Arc::new(h.orchestrator);

        let runs: Vec<_> = (0..6)
            .map(|i| {
                let o = orchestrator.clone();
                tokio::spawn(async move { o.process(format!("call-{i}")).await })
            })
            .collect();
        for run in runs {
            assert!(!run.await.unwrap().is_completed());
        }

        // Three failures trip the breaker; later runs fail fast.
        assert_eq!(stt_calls.load(Ordering::SeqCst), 3);
        let snap = orchestrator.breaker(TRANSCRIPTION).unwrap().snapshot();
        assert_eq!(snap.state, BreakerState::Open);
        assert_eq!(snap.failure_count, 3);
        assert_eq!(h.alerts.len(), 6);
    }

    #[test]
    fn system_status_serializes() {
        let (stt, _) = Scripted::ok("stt");
        let (llm, _) = Scripted::ok("llm");
        let (tts, _) = Scripted::ok("tts");
        let h = harness(stt, llm, tts);
        let json = serde_json::to_value(h.orchestrator.system_status()).unwrap();
        assert_eq!(json["retry"]["initial_delay_ms"], 5000);
        assert_eq!(json["stages"][1]["stage"], "LLM");
        assert_eq!(json["stages"][1]["breaker"]["state"], "CLOSED");
    }
}
