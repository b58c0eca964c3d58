//! Simulated transcription, generation and synthesis backends.
//!
//! Each mock fails with probability `failure_rate`, picking one of its
//! service-specific failure scenarios at random, and counts its invocations.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::debug;

use crate::error::{CallError, FailureKind, ServiceError};
use crate::orchestrator::{GENERATION, SYNTHESIS, Stage, TRANSCRIPTION};

/// Data flowing between the call-agent stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Audio(Vec<u8>),
    Text(String),
}

impl Payload {
    fn is_audio(&self) -> bool {
        matches!(self, Payload::Audio(_))
    }
}

pub struct MockService {
    name: &'static str,
    failure_rate: f64,
    scenarios: Vec<(FailureKind, &'static str)>,
    expects_audio: bool,
    output: Payload,
    latency: Duration,
    calls: AtomicU32,
}

impl MockService {
    /// Speech-to-text: audio in, text out.
    pub fn transcriber(failure_rate: f64) -> Self {
        Self::new(
            TRANSCRIPTION,
            failure_rate,
            vec![
                (FailureKind::Timeout, "STT service timeout"),
                (FailureKind::RateLimited, "STT rate limit exceeded"),
                (FailureKind::NetworkError, "STT network connection failed"),
                (FailureKind::AuthenticationFailed, "STT authentication failed"),
            ],
            true,
            Payload::Text("Hello, this is the transcribed text from audio".into()),
        )
    }

    /// Response generation: text in, text out.
    pub fn responder(failure_rate: f64) -> Self {
        Self::new(
            GENERATION,
            failure_rate,
            vec![
                (FailureKind::Timeout, "LLM service timeout"),
                (FailureKind::ServiceUnavailable, "LLM service unavailable"),
                (FailureKind::QuotaExceeded, "LLM quota exceeded"),
                (FailureKind::InvalidPayload, "LLM invalid request"),
            ],
            false,
            Payload::Text("This is a generated response from the AI assistant".into()),
        )
    }

    /// Speech synthesis: text in, audio out.
    pub fn synthesizer(failure_rate: f64) -> Self {
        Self::new(
            SYNTHESIS,
            failure_rate,
            vec![
                (FailureKind::Timeout, "TTS service timeout"),
                (FailureKind::NetworkError, "TTS network error"),
                (FailureKind::RateLimited, "TTS rate limit exceeded"),
                (FailureKind::NotFound, "TTS voice not found"),
            ],
            false,
            Payload::Audio(b"<simulated_audio_data>".to_vec()),
        )
    }

    fn new(
        name: &'static str,
        failure_rate: f64,
        scenarios: Vec<(FailureKind, &'static str)>,
        expects_audio: bool,
        output: Payload,
    ) -> Self {
        Self {
            name,
            failure_rate: if failure_rate.is_nan() { 0.0 } else { failure_rate.clamp(0.0, 1.0) },
            scenarios,
            expects_audio,
            output,
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    /// Simulated processing time per call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn roll_failure(&self) -> Option<ServiceError> {
        let mut rng = rand::thread_rng();
        if !rng.gen_bool(self.failure_rate) {
            return None;
        }
        self.scenarios
            .choose(&mut rng)
            .map(|(kind, message)| ServiceError::new(*kind, *message).with_service(self.name))
    }
}

#[async_trait]
impl Stage<Payload> for MockService {
    async fn run(&self, input: Payload) -> Result<Payload, CallError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(service = self.name, attempt, "service called");

        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        if input.is_audio() != self.expects_audio {
            let expected = if self.expects_audio { "audio" } else { "text" };
            return Err(ServiceError::new(
                FailureKind::InvalidPayload,
                format!("{} expects {expected} input", self.name),
            )
            .with_service(self.name)
            .into());
        }
        match self.roll_failure() {
            Some(err) => Err(err.into()),
            None => Ok(self.output.clone()),
        }
    }
}
