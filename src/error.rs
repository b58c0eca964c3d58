use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCategory {
    /// Temporary condition; the same call may succeed later.
    Transient,
    /// Retrying the same call cannot help.
    Permanent,
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCategory::Transient => write!(f, "Transient"),
            FailureCategory::Permanent => write!(f, "Permanent"),
        }
    }
}

/// Concrete failure reported by a backend service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    Timeout,
    NetworkError,
    ServiceUnavailable,
    RateLimited,
    /// Any other 5xx response.
    ServerError,
    AuthenticationFailed,
    InvalidPayload,
    QuotaExceeded,
    NotFound,
    /// A status code with no known meaning.
    Unrecognized,
}

impl FailureKind {
    /// Category lookup. Every kind belongs to exactly one category.
    pub fn category(self) -> FailureCategory {
        match self {
            FailureKind::Timeout
            | FailureKind::NetworkError
            | FailureKind::ServiceUnavailable
            | FailureKind::RateLimited
            | FailureKind::ServerError => FailureCategory::Transient,
            FailureKind::AuthenticationFailed
            | FailureKind::InvalidPayload
            | FailureKind::QuotaExceeded
            | FailureKind::NotFound
            | FailureKind::Unrecognized => FailureCategory::Permanent,
        }
    }

    pub fn is_transient(self) -> bool {
        self.category() == FailureCategory::Transient
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::Timeout => "Timeout",
            FailureKind::NetworkError => "NetworkError",
            FailureKind::ServiceUnavailable => "ServiceUnavailable",
            FailureKind::RateLimited => "RateLimited",
            FailureKind::ServerError => "ServerError",
            FailureKind::AuthenticationFailed => "AuthenticationFailed",
            FailureKind::InvalidPayload => "InvalidPayload",
            FailureKind::QuotaExceeded => "QuotaExceeded",
            FailureKind::NotFound => "NotFound",
            FailureKind::Unrecognized => "Unrecognized",
        };
        write!(f, "{name}")
    }
}

/// A classified failure from a backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ServiceError {
    pub kind: FailureKind,
    pub message: String,
    /// Name of the service that produced the failure, when known.
    pub service: Option<String>,
}

impl ServiceError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            service: None,
        }
    }

    /// Tag the error with its originating service.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn category(&self) -> FailureCategory {
        self.kind.category()
    }
}

/// Everything a guarded call can fail with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("circuit breaker OPEN for {service}, failing fast")]
    CircuitOpen { service: String },

    /// A failure that carries no classification.
    #[error("unclassified failure: {0}")]
    Unclassified(String),
}

impl CallError {
    /// Retry eligibility. Only classified transient service errors qualify;
    /// open circuits and unclassified failures are never retried.
    pub fn category(&self) -> FailureCategory {
        match self {
            CallError::Service(e) => e.category(),
            CallError::CircuitOpen { .. } | CallError::Unclassified(_) => {
                FailureCategory::Permanent
            }
        }
    }

    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            CallError::Service(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Short label used in log records.
    pub fn label(&self) -> String {
        match self {
            CallError::Service(e) => e.kind.to_string(),
            CallError::CircuitOpen { .. } => "CircuitOpen".to_string(),
            CallError::Unclassified(_) => "Unclassified".to_string(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            CallError::Service(e) => e.message.clone(),
            other => other.to_string(),
        }
    }
}

/// Map an HTTP-like status code to a classified error.
///
/// Unknown codes outside the 5xx range are Permanent so they are never retried.
pub fn classify(status_code: u16, message: &str) -> ServiceError {
    let (kind, text) = match status_code {
        503 => (
            FailureKind::ServiceUnavailable,
            format!("Service unavailable (503): {message}"),
        ),
        429 => (
            FailureKind::RateLimited,
            format!("Rate limit exceeded (429): {message}"),
        ),
        408 | 504 => (
            FailureKind::Timeout,
            format!("Request timeout ({status_code}): {message}"),
        ),
        401 | 403 => (
            FailureKind::AuthenticationFailed,
            format!("Authentication failed ({status_code}): {message}"),
        ),
        404 => (
            FailureKind::NotFound,
            format!("Resource not found (404): {message}"),
        ),
        400 => (
            FailureKind::InvalidPayload,
            format!("Invalid request (400): {message}"),
        ),
        500..=599 => (
            FailureKind::ServerError,
            format!("Server error ({status_code}): {message}"),
        ),
        _ => (
            FailureKind::Unrecognized,
            format!("Unknown error ({status_code}): {message}"),
        ),
    };
    ServiceError::new(kind, text)
}

/// Invalid resilience settings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("backoff_multiplier must be greater than 1, got {0}")]
    MultiplierTooSmall(f64),

    #[error("failure_threshold must be at least 1")]
    ZeroThreshold,
}
