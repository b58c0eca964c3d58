use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::FailureCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Transient failures page at MEDIUM, permanent ones at HIGH.
    pub fn for_category(category: FailureCategory) -> Self {
        match category {
            FailureCategory::Transient => Severity::Medium,
            FailureCategory::Permanent => Severity::High,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Unresolved,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub service: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    pub status: AlertStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Receives alerts raised by the orchestrator.
pub trait AlertSink: Send + Sync {
    fn send_alert(
        &self,
        severity: Severity,
        service: &str,
        message: &str,
        context: Option<serde_json::Value>,
    );
}

/// In-memory alert store with resolve/clear for out-of-band review.
#[derive(Debug, Default)]
pub struct AlertBoard {
    alerts: RwLock<Vec<Alert>>,
}

impl AlertBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Alert> {
        self.alerts.read().clone()
    }

    /// Alerts still waiting for someone to look at them.
    pub fn active(&self) -> Vec<Alert> {
        self.alerts
            .read()
            .iter()
            .filter(|a| a.status == AlertStatus::Unresolved)
            .cloned()
            .collect()
    }

    /// Mark the alert at `index` as resolved. Returns false for an unknown index.
    pub fn resolve(&self, index: usize) -> bool {
        let mut alerts = self.alerts.write();
        match alerts.get_mut(index) {
            Some(alert) => {
                alert.status = AlertStatus::Resolved;
                alert.resolved_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.alerts.write().clear();
    }

    pub fn len(&self) -> usize {
        self.alerts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.read().is_empty()
    }
}

impl AlertSink for AlertBoard {
    fn send_alert(
        &self,
        severity: Severity,
        service: &str,
        message: &str,
        context: Option<serde_json::Value>,
    ) {
        self.alerts.write().push(Alert {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity,
            service: service.to_string(),
            message: message.to_string(),
            context,
            status: AlertStatus::Unresolved,
            resolved_at: None,
        });
    }
}

/// Emits alerts as tracing events, level chosen by severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn send_alert(
        &self,
        severity: Severity,
        service: &str,
        message: &str,
        context: Option<serde_json::Value>,
    ) {
        match severity {
            Severity::Low => info!(%severity, service, ?context, "ALERT: {message}"),
            Severity::Medium => warn!(%severity, service, ?context, "ALERT: {message}"),
            Severity::High | Severity::Critical => {
                error!(%severity, service, ?context, "ALERT: {message}")
            }
        }
    }
}
