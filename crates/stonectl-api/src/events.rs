//! Orchestrator event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Daemon,
    Service,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventLevel {
    Info,
    Error,
}

/// Something the orchestrator did or observed for a daemon or a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrchestratorEvent {
    pub created: DateTime<Utc>,
    pub kind: EventKind,
    /// Daemon name or service name
    pub subject: String,
    pub level: EventLevel,
    pub message: String,
}

impl OrchestratorEvent {
    pub fn daemon(subject: impl Into<String>, level: EventLevel, message: impl Into<String>) -> Self {
        Self {
            created: Utc::now(),
            kind: EventKind::Daemon,
            subject: subject.into(),
            level,
            message: message.into(),
        }
    }

    pub fn service(
        subject: impl Into<String>,
        level: EventLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            created: Utc::now(),
            kind: EventKind::Service,
            subject: subject.into(),
            level,
            message: message.into(),
        }
    }
}
