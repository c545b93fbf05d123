//! Application state shared across HTTP handlers

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kameo::actor::ActorRef;
use stonectl_core::OrchestratorActor;

use crate::config::Config;

/// Handles every request needs: the orchestrator mailbox and the loaded
/// configuration
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: ActorRef<OrchestratorActor>,
    pub config: Arc<Config>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(orchestrator: ActorRef<OrchestratorActor>, config: Config) -> Self {
        Self {
            orchestrator,
            config: Arc::new(config),
            started_at: Utc::now(),
        }
    }
}
