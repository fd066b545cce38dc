// ABOUTME: Shared application state handed to every handler
// ABOUTME: Built once at startup; holds the orchestrator and auth settings

use axum::extract::FromRef;
use std::sync::Arc;
use warden_agent::SessionOrchestrator;

use crate::auth::AuthConfig;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SessionOrchestrator>,
    pub auth: AuthConfig,
}

impl AppState {
    pub fn new(orchestrator: Arc<SessionOrchestrator>, auth: AuthConfig) -> Self {
        Self { orchestrator, auth }
    }
}

impl FromRef<AppState> for AuthConfig {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}
