//! Application State

use std::sync::Arc;

use agent_core::{LlmProvider, Orchestrator};

use crate::sessions::SessionManager;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Model service (Anthropic, or a scripted one in tests)
    pub provider: Arc<dyn LlmProvider>,

    /// Turn loop shared by every chat request
    pub orchestrator: Arc<Orchestrator>,

    /// Live chat sessions
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new(provider: Arc<dyn LlmProvider>, orchestrator: Orchestrator, sessions: SessionManager) -> Self {
        Self {
            provider,
            orchestrator: Arc::new(orchestrator),
            sessions: Arc::new(sessions),
        }
    }
}
