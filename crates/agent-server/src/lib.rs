//! HTTP front end for the veterinary assistant.
//!
//! Each chat session owns one `vet-clinic-server` subprocess; sessions live
//! in memory until they are deleted, fail, or the server shuts down.

pub mod config;
pub mod handlers;
pub mod sessions;
pub mod state;

use axum::{
    Router,
    routing::{delete, get, post},
};

pub use config::{ConfigError, ServerConfig};
pub use sessions::{ProcessLauncher, SessionLauncher, SessionManager};
pub use state::AppState;

use crate::handlers::{
    chat_handler, create_patient, end_session, get_patient, health_check, list_patients, list_tools,
};

/// All routes, without middleware
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health & info
        .route("/health", get(health_check))
        .route("/api/tools", get(list_tools))
        // Agent API
        .route("/api/chat", post(chat_handler))
        .route("/api/sessions/{id}", delete(end_session))
        // Direct record access
        .route("/api/patients", get(list_patients).post(create_patient))
        .route("/api/patients/{id}", get(get_patient))
        .with_state(state)
}
