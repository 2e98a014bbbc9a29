//! Error Types

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Failures of the framed byte stream to the tool-provider subprocess
#[derive(Error, Debug)]
pub enum TransportError {
    /// The peer closed its output cleanly (process exited)
    #[error("end of stream: tool provider closed its output")]
    Eof,

    /// A frame arrived that is not a valid protocol message
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The channel was already closed by this side
    #[error("transport is closed")]
    Closed,

    /// The subprocess could not be started
    #[error("failed to spawn tool provider: {0}")]
    Spawn(String),

    /// Pipe I/O failure
    #[error("pipe I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the remote model service
#[derive(Error, Debug)]
pub enum ModelError {
    /// The request exceeded its deadline
    #[error("model request timed out after {0:?}")]
    Timeout(Duration),

    /// Non-success HTTP status
    #[error("model service returned {status}: {message}")]
    Http { status: u16, message: String },

    /// Rate limited by the service
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Credentials rejected
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The reply could not be interpreted
    #[error("invalid model reply: {0}")]
    InvalidReply(String),

    /// Service unreachable or not configured
    #[error("model service unavailable: {0}")]
    Unavailable(String),
}

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Pipe/process I/O failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Handshake or framing violation
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Tool arguments rejected before dispatch
    #[error("Validation error: {0}")]
    Validation(String),

    /// The tool provider reported a failure for one invocation
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Remote model call failure
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// The session's channel is no longer trustworthy
    #[error("Session error: {0}")]
    Session(String),

    /// The caller cancelled the run
    #[error("Run cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error category reported to callers as part of a structured failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Protocol,
    Validation,
    ToolExecution,
    Model,
    ModelTimeout,
    Session,
    Cancelled,
    Config,
    Internal,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Validation => "validation",
            Self::ToolExecution => "tool_execution",
            Self::Model => "model",
            Self::ModelTimeout => "model_timeout",
            Self::Session => "session",
            Self::Cancelled => "cancelled",
            Self::Config => "config",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AgentError {
    /// Errors the turn loop absorbs and reports to the model as an error result
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::ToolExecution(_))
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Validation(_) => ErrorKind::Validation,
            Self::ToolExecution(_) => ErrorKind::ToolExecution,
            Self::Model(ModelError::Timeout(_)) => ErrorKind::ModelTimeout,
            Self::Model(_) => ErrorKind::Model,
            Self::Session(_) => ErrorKind::Session,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) | Self::Json(_) => ErrorKind::Internal,
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Model(ModelError::Timeout(_)) => {
                "The AI service took too long to respond. Please try again.".into()
            }
            Self::Model(ModelError::RateLimited(_)) => {
                "You've made too many requests. Please wait a moment.".into()
            }
            Self::Model(ModelError::Auth(_)) => {
                "Authentication with the AI service failed.".into()
            }
            Self::Model(e) => format!("The AI service encountered an error: {e}"),
            Self::Transport(_) | Self::Session(_) => {
                "The clinic tool service stopped responding. Please start a new session.".into()
            }
            Self::Protocol(msg) => format!("The clinic tool service misbehaved: {msg}"),
            Self::Validation(msg) => format!("Invalid tool input: {msg}"),
            Self::ToolExecution(msg) => format!("Tool error: {msg}"),
            Self::Cancelled => "The request was cancelled.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}
