//! Error Types for the Clinic Tool Provider

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClinicError>;

#[derive(Error, Debug)]
pub enum ClinicError {
    #[error("No patient found with identifier: {0}")]
    PatientNotFound(String),

    #[error("A patient with id {0} already exists")]
    DuplicatePatient(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClinicError {
    /// Failures caused by the caller's input rather than the server
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::PatientNotFound(_) | Self::DuplicatePatient(_) | Self::InvalidArgument(_)
        )
    }
}
