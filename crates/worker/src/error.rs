//! Worker error types

use jobline_client::ClientError;
use serde::{Deserialize, Serialize};

use crate::runtime::LifecycleState;

/// Result type for worker lifecycle operations
pub type Result<T> = std::result::Result<T, WorkerError>;

/// Errors surfaced by [`WorkerRuntime`](crate::WorkerRuntime) lifecycle calls
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// `start()` called on a runtime that has already left `Idle`
    #[error("worker cannot start from state {0}")]
    AlreadyStarted(LifecycleState),

    /// Worker configuration failed validation
    #[error("invalid worker configuration: {0}")]
    InvalidConfig(String),

    /// The remote service refused or failed the registration
    #[error("worker registration failed: {0}")]
    RegistrationFailed(#[source] ClientError),

    /// A queue backend call failed
    #[error("queue backend error: {0}")]
    Backend(#[from] ClientError),
}

/// Error returned by a job handler
///
/// Reported to the queue service as the job's failure. `retryable` tells
/// the service whether another attempt makes sense.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    pub error_type: Option<String>,

    /// Whether the queue should schedule another attempt
    pub retryable: bool,

    /// Additional error details
    pub details: Option<serde_json::Value>,
}

impl JobError {
    /// Create a new retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: true,
            details: None,
        }
    }

    /// Create a non-retryable error
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: false,
            details: None,
        }
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Add error details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_type {
            Some(error_type) => write!(f, "{}: {}", error_type, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for JobError {}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        Self::non_retryable(err.to_string()).with_type("invalid_payload")
    }
}

impl From<ClientError> for JobError {
    fn from(err: ClientError) -> Self {
        let retryable = err.is_retryable();
        Self {
            message: err.to_string(),
            error_type: Some(err.kind().to_string()),
            retryable,
            details: None,
        }
    }
}
