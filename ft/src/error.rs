//! Service error taxonomy
//!
//! Every failure a caller can see is one of these. Lower layers keep their
//! own error types and convert on the way up.

use thiserror::Error;

use crate::extract::ExtractionError;
use crate::state::StateError;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad or missing input; nothing was attempted
    #[error("{0}")]
    InvalidRequest(String),

    /// The extraction provider failed or was unreachable
    #[error("extraction service failed{}: {message}", status.map(|s| format!(" with status {}", s)).unwrap_or_default())]
    ExtractionService { status: Option<u16>, message: String },

    /// The provider answered with something that is not a usable task
    #[error("extraction returned an invalid task: {0}")]
    ExtractionValidation(String),

    #[error("storage failed: {0}")]
    Storage(String),

    #[error("task not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<ExtractionError> for Error {
    fn from(e: ExtractionError) -> Self {
        match e {
            ExtractionError::Service { status, message } => Error::ExtractionService { status, message },
            ExtractionError::Validation(e) => Error::ExtractionValidation(e.to_string()),
        }
    }
}

impl From<StateError> for Error {
    fn from(e: StateError) -> Self {
        Error::Storage(e.to_string())
    }
}
