//! Core error types.

use crate::validation::ValidationResult;
use thiserror::Error;

/// Errors from the workflow engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {}", .0.errors().join("; "))]
    Validation(ValidationResult),

    /// The stored definition is not usable even though it passed validation
    /// when it was created.
    #[error("structural error: {reason}")]
    Structural { reason: String },
}

impl CoreError {
    pub fn structural(reason: impl Into<String>) -> Self {
        CoreError::Structural {
            reason: reason.into(),
        }
    }
}
