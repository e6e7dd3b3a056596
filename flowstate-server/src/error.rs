//! Service error types.

use flowstate_core::{CoreError, DefinitionId, InstanceId};
use flowstate_storage::StorageError;
use thiserror::Error;

/// Errors returned by [`crate::WorkflowService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request was understood but breaks a workflow rule.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Workflow definition '{0}' not found")]
    DefinitionNotFound(DefinitionId),

    #[error("Workflow instance '{0}' not found")]
    InstanceNotFound(InstanceId),

    /// Stored data is inconsistent. The caller did nothing wrong.
    #[error("{0}")]
    Structural(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<CoreError> for ServiceError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(result) => ServiceError::Validation(result.errors()),
            CoreError::Structural { reason } => ServiceError::Structural(reason),
        }
    }
}

impl ServiceError {
    /// Returns a stable error code for logs and metrics.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "VALIDATION_FAILED",
            ServiceError::DefinitionNotFound(_) => "DEFINITION_NOT_FOUND",
            ServiceError::InstanceNotFound(_) => "INSTANCE_NOT_FOUND",
            ServiceError::Structural(_) => "STRUCTURAL_ERROR",
            ServiceError::InvalidRequest(_) => "BAD_REQUEST",
            ServiceError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Returns the HTTP status this error is reported with.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) | ServiceError::InvalidRequest(_) => 400,
            ServiceError::DefinitionNotFound(_) | ServiceError::InstanceNotFound(_) => 404,
            ServiceError::Structural(_) | ServiceError::Storage(_) => 500,
        }
    }

    /// Returns true for failures caused by the server rather than the request.
    pub fn is_internal(&self) -> bool {
        self.status_code() >= 500
    }
}
