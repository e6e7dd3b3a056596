//! Request and response bodies for the REST API.

use chrono::{DateTime, Utc};
use flowstate_core::{ActionId, DefinitionId};
use serde::{Deserialize, Serialize};

/// Envelope wrapped around every API response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<Vec<String>>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            validation_errors: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            validation_errors: None,
        }
    }

    pub fn validation(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: None,
            validation_errors: Some(errors),
        }
    }
}

/// Body of `POST /api/WorkflowInstances`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartInstanceRequest {
    pub definition_id: DefinitionId,
}

/// Body of `POST /api/WorkflowInstances/{id}/actions`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteActionRequest {
    pub action_id: ActionId,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            status: "Healthy",
            timestamp: Utc::now(),
        }
    }
}
