// ABOUTME: API error type and its mapping to HTTP responses
// ABOUTME: Every error renders as {success:false, error:{code,message}, request_id}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;
use warden_agent::AgentError;
use warden_sandbox::SandboxError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unauthorized access")]
    Unauthorized,

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Sandbox provisioning failed: {0}")]
    Provisioning(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: ErrorDetail,
    request_id: String,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl AppError {
    fn to_status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            AppError::Provisioning(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "PROVISIONING_ERROR")
            }
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    /// Message safe to show callers
    fn to_user_message(&self) -> String {
        match self {
            AppError::Unauthorized => "Invalid or missing bearer token".to_string(),
            AppError::NotFound(_) => "Session not found".to_string(),
            AppError::Conflict(msg) => msg.clone(),
            AppError::Provisioning(msg) => format!("Failed to create sandbox: {}", msg),
            AppError::Internal(_) => "An internal server error occurred".to_string(),
        }
    }
}

impl From<AgentError> for AppError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::SessionNotFound(id) => AppError::NotFound(id),
            AgentError::StoppedDuringProvisioning(_) => AppError::Conflict(err.to_string()),
            AgentError::Sandbox(SandboxError::NotFound(id)) => AppError::NotFound(id),
            AgentError::Sandbox(SandboxError::AlreadyActive(_)) => {
                AppError::Conflict(err.to_string())
            }
            AgentError::Sandbox(SandboxError::Provisioning(e)) => {
                AppError::Provisioning(e.to_string())
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        let (status_code, error_code) = self.to_status_and_code();

        match &self {
            AppError::Internal(msg) | AppError::Provisioning(msg) => {
                error!(
                    request_id = %request_id,
                    error_code = %error_code,
                    error = %msg,
                    "Request failed"
                );
            }
            _ => {
                info!(
                    request_id = %request_id,
                    error_code = %error_code,
                    error = %self,
                    "API error response"
                );
            }
        }

        let body = ErrorResponse {
            success: false,
            error: ErrorDetail {
                code: error_code.to_string(),
                message: self.to_user_message(),
            },
            request_id,
        };

        (status_code, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, AppError>;
