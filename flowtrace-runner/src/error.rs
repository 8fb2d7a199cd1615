use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use flowtrace_core::CoreError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Execution error: {0}")]
    Execution(#[from] CoreError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, details) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "Workflow not found", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "Bad request", msg.clone()),
            ApiError::Execution(err @ CoreError::Validation(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "Invalid workflow", err.to_string())
            }
            ApiError::Execution(err) => {
                tracing::error!(error = %err, "Execution failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Execution failed", err.to_string())
            }
            ApiError::Internal(err) => {
                tracing::error!(error = %err, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", err.clone())
            }
        };

        (status, Json(json!({ "error": message, "details": details }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
