//! Gateway error type.
//!
//! Every fallible handler returns `Result<T, GatewayError>`. Each variant has
//! a fixed HTTP status and a machine-readable code; the JSON body is
//! `{"error": {"message", "type", "code"}}` in all cases, including the
//! in-band error event of a failed stream.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::inference::client::BackendError;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The caller sent a missing, malformed or out-of-range field.
    #[error("{0}")]
    InvalidInput(String),

    /// The inference engine could not be reached.
    #[error("{0}")]
    BackendUnavailable(String),

    /// The inference engine did not answer within the configured bound.
    #[error("{0}")]
    BackendTimeout(String),

    /// The inference engine answered with an error.
    #[error("{0}")]
    BackendFailed(String),

    #[error("{0}")]
    Internal(String),
}

/// Serialized error envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: &'static str,
    pub code: &'static str,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            GatewayError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::BackendTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::BackendFailed(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidInput(_) => "invalid_input",
            GatewayError::BackendUnavailable(_) => "backend_unavailable",
            GatewayError::BackendTimeout(_) => "backend_timeout",
            GatewayError::BackendFailed(_) => "backend_failed",
            GatewayError::Internal(_) => "internal",
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::InvalidInput(_) => "invalid_request_error",
            GatewayError::BackendUnavailable(_)
            | GatewayError::BackendTimeout(_)
            | GatewayError::BackendFailed(_) => "backend_error",
            GatewayError::Internal(_) => "server_error",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: self.error_type(),
                code: self.code(),
            },
        }
    }
}

impl From<BackendError> for GatewayError {
    fn from(err: BackendError) -> Self {
        let message = err.to_string();
        match err {
            BackendError::Unavailable(_) => GatewayError::BackendUnavailable(message),
            BackendError::Timeout { .. } => GatewayError::BackendTimeout(message),
            BackendError::Status { .. } | BackendError::Engine(_) => {
                GatewayError::BackendFailed(message)
            }
            BackendError::Decode(_) => GatewayError::Internal(message),
        }
    }
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        GatewayError::InvalidInput(rejection.body_text())
    }
}

impl From<prometheus::Error> for GatewayError {
    fn from(err: prometheus::Error) -> Self {
        GatewayError::Internal(format!("metrics: {err}"))
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), "{self}");
        }
        (status, Json(self.body())).into_response()
    }
}
