//! HTTP error mapping shared by the REST handlers.
//!
//! Domain errors from the core, store and gateway crates convert into
//! [`ApiError`], which renders as a structured JSON body:
//!
//! ```json
//! {"error": {"code": "not_found", "message": "Rule r1 not found"}}
//! ```

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use timeflux_core::CoreError;
use timeflux_gateway::GatewayError;
use timeflux_store::StoreError;

/// High-level API errors mapped to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("Upstream API failure: {0}")]
    BadGateway(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
    pub fn precondition_failed(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }
    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        Self::BadGateway(msg.into())
    }
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code carried in the response body.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::PreconditionFailed(_) => "precondition_failed",
            ApiError::BadGateway(_) => "bad_gateway",
            ApiError::Unavailable(_) => "unavailable",
            ApiError::Internal(_) => "internal",
        }
    }

    fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::PreconditionFailed(msg)
            | ApiError::BadGateway(msg)
            | ApiError::Unavailable(msg)
            | ApiError::Internal(msg) => msg,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.message().to_string(),
            },
        }
    }
}

/// JSON envelope for error responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.to_body())).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        // Both variants describe a payload the client sent.
        ApiError::bad_request(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::InvalidArgument { .. } => ApiError::bad_request(err.to_string()),
            StoreError::Unavailable { .. } => ApiError::unavailable(err.to_string()),
            StoreError::Serialization { .. } | StoreError::Internal { .. } => {
                ApiError::internal(err.to_string())
            }
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match &err {
            GatewayError::MissingToken { .. } => ApiError::precondition_failed(err.to_string()),
            GatewayError::InvalidRequest { .. } => ApiError::bad_request(err.to_string()),
            GatewayError::Api { .. }
            | GatewayError::Transport { .. }
            | GatewayError::InvalidResponse { .. } => ApiError::bad_gateway(err.to_string()),
        }
    }
}
