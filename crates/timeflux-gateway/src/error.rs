//! Error types for outbound API calls.

use thiserror::Error;

/// Error bodies are truncated before they are carried in an error so a
/// large upstream response cannot bloat logs or webhook results.
const BODY_SNIPPET_LEN: usize = 512;

/// Errors produced by the API gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// No credential is configured for the workspace. Live executions
    /// cannot proceed without one.
    #[error("No API token configured for workspace {workspace_id}")]
    MissingToken { workspace_id: String },

    /// The caller handed the gateway something it cannot send.
    #[error("Invalid gateway request: {message}")]
    InvalidRequest { message: String },

    /// The provider answered with a non-success status.
    #[error("API call failed with status {status}: {body}")]
    Api {
        status: u16,
        body: String,
        retry_after_ms: Option<u64>,
    },

    /// The request never produced a response (connect failure, timeout,
    /// connection reset mid-body).
    #[error("API transport error: {message}")]
    Transport { message: String },

    /// The provider answered 2xx but the payload did not have the
    /// expected shape.
    #[error("Unexpected API response: {message}")]
    InvalidResponse { message: String },
}

impl GatewayError {
    #[must_use]
    pub fn missing_token(workspace_id: impl Into<String>) -> Self {
        Self::MissingToken {
            workspace_id: workspace_id.into(),
        }
    }

    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Builds an API error, truncating the body snippet.
    #[must_use]
    pub fn api(status: u16, body: &str, retry_after_ms: Option<u64>) -> Self {
        Self::Api {
            status,
            body: truncate_body(body),
            retry_after_ms,
        }
    }

    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// True when a retry may succeed: rate limiting, server errors and
    /// transport failures. Client errors and malformed responses are final.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Transport { .. } => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_missing_token(&self) -> bool {
        matches!(self, Self::MissingToken { .. })
    }

    /// HTTP status of the upstream response, when there was one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub(crate) fn truncate_body(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_LEN).collect()
}
