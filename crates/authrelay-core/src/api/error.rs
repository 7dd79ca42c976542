use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Message every caller of a failed refresh cycle observes.
pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired";

#[derive(Error, Debug)]
pub enum ApiError {
    /// Non-2xx response from the platform.
    #[error("{message}")]
    Http {
        status: StatusCode,
        body: Value,
        message: String,
    },

    /// The session token could not be repaired; credentials were cleared.
    #[error("Session expired")]
    SessionExpired,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credential storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut cut = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..cut], body.len())
        }
    }

    /// Build the structured error for a non-2xx response.
    ///
    /// The body is kept as parsed JSON when possible, otherwise as a
    /// (truncated) JSON string. The message prefers the body's `message`
    /// field, then `error`, then a generic status line.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let body = serde_json::from_str::<Value>(body)
            .unwrap_or_else(|_| Value::String(Self::truncate_body(body)));

        let message = ["message", "error"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .filter(|m| !m.is_empty())
            .map(Self::truncate_body)
            .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()));

        ApiError::Http {
            status,
            body,
            message,
        }
    }

    /// HTTP status associated with this error, if any.
    ///
    /// A failed refresh reports 401 so callers still see the status of the
    /// request that started it.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::SessionExpired => Some(StatusCode::UNAUTHORIZED),
            ApiError::Network(e) => e.status(),
            _ => None,
        }
    }

    /// Parsed response body for HTTP errors.
    pub fn body(&self) -> Option<&Value> {
        match self {
            ApiError::Http { body, .. } => Some(body),
            _ => None,
        }
    }

    /// True for a raw 401 response (before or without a refresh attempt).
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Http { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, ApiError::SessionExpired)
    }
}
