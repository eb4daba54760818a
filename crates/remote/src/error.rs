//! Error types for the REST document store.

use thiserror::Error;

/// Result type alias for REST store operations.
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Retry policy class for API failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiRetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Errors that can occur while talking to the document API.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API error response from the document service
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Response did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Missing configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RemoteError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> ApiRetryClass {
        match self {
            Self::Api { status, .. } => match *status {
                401 | 403 => ApiRetryClass::ReauthRequired,
                408 | 409 | 423 | 425 | 429 => ApiRetryClass::Retryable,
                500..=599 => ApiRetryClass::Retryable,
                _ => ApiRetryClass::Permanent,
            },
            Self::Http(_) => ApiRetryClass::Retryable,
            Self::Json(_) | Self::InvalidResponse(_) | Self::Config(_) => ApiRetryClass::Permanent,
        }
    }
}

impl From<RemoteError> for xpenza_core::Error {
    fn from(err: RemoteError) -> Self {
        let retryable = err.retry_class() == ApiRetryClass::Retryable;
        xpenza_core::Error::Remote {
            message: err.to_string(),
            retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_class_for_auth_error_is_reauth() {
        let err = RemoteError::api(401, "unauthorized");
        assert_eq!(err.retry_class(), ApiRetryClass::ReauthRequired);
    }

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        assert_eq!(RemoteError::api(503, "down").retry_class(), ApiRetryClass::Retryable);
        assert_eq!(RemoteError::api(429, "slow").retry_class(), ApiRetryClass::Retryable);
        assert_eq!(RemoteError::api(400, "bad").retry_class(), ApiRetryClass::Permanent);
        assert_eq!(RemoteError::api(404, "gone").status_code(), Some(404));
    }

    #[test]
    fn converts_into_core_error_with_retry_hint() {
        let core: xpenza_core::Error = RemoteError::api(500, "boom").into();
        assert!(matches!(core, xpenza_core::Error::Remote { retryable: true, .. }));
        let core: xpenza_core::Error = RemoteError::invalid_response("no name").into();
        assert!(matches!(core, xpenza_core::Error::Remote { retryable: false, .. }));
    }
}
