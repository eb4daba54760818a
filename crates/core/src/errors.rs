//! Error types shared across the workspace.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by collaborators of the sync store.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote document store rejected or failed a request
    #[error("Remote store error: {message}")]
    Remote { message: String, retryable: bool },

    /// A point operation targeted a document that does not exist
    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// A stored document could not be decoded into a domain record
    #[error("Invalid document {id}: {message}")]
    InvalidDocument { id: String, message: String },

    /// Local persistent cache failure
    #[error("Cache error: {0}")]
    Cache(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Caller supplied a value the domain does not accept
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn invalid_document(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_the_document() {
        let err = Error::not_found("transactions", "abc");
        assert_eq!(err.to_string(), "Document not found: transactions/abc");
    }

    #[test]
    fn remote_errors_carry_retry_hint() {
        assert!(matches!(
            Error::remote("timeout"),
            Error::Remote { retryable: true, .. }
        ));
        assert!(matches!(
            Error::permanent("bad request"),
            Error::Remote { retryable: false, .. }
        ));
    }
}
