//! Error types for uploads.

use std::time::Duration;
use thiserror::Error;

/// Result type for upload operations.
pub type UploadResult<T> = Result<T, UploadError>;

/// Errors raised while building or sending an upload request.
///
/// HTTP responses are not errors: any status code the server answers with
/// is mapped to an [`UploadStatus`](crate::UploadStatus) instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// The connection failed or was interrupted.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
    },

    /// The host name could not be resolved.
    #[error("DNS resolution failed: {message}")]
    Dns {
        /// Error message.
        message: String,
    },

    /// No response within the call timeout.
    #[error("request timed out after {timeout:?}")]
    Timeout {
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// The request could not be built from the batch.
    #[error("request creation failed: {message}")]
    RequestCreation {
        /// Error message.
        message: String,
    },

    /// A header value cannot be sent over HTTP.
    #[error("invalid value for header {name}")]
    InvalidHeader {
        /// Header name.
        name: String,
    },

    /// Local storage failed while preparing the upload.
    #[error("storage error: {message}")]
    Storage {
        /// Error message.
        message: String,
    },

    /// The scheduler thread could not be started.
    #[error("I/O error: {message}")]
    Io {
        /// Error message.
        message: String,
    },

    /// Any other client failure.
    #[error("{message}")]
    Other {
        /// Error message.
        message: String,
    },
}

impl UploadError {
    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a DNS error.
    pub fn dns(message: impl Into<String>) -> Self {
        Self::Dns {
            message: message.into(),
        }
    }

    /// Creates a request creation error.
    pub fn request_creation(message: impl Into<String>) -> Self {
        Self::RequestCreation {
            message: message.into(),
        }
    }

    /// Creates an uncategorized error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Returns true if the remote end was never reached.
    ///
    /// The scheduler backs off to its longest delay on these.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            UploadError::Network { .. } | UploadError::Dns { .. } | UploadError::Timeout { .. }
        )
    }

    /// Returns true if sending the same batch again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Network { .. } | UploadError::Dns { .. } | UploadError::Timeout { .. } => {
                true
            }
            UploadError::Storage { .. } | UploadError::Other { .. } => true,
            UploadError::RequestCreation { .. }
            | UploadError::InvalidHeader { .. }
            | UploadError::Io { .. } => false,
        }
    }
}

impl From<std::io::Error> for UploadError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            message: e.to_string(),
        }
    }
}

impl From<telepipe_core::CoreError> for UploadError {
    fn from(e: telepipe_core::CoreError) -> Self {
        Self::Storage {
            message: e.to_string(),
        }
    }
}
