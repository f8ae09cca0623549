//! Error types for Telepipe core.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] telepipe_storage::StorageError),

    /// Codec error. Structural errors mean a file on disk is damaged.
    #[error("codec error: {0}")]
    Codec(#[from] telepipe_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A storage root cannot be used.
    #[error("invalid storage root: {message}")]
    InvalidRoot {
        /// Why the root was rejected.
        message: String,
    },

    /// A datastore key cannot be used as a file name.
    #[error("invalid datastore key: {key:?}")]
    InvalidKey {
        /// The offending key.
        key: String,
    },

    /// A feature name cannot be used as a directory name.
    #[error("invalid feature name: {name:?}")]
    InvalidFeatureName {
        /// The offending name.
        name: String,
    },

    /// The persistence executor no longer accepts tasks.
    #[error("executor is shut down")]
    ExecutorClosed,

    /// A task did not complete in time.
    #[error("task {name} timed out after {timeout:?}")]
    Timeout {
        /// Name of the task.
        name: String,
        /// How long the caller waited.
        timeout: Duration,
    },

    /// A task panicked on the executor.
    #[error("task {name} panicked")]
    TaskPanicked {
        /// Name of the task.
        name: String,
    },
}

impl CoreError {
    /// Creates an invalid root error.
    pub fn invalid_root(message: impl Into<String>) -> Self {
        Self::InvalidRoot {
            message: message.into(),
        }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(name: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            name: name.into(),
            timeout,
        }
    }

    /// Returns true if the error means the bytes on disk are not a valid record.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        match self {
            Self::Codec(e) => e.is_structural(),
            Self::Storage(telepipe_storage::StorageError::Codec(e)) => e.is_structural(),
            _ => false,
        }
    }
}
