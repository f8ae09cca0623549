//! Error types for storage operations.

use std::io;
use telepipe_codec::CodecError;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A file held bytes that are not a valid encoding.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Encryption or decryption failed.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// The operation is not supported by this reader/writer.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl StorageError {
    /// Create an encryption error.
    pub fn encryption(message: impl Into<String>) -> Self {
        Self::Encryption(message.into())
    }

    /// Returns true if the error came from the file system.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
