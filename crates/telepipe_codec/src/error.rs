//! Error types for the codec crate.

use crate::block::TlvBlockType;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
///
/// Structural errors (`MalformedBlock`, `InvalidBlockCount`,
/// `UnexpectedBlockOrder`) mean the bytes on disk are not a valid record.
/// They are never used to signal "no data".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A block header or payload is truncated.
    #[error("malformed block at offset {offset}: declared {declared} bytes, {remaining} remaining")]
    MalformedBlock {
        /// Offset of the block header in the input.
        offset: usize,
        /// Length declared by the header (0 if the header itself was cut).
        declared: usize,
        /// Bytes actually available after the header.
        remaining: usize,
    },

    /// A block type byte does not name any known block kind.
    #[error("unknown block type 0x{0:02x}")]
    UnknownBlockType(u8),

    /// A block declares a length above [`crate::MAX_BLOCK_SIZE`].
    #[error("block too large: {declared} bytes exceeds maximum of {max}")]
    BlockTooLarge {
        /// Declared length.
        declared: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// A record holds the wrong number of blocks.
    #[error("invalid block count: expected {expected}, got {actual}")]
    InvalidBlockCount {
        /// Number of blocks the schema requires.
        expected: usize,
        /// Number of blocks found.
        actual: usize,
    },

    /// A record holds the right blocks in the wrong order.
    #[error("unexpected block order at index {index}: expected {expected:?}, found {found:?}")]
    UnexpectedBlockOrder {
        /// Position of the first mismatch.
        index: usize,
        /// Block kind the schema declares at that position.
        expected: TlvBlockType,
        /// Block kind actually found.
        found: TlvBlockType,
    },

    /// A block payload has an invalid size for its kind.
    #[error("invalid {block_type:?} payload: expected {expected} bytes, got {actual}")]
    InvalidPayloadSize {
        /// The block kind.
        block_type: TlvBlockType,
        /// Required payload size.
        expected: usize,
        /// Actual payload size.
        actual: usize,
    },

    /// Failed to serialize a value.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to deserialize a value.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Returns true if this error describes a structurally invalid record.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::MalformedBlock { .. }
                | Self::UnknownBlockType(_)
                | Self::BlockTooLarge { .. }
                | Self::InvalidBlockCount { .. }
                | Self::UnexpectedBlockOrder { .. }
                | Self::InvalidPayloadSize { .. }
        )
    }
}
