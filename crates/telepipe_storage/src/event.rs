//! The unit of data written to a batch file.

/// An opaque event as stored in a batch.
///
/// `metadata` carries whatever the producer attached to the event
/// (identifiers, attributes). Both fields may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawBatchEvent {
    /// Serialized event payload.
    pub data: Vec<u8>,
    /// Caller-supplied event metadata.
    pub metadata: Vec<u8>,
}

impl RawBatchEvent {
    /// Creates an event with no metadata.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            metadata: Vec::new(),
        }
    }

    /// Creates an event with metadata.
    pub fn with_metadata(data: impl Into<Vec<u8>>, metadata: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            metadata: metadata.into(),
        }
    }

    /// Bytes the event occupies before framing.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.data.len() + self.metadata.len()
    }
}
