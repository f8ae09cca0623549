//! Batch identity and read results.

use std::fmt;
use std::path::Path;
use telepipe_storage::RawBatchEvent;

/// Suffix of a batch's metadata sidecar.
pub const METADATA_SUFFIX: &str = "_metadata";

/// Identifies a batch by its file name.
///
/// Equality is by name. Ordering follows the creation timestamp encoded in
/// the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchId(String);

impl BatchId {
    /// Builds the id of the batch stored at `file`.
    #[must_use]
    pub fn from_file(file: &Path) -> Self {
        Self(
            file.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        )
    }

    /// The file name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creation time in epoch milliseconds.
    #[must_use]
    pub fn timestamp_ms(&self) -> Option<u64> {
        self.0.parse().ok()
    }

    /// Returns true if `file` is this batch.
    #[must_use]
    pub fn matches(&self, file: &Path) -> bool {
        file.file_name()
            .map(|n| n.to_string_lossy() == self.0)
            .unwrap_or(false)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialOrd for BatchId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BatchId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.timestamp_ms()
            .cmp(&other.timestamp_ms())
            .then_with(|| self.0.cmp(&other.0))
    }
}

/// Parses a batch file name. Sidecars and foreign files yield `None`.
#[must_use]
pub fn batch_timestamp(file: &Path) -> Option<u64> {
    let name = file.file_name()?.to_str()?;
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// A batch loaded for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchData {
    /// Which batch this is.
    pub id: BatchId,
    /// Events in write order.
    pub events: Vec<RawBatchEvent>,
    /// Content of the metadata sidecar, if any.
    pub metadata: Option<Vec<u8>>,
}
