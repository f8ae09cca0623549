//! Loading and deleting finished batches.

use crate::batch::{BatchData, BatchId};
use crate::error::CoreResult;
use crate::file::fs;
use crate::logger::{InternalLogger, LogLevel, LogTarget};
use std::path::Path;
use std::sync::Arc;
use telepipe_storage::{BatchFileReaderWriter, FileReaderWriter};

/// Reads a batch file and its sidecar.
pub struct FileEventBatchReader {
    events: Arc<dyn BatchFileReaderWriter>,
    metadata: Arc<dyn FileReaderWriter>,
    logger: Arc<dyn InternalLogger>,
}

impl FileEventBatchReader {
    /// Creates a reader.
    pub fn new(
        events: Arc<dyn BatchFileReaderWriter>,
        metadata: Arc<dyn FileReaderWriter>,
        logger: Arc<dyn InternalLogger>,
    ) -> Self {
        Self {
            events,
            metadata,
            logger,
        }
    }

    /// Loads every well-formed event of `batch`.
    ///
    /// A damaged tail is logged and dropped; the events before it are
    /// returned. A sidecar that cannot be read is logged and treated as
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch file itself cannot be read.
    pub fn read(&self, batch: &Path, metadata_file: Option<&Path>) -> CoreResult<BatchData> {
        let id = BatchId::from_file(batch);
        let contents = self.events.read_events(batch)?;

        if let Some(corruption) = &contents.corruption {
            self.logger.log(
                LogLevel::Error,
                &[LogTarget::User, LogTarget::Telemetry],
                &format!(
                    "Batch {id} is corrupted after {} events, dropping {} trailing bytes",
                    contents.events.len(),
                    contents.unread_bytes
                ),
                Some(corruption),
            );
        }
        if contents.undecryptable > 0 {
            self.logger.log(
                LogLevel::Error,
                &[LogTarget::Maintainer, LogTarget::Telemetry],
                &format!(
                    "Skipped {} events of batch {id} that could not be decrypted",
                    contents.undecryptable
                ),
                None,
            );
        }

        let metadata = metadata_file.and_then(|file| self.read_metadata(file));
        Ok(BatchData {
            id,
            events: contents.events,
            metadata,
        })
    }

    fn read_metadata(&self, file: &Path) -> Option<Vec<u8>> {
        if !fs::exists(file, self.logger.as_ref()) {
            return None;
        }
        match self.metadata.read_data(file) {
            Ok(data) if data.is_empty() => None,
            Ok(data) => Some(data),
            Err(e) => {
                self.logger.log(
                    LogLevel::Error,
                    &[LogTarget::Maintainer, LogTarget::Telemetry],
                    &format!("Unable to read batch metadata from {}", file.display()),
                    Some(&e),
                );
                None
            }
        }
    }

    /// Deletes `batch` and its sidecar. Returns false if the batch remains.
    pub fn delete(&self, batch: &Path, metadata_file: Option<&Path>) -> bool {
        let logger = self.logger.as_ref();
        let deleted = fs::delete(batch, logger);
        if let Some(meta) = metadata_file {
            if fs::exists(meta, logger) {
                fs::delete(meta, logger);
            }
        }
        deleted
    }
}

impl std::fmt::Debug for FileEventBatchReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileEventBatchReader").finish_non_exhaustive()
    }
}
