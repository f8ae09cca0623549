//! Appending events to the open batch.

use crate::file::{fs, FileOrchestrator};
use crate::logger::{InternalLogger, LogLevel, LogTarget};
use std::sync::Arc;
use telepipe_storage::{framed_len, BatchFileReaderWriter, FileReaderWriter, RawBatchEvent};

/// Why an event was not written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteFailure {
    /// The event payload is above the item size limit.
    ItemTooLarge {
        /// Payload size.
        size: u64,
        /// Configured limit.
        max: u64,
    },
    /// No batch accepts writes (consent not granted or unusable directory).
    NoWritableFile,
    /// The append itself failed.
    Io {
        /// Description of the failure.
        message: String,
    },
}

/// Result of [`EventBatchWriter::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The event is on disk, or was empty and needed no write.
    Written,
    /// The event was not written.
    Failed(WriteFailure),
}

impl WriteOutcome {
    /// Returns true if the event was written.
    #[must_use]
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written)
    }
}

/// Receives the outcome of every write.
pub trait WriteObserver: Send + Sync {
    /// Called after each write attempt.
    fn on_write(&self, event: &RawBatchEvent, outcome: &WriteOutcome);
}

/// Write access to the current batch of a feature.
pub trait EventBatchWriter {
    /// Content of the open batch's metadata sidecar.
    fn current_metadata(&mut self) -> Option<Vec<u8>>;

    /// Appends `event`. Non-empty `batch_metadata` replaces the sidecar.
    fn write(&mut self, event: RawBatchEvent, batch_metadata: Option<&[u8]>) -> WriteOutcome;
}

/// Writes events to the file chosen by a [`FileOrchestrator`].
pub struct FileEventBatchWriter {
    orchestrator: Arc<dyn FileOrchestrator>,
    events: Arc<dyn BatchFileReaderWriter>,
    metadata: Arc<dyn FileReaderWriter>,
    max_item_size: u64,
    logger: Arc<dyn InternalLogger>,
    observer: Option<Arc<dyn WriteObserver>>,
}

impl FileEventBatchWriter {
    /// Creates a writer.
    pub fn new(
        orchestrator: Arc<dyn FileOrchestrator>,
        events: Arc<dyn BatchFileReaderWriter>,
        metadata: Arc<dyn FileReaderWriter>,
        max_item_size: u64,
        logger: Arc<dyn InternalLogger>,
    ) -> Self {
        Self {
            orchestrator,
            events,
            metadata,
            max_item_size,
            logger,
            observer: None,
        }
    }

    /// Reports every outcome to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Option<Arc<dyn WriteObserver>>) -> Self {
        self.observer = observer;
        self
    }

    fn append(&self, event: &RawBatchEvent, batch_metadata: Option<&[u8]>) -> WriteOutcome {
        if event.data.is_empty() {
            return WriteOutcome::Written;
        }

        let size = event.data.len() as u64;
        if size > self.max_item_size {
            self.logger.log(
                LogLevel::Error,
                &[LogTarget::User, LogTarget::Telemetry],
                &format!(
                    "Can't write data with size {size} (max item size is {})",
                    self.max_item_size
                ),
                None,
            );
            return WriteOutcome::Failed(WriteFailure::ItemTooLarge {
                size,
                max: self.max_item_size,
            });
        }

        let Some(file) = self.orchestrator.get_writable_file(framed_len(event) as u64) else {
            return WriteOutcome::Failed(WriteFailure::NoWritableFile);
        };

        if let Err(e) = self.events.write_event(&file, event, true) {
            self.logger.log(
                LogLevel::Error,
                &[LogTarget::Maintainer, LogTarget::Telemetry],
                &format!("Unable to write data to {}", file.display()),
                Some(&e),
            );
            return WriteOutcome::Failed(WriteFailure::Io {
                message: e.to_string(),
            });
        }

        if let Some(batch_metadata) = batch_metadata.filter(|m| !m.is_empty()) {
            if let Some(meta_file) = self.orchestrator.get_metadata_file(&file) {
                if let Err(e) = self.metadata.write_data(&meta_file, batch_metadata, false) {
                    self.logger.log(
                        LogLevel::Error,
                        &[LogTarget::Maintainer, LogTarget::Telemetry],
                        &format!("Unable to write batch metadata to {}", meta_file.display()),
                        Some(&e),
                    );
                }
            }
        }
        WriteOutcome::Written
    }
}

impl EventBatchWriter for FileEventBatchWriter {
    fn current_metadata(&mut self) -> Option<Vec<u8>> {
        let file = self.orchestrator.current_writable_file()?;
        let meta_file = self.orchestrator.get_metadata_file(&file)?;
        if !fs::exists(&meta_file, self.logger.as_ref()) {
            return None;
        }
        match self.metadata.read_data(&meta_file) {
            Ok(data) => Some(data),
            Err(e) => {
                self.logger.log(
                    LogLevel::Error,
                    &[LogTarget::Maintainer, LogTarget::Telemetry],
                    &format!("Unable to read batch metadata from {}", meta_file.display()),
                    Some(&e),
                );
                None
            }
        }
    }

    fn write(&mut self, event: RawBatchEvent, batch_metadata: Option<&[u8]>) -> WriteOutcome {
        let outcome = self.append(&event, batch_metadata);
        if let Some(observer) = &self.observer {
            observer.on_write(&event, &outcome);
        }
        outcome
    }
}

impl std::fmt::Debug for FileEventBatchWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileEventBatchWriter")
            .field("max_item_size", &self.max_item_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilePersistenceConfig;
    use crate::file::BatchFileOrchestrator;
    use crate::test_support::RecordingLogger;
    use crate::time::ManualTimeProvider;
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::time::Duration;
    use telepipe_storage::{PlainBatchFileReaderWriter, PlainFileReaderWriter};
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct Outcomes(Mutex<Vec<WriteOutcome>>);

    impl WriteObserver for Outcomes {
        fn on_write(&self, _event: &RawBatchEvent, outcome: &WriteOutcome) {
            self.0.lock().push(outcome.clone());
        }
    }

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        logger: Arc<RecordingLogger>,
        orchestrator: Arc<BatchFileOrchestrator>,
        writer: FileEventBatchWriter,
    }

    fn fixture(max_item_size: u64) -> Fixture {
        let dir = tempdir().unwrap();
        let root = dir.path().join("logs-v2");
        let logger = Arc::new(RecordingLogger::default());
        let orchestrator = Arc::new(BatchFileOrchestrator::new(
            root.clone(),
            FilePersistenceConfig::new().recent_delay(Duration::from_secs(5)),
            logger.clone(),
            Arc::new(ManualTimeProvider::new(1_700_000_000_000)),
        ));
        let writer = FileEventBatchWriter::new(
            orchestrator.clone(),
            Arc::new(PlainBatchFileReaderWriter::new()),
            Arc::new(PlainFileReaderWriter::new()),
            max_item_size,
            logger.clone(),
        );
        Fixture {
            _dir: dir,
            root,
            logger,
            orchestrator,
            writer,
        }
    }

    fn read_back(f: &Fixture) -> Vec<RawBatchEvent> {
        let files = f.orchestrator.get_all_files();
        assert_eq!(files.len(), 1);
        PlainBatchFileReaderWriter::new()
            .read_events(&files[0])
            .unwrap()
            .events
    }

    #[test]
    fn writes_events_in_order() {
        let mut f = fixture(1024);
        let events = vec![
            RawBatchEvent::with_metadata(b"a".to_vec(), b"id-a".to_vec()),
            RawBatchEvent::new(b"b".to_vec()),
        ];
        for event in &events {
            assert_eq!(f.writer.write(event.clone(), None), WriteOutcome::Written);
        }
        assert_eq!(read_back(&f), events);
    }

    #[test]
    fn empty_event_is_a_successful_no_op() {
        let mut f = fixture(1024);
        assert!(f.writer.write(RawBatchEvent::new(Vec::new()), None).is_written());
        assert!(!f.root.exists() || f.orchestrator.get_all_files().is_empty());
    }

    #[test]
    fn oversized_event_fails_and_logs_for_user() {
        let mut f = fixture(4);
        let outcome = f.writer.write(RawBatchEvent::new(vec![0u8; 5]), None);
        assert_eq!(
            outcome,
            WriteOutcome::Failed(WriteFailure::ItemTooLarge { size: 5, max: 4 })
        );
        let entry = f.logger.find("Can't write data with size 5").unwrap();
        assert!(entry.targets.contains(&LogTarget::User));
        assert_eq!(entry.level, LogLevel::Error);
    }

    #[test]
    fn metadata_replaces_sidecar() {
        let mut f = fixture(1024);
        assert_eq!(f.writer.current_metadata(), None);

        f.writer.write(RawBatchEvent::new(b"a".to_vec()), Some(b"first"));
        assert_eq!(f.writer.current_metadata(), Some(b"first".to_vec()));

        f.writer.write(RawBatchEvent::new(b"b".to_vec()), Some(b"second"));
        assert_eq!(f.writer.current_metadata(), Some(b"second".to_vec()));

        f.writer.write(RawBatchEvent::new(b"c".to_vec()), Some(b""));
        assert_eq!(f.writer.current_metadata(), Some(b"second".to_vec()));
    }

    #[test]
    fn observer_sees_every_outcome() {
        let f = fixture(2);
        let outcomes = Arc::new(Outcomes::default());
        let mut writer = f.writer.with_observer(Some(outcomes.clone()));
        writer.write(RawBatchEvent::new(b"ok".to_vec()), None);
        writer.write(RawBatchEvent::new(b"too big".to_vec()), None);
        let seen = outcomes.0.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_written());
        assert!(matches!(
            seen[1],
            WriteOutcome::Failed(WriteFailure::ItemTooLarge { .. })
        ));
    }
}
