//! Per-feature storage: the entry points producers and uploaders use.
//!
//! Every file access of a feature runs on the shared persistence executor.
//! Producers only enqueue; the upload side waits for reads through
//! [`PersistenceExecutor::call`].

use crate::backpressure::OfferOutcome;
use crate::batch::{BatchData, BatchId};
use crate::config::FilePersistenceConfig;
use crate::consent::{ConsentListener, ConsentProvider, TrackingConsent};
use crate::error::{CoreError, CoreResult};
use crate::executor::{PersistenceExecutor, PersistenceTask};
use crate::file::{
    fs, BatchFileOrchestrator, ConsentAwareFileMigrator, ConsentAwareFileOrchestrator,
    FileOrchestrator,
};
use crate::logger::{InternalLogger, LogLevel, LogTarget};
use crate::reader::FileEventBatchReader;
use crate::time::TimeProvider;
use crate::writer::{EventBatchWriter, FileEventBatchWriter, WriteObserver};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use telepipe_storage::{
    BatchFileReaderWriter, EncryptedBatchFileReaderWriter, EncryptedFileReaderWriter, Encryption,
    FileReaderWriter, PlainBatchFileReaderWriter, PlainFileReaderWriter, RawBatchEvent,
};

/// Default wait for synchronous storage calls.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// What every feature of one pipeline shares.
#[derive(Clone)]
pub struct PersistenceContext {
    /// Directory holding all feature directories.
    pub root: PathBuf,
    /// The single persistence worker.
    pub executor: Arc<PersistenceExecutor>,
    /// Current tracking consent.
    pub consent: Arc<ConsentProvider>,
    /// Internal logger.
    pub logger: Arc<dyn InternalLogger>,
    /// Clock used for batch names and ages.
    pub time: Arc<dyn TimeProvider>,
    /// How long synchronous calls wait for the executor.
    pub call_timeout: Duration,
}

impl PersistenceContext {
    /// Creates a context with the default call timeout.
    pub fn new(
        root: impl Into<PathBuf>,
        executor: Arc<PersistenceExecutor>,
        consent: Arc<ConsentProvider>,
        logger: Arc<dyn InternalLogger>,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            root: root.into(),
            executor,
            consent,
            logger,
            time,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for PersistenceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceContext")
            .field("root", &self.root)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

/// Why a write was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Tracking consent is [`TrackingConsent::NotGranted`].
    ConsentNotGranted,
    /// The persistence queue is full and ignores new tasks.
    QueueFull,
    /// The pipeline is stopped.
    Closed,
}

/// Result of handing a write to the persistence executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The write will run. `evicted` is true if an older task was dropped
    /// to make room.
    Queued {
        /// Whether an older task was dropped.
        evicted: bool,
    },
    /// The write will not run.
    Rejected(Rejection),
}

impl Submission {
    /// Returns true if the write was queued.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }
}

impl From<OfferOutcome<PersistenceTask>> for Submission {
    fn from(outcome: OfferOutcome<PersistenceTask>) -> Self {
        match outcome {
            OfferOutcome::Accepted { evicted } => Self::Queued {
                evicted: evicted.is_some(),
            },
            OfferOutcome::Dropped(_) => Self::Rejected(Rejection::QueueFull),
            OfferOutcome::Closed(_) => Self::Rejected(Rejection::Closed),
        }
    }
}

/// Name of the directory written while consent is pending.
#[must_use]
pub fn pending_dir_name(feature: &str) -> String {
    format!("{feature}-pending-v2")
}

/// Name of the directory holding uploadable batches.
#[must_use]
pub fn granted_dir_name(feature: &str) -> String {
    format!("{feature}-v2")
}

struct Inner {
    name: String,
    orchestrator: Arc<ConsentAwareFileOrchestrator>,
    events: Arc<dyn BatchFileReaderWriter>,
    metadata: Arc<dyn FileReaderWriter>,
    max_item_size: u64,
    reader: FileEventBatchReader,
    locked: Mutex<HashSet<PathBuf>>,
    logger: Arc<dyn InternalLogger>,
    write_observer: Option<Arc<dyn WriteObserver>>,
}

impl Inner {
    fn writer(&self, accepted: TrackingConsent) -> FileEventBatchWriter {
        FileEventBatchWriter::new(
            Arc::new(self.orchestrator.routed(accepted)),
            Arc::clone(&self.events),
            Arc::clone(&self.metadata),
            self.max_item_size,
            Arc::clone(&self.logger),
        )
        .with_observer(self.write_observer.clone())
    }

    fn read_next(&self) -> CoreResult<Option<BatchData>> {
        let mut locked = self.locked.lock();
        let Some(file) = self.orchestrator.get_readable_file(&locked) else {
            return Ok(None);
        };
        let metadata_file = self.orchestrator.get_metadata_file(&file);
        let batch = self.reader.read(&file, metadata_file.as_deref())?;
        locked.insert(file);
        Ok(Some(batch))
    }

    fn confirm(&self, id: &BatchId, delete: bool) {
        let mut locked = self.locked.lock();
        let Some(file) = locked.iter().find(|file| id.matches(file)).cloned() else {
            self.logger.log(
                LogLevel::Debug,
                &[LogTarget::Maintainer],
                &format!("Batch {id} was confirmed but is not being read"),
                None,
            );
            return;
        };
        if delete {
            self.delete(&file);
        }
        locked.remove(&file);
    }

    fn delete(&self, file: &Path) -> bool {
        let metadata_file = self.orchestrator.get_metadata_file(file);
        self.reader.delete(file, metadata_file.as_deref())
    }

    fn drop_all(&self) {
        let files = self.orchestrator.get_all_files();
        let count = files.len();
        for file in files {
            self.delete(&file);
        }
        self.locked.lock().clear();
        self.logger.log(
            LogLevel::Info,
            &[LogTarget::Maintainer],
            &format!("Dropped {count} batches of feature {}", self.name),
            None,
        );
    }
}

/// Posts consent migrations to the executor's control lane.
struct ConsentRelay {
    name: String,
    executor: Weak<PersistenceExecutor>,
    orchestrator: Arc<ConsentAwareFileOrchestrator>,
    logger: Arc<dyn InternalLogger>,
}

impl ConsentListener for ConsentRelay {
    fn on_consent_updated(&self, _previous: TrackingConsent, new: TrackingConsent) {
        let Some(executor) = self.executor.upgrade() else {
            return;
        };
        let orchestrator = Arc::clone(&self.orchestrator);
        let task = move || {
            orchestrator.on_consent_updated(new);
        };
        if let Err(e) = executor.submit_control(format!("{}-consent", self.name), task) {
            self.logger.log(
                LogLevel::Warn,
                &[LogTarget::Maintainer],
                &format!("Consent change to {new:?} not applied to {}", self.name),
                Some(&e),
            );
        }
    }
}

/// Batch storage of one feature.
///
/// Writes land in `<root>/<feature>-pending-v2` or `<root>/<feature>-v2`
/// depending on consent; only the latter is ever read for upload. A batch
/// returned by [`read_next_batch`](Self::read_next_batch) stays locked until
/// [`confirm_batch_read`](Self::confirm_batch_read).
pub struct FeatureStorage {
    inner: Arc<Inner>,
    executor: Arc<PersistenceExecutor>,
    consent: Arc<ConsentProvider>,
    call_timeout: Duration,
}

impl FeatureStorage {
    /// Creates the storage of feature `name` and applies the current consent.
    ///
    /// With `encryption`, event payloads and sidecars are encrypted before
    /// they reach disk.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidFeatureName`] if `name` is not a plain file name
    /// - [`CoreError::ExecutorClosed`] if the pipeline is stopped
    pub fn new(
        context: &PersistenceContext,
        name: &str,
        config: FilePersistenceConfig,
        encryption: Option<Arc<dyn Encryption>>,
        write_observer: Option<Arc<dyn WriteObserver>>,
    ) -> CoreResult<Self> {
        if !fs::is_valid_file_name(name) {
            return Err(CoreError::InvalidFeatureName {
                name: name.to_string(),
            });
        }

        let orchestrator = |dir: String| {
            BatchFileOrchestrator::new(
                context.root.join(dir),
                config,
                Arc::clone(&context.logger),
                Arc::clone(&context.time),
            )
        };
        let orchestrator = Arc::new(ConsentAwareFileOrchestrator::new(
            orchestrator(pending_dir_name(name)),
            orchestrator(granted_dir_name(name)),
            ConsentAwareFileMigrator::new(Arc::clone(&context.logger)),
        ));

        let (events, metadata): (Arc<dyn BatchFileReaderWriter>, Arc<dyn FileReaderWriter>) =
            match encryption {
                Some(encryption) => (
                    Arc::new(EncryptedBatchFileReaderWriter::new(
                        PlainBatchFileReaderWriter::new(),
                        Arc::clone(&encryption),
                    )),
                    Arc::new(EncryptedFileReaderWriter::new(
                        PlainFileReaderWriter::new(),
                        encryption,
                    )),
                ),
                None => (
                    Arc::new(PlainBatchFileReaderWriter::new()),
                    Arc::new(PlainFileReaderWriter::new()),
                ),
            };

        let inner = Arc::new(Inner {
            name: name.to_string(),
            orchestrator: Arc::clone(&orchestrator),
            reader: FileEventBatchReader::new(
                Arc::clone(&events),
                Arc::clone(&metadata),
                Arc::clone(&context.logger),
            ),
            events,
            metadata,
            max_item_size: config.max_item_size,
            locked: Mutex::new(HashSet::new()),
            logger: Arc::clone(&context.logger),
            write_observer,
        });

        context.consent.register(Arc::new(ConsentRelay {
            name: name.to_string(),
            executor: Arc::downgrade(&context.executor),
            orchestrator: Arc::clone(&orchestrator),
            logger: Arc::clone(&context.logger),
        }));
        let consent = Arc::clone(&context.consent);
        context
            .executor
            .submit_control(format!("{name}-init"), move || {
                orchestrator.on_consent_updated(consent.consent());
            })?;

        Ok(Self {
            inner,
            executor: Arc::clone(&context.executor),
            consent: Arc::clone(&context.consent),
            call_timeout: context.call_timeout,
        })
    }

    /// Feature name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The file orchestrator of this feature.
    #[must_use]
    pub fn orchestrator(&self) -> &ConsentAwareFileOrchestrator {
        &self.inner.orchestrator
    }

    /// Queues `event` for writing. Never blocks.
    ///
    /// The event is routed by the consent in effect now, even if the consent
    /// changes before the write runs. Non-empty `batch_metadata` replaces the sidecar of the batch the event
    /// lands in.
    pub fn write_event(&self, event: RawBatchEvent, batch_metadata: Option<Vec<u8>>) -> Submission {
        let accepted = self.consent.consent();
        if !accepted.accepts_writes() {
            return Submission::Rejected(Rejection::ConsentNotGranted);
        }
        let inner = Arc::clone(&self.inner);
        self.executor
            .submit(format!("{}-write", self.inner.name), move || {
                inner.writer(accepted).write(event, batch_metadata.as_deref());
            })
            .into()
    }

    /// Runs `scope` on the persistence executor with a writer for the
    /// current batch.
    ///
    /// Reading [`EventBatchWriter::current_metadata`] and then writing within
    /// one scope is atomic with respect to other writes.
    pub fn with_write_scope<F>(&self, scope: F) -> Submission
    where
        F: FnOnce(&mut dyn EventBatchWriter) + Send + 'static,
    {
        let accepted = self.consent.consent();
        let inner = Arc::clone(&self.inner);
        self.executor
            .submit(format!("{}-write-scope", self.inner.name), move || {
                let mut writer = inner.writer(accepted);
                scope(&mut writer);
            })
            .into()
    }

    /// Reads the oldest uploadable batch that is not already being read.
    ///
    /// # Errors
    ///
    /// Returns an error if the executor does not answer in time or the batch
    /// file cannot be read.
    pub fn read_next_batch(&self) -> CoreResult<Option<BatchData>> {
        let inner = Arc::clone(&self.inner);
        self.executor.call(
            &format!("{}-read", self.inner.name),
            self.call_timeout,
            move || inner.read_next(),
        )?
    }

    /// Ends the read of batch `id`: deletes it, or releases it for a later
    /// read.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ExecutorClosed`] if the pipeline is stopped.
    pub fn confirm_batch_read(&self, id: &BatchId, delete: bool) -> CoreResult<()> {
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        self.executor
            .submit_control(format!("{}-confirm", self.inner.name), move || {
                inner.confirm(&id, delete);
            })
    }

    /// Deletes every batch of this feature, pending or granted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ExecutorClosed`] if the pipeline is stopped.
    pub fn drop_all(&self) -> CoreResult<()> {
        let inner = Arc::clone(&self.inner);
        self.executor
            .submit_control(format!("{}-drop-all", self.inner.name), move || {
                inner.drop_all();
            })
    }

    /// Waits until every write queued so far is on disk.
    ///
    /// # Errors
    ///
    /// See [`PersistenceExecutor::flush`].
    pub fn flush(&self) -> CoreResult<()> {
        self.executor.flush(self.call_timeout)
    }
}

impl std::fmt::Debug for FeatureStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureStorage")
            .field("name", &self.inner.name)
            .field("orchestrator", &self.inner.orchestrator)
            .finish_non_exhaustive()
    }
}
