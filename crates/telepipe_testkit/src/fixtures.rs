//! Test pipelines and helpers.
//!
//! A [`TestPipeline`] lives in a temporary directory, runs on a manual
//! clock and logs into a [`CapturingLogger`]. Batches only become readable
//! once the clock moves, so tests decide exactly when uploads can see them.

use crate::fakes::{CapturingLogger, FakeHttpClient, FixedDelayStrategy};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use telepipe::{
    BatchData, CoreConfig, Feature, FeatureStorage, FilePersistenceConfig, ManualTimeProvider,
    Pipeline, RawBatchEvent, TrackingConsent, UploadConfig, UploadContext,
};
use tempfile::TempDir;

/// Clock start of every test pipeline: 2023-11-14T22:13:20Z.
pub const TEST_START_MS: u64 = 1_700_000_000_000;

/// Recent window used by [`test_persistence`].
pub const TEST_RECENT_DELAY: Duration = Duration::from_secs(1);

/// Intake endpoint used by test pipelines.
pub const TEST_ENDPOINT: &str = "https://intake.test";

/// File settings with a one second recent window.
pub fn test_persistence() -> FilePersistenceConfig {
    FilePersistenceConfig::new().recent_delay(TEST_RECENT_DELAY)
}

/// A pipeline in a temporary directory.
pub struct TestPipeline {
    /// The pipeline.
    pub pipeline: Pipeline,
    /// Clock driving batch names and ages.
    pub clock: Arc<ManualTimeProvider>,
    /// Records every upload request.
    pub http: Arc<FakeHttpClient>,
    /// Records every internal log.
    pub logger: Arc<CapturingLogger>,
    temp_dir: Option<TempDir>,
}

impl TestPipeline {
    /// A pipeline that persists but never uploads.
    pub fn new(consent: TrackingConsent) -> Self {
        Self::build(consent, false)
    }

    /// A pipeline uploading to a [`FakeHttpClient`] every 20 ms.
    pub fn uploading(consent: TrackingConsent) -> Self {
        Self::build(consent, true)
    }

    /// Opens a second pipeline on the same root.
    pub fn open_secondary(&self, consent: TrackingConsent) -> Self {
        Self::open_at(self.root(), consent, true, None)
    }

    fn build(consent: TrackingConsent, uploads: bool) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().join("telepipe");
        Self::open_at(&root, consent, uploads, Some(temp_dir))
    }

    fn open_at(
        root: &Path,
        consent: TrackingConsent,
        uploads: bool,
        temp_dir: Option<TempDir>,
    ) -> Self {
        let clock = Arc::new(ManualTimeProvider::new(TEST_START_MS));
        let http = Arc::new(FakeHttpClient::new());
        let logger = Arc::new(CapturingLogger::new());

        let mut builder = Pipeline::builder(root)
            .with_name("test")
            .with_config(
                CoreConfig::new()
                    .initial_consent(consent)
                    .shutdown_grace(Duration::from_secs(2)),
            )
            .with_upload_config(UploadConfig::new(
                TEST_ENDPOINT,
                UploadContext::new("test-api-key", "rust", "0.0.0-test"),
            ))
            .with_logger(logger.clone())
            .with_time_provider(clock.clone());
        if uploads {
            builder = builder
                .with_http_client(http.clone())
                .with_upload_strategy(Arc::new(FixedDelayStrategy::new(Duration::from_millis(
                    20,
                ))));
        }
        let pipeline = builder.build().expect("Failed to build pipeline");

        Self {
            pipeline,
            clock,
            http,
            logger,
            temp_dir,
        }
    }

    /// Storage root.
    pub fn root(&self) -> &Path {
        self.pipeline.root()
    }

    /// Registers `name` with [`test_persistence`] settings.
    pub fn register(&self, name: &str) -> Arc<FeatureStorage> {
        self.register_with(name, test_persistence())
    }

    /// Registers `name` with the given file settings.
    pub fn register_with(&self, name: &str, persistence: FilePersistenceConfig) -> Arc<FeatureStorage> {
        let factory = self
            .pipeline
            .default_request_factory(format!("{name} request"), format!("/api/v2/{name}"));
        self.pipeline
            .register_feature(Feature::new(name, factory).with_persistence_config(persistence))
            .expect("Failed to register feature")
    }

    /// Writes `payloads` to `storage` and waits until they are on disk.
    ///
    /// The clock moves by 10 ms after each write so that rotated batches
    /// get distinct names.
    pub fn write_all(&self, storage: &FeatureStorage, payloads: &[&[u8]]) {
        for payload in payloads {
            let submission = storage.write_event(RawBatchEvent::new(payload.to_vec()), None);
            assert!(submission.is_queued(), "write rejected: {submission:?}");
            storage.flush().expect("Failed to flush");
            self.clock.advance(Duration::from_millis(10));
        }
    }

    /// Moves the clock past the recent window so every batch is readable.
    pub fn age_batches(&self) {
        self.clock.advance(TEST_RECENT_DELAY * 5);
    }

    /// Deletes the temporary directory when dropped. Pipelines opened with
    /// [`open_secondary`](Self::open_secondary) do not own one.
    pub fn owns_temp_dir(&self) -> bool {
        self.temp_dir.is_some()
    }
}

impl std::ops::Deref for TestPipeline {
    type Target = Pipeline;

    fn deref(&self) -> &Self::Target {
        &self.pipeline
    }
}

/// Reads every readable batch of `storage` and deletes it.
pub fn drain_batches(storage: &FeatureStorage) -> Vec<BatchData> {
    let mut batches = Vec::new();
    while let Some(batch) = storage.read_next_batch().expect("Failed to read batch") {
        storage
            .confirm_batch_read(&batch.id, true)
            .expect("Failed to confirm batch");
        batches.push(batch);
    }
    batches
}

/// Payloads of `batches`, flattened in order.
pub fn payloads(batches: &[BatchData]) -> Vec<Vec<u8>> {
    batches
        .iter()
        .flat_map(|b| b.events.iter().map(|e| e.data.clone()))
        .collect()
}

/// Names of the regular files directly under `dir`, sorted.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// Polls `condition` every 10 ms for up to `timeout`.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}
