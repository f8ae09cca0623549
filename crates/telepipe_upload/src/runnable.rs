//! One upload cycle of one feature.

use crate::error::UploadError;
use crate::status::UploadStatus;
use crate::strategy::UploadSchedulerStrategy;
use crate::uploader::DataUploader;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telepipe_core::{
    BatchData, FeatureStorage, InternalLogger, LogLevel, LogTarget, TimeProvider,
};

/// Lifecycle of a feature's uploads.
///
/// ```text
/// Idle → Scheduled → Running → Scheduled
///                            ↘ Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Not scheduled, either never started or stopped.
    Idle,
    /// Waiting for its next cycle.
    Scheduled,
    /// A cycle is in progress.
    Running,
}

impl UploadState {
    /// Returns true if a cycle is due or in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, UploadState::Scheduled | UploadState::Running)
    }
}

/// Summary of one cycle, fed to the scheduler strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Requests sent.
    pub attempts: usize,
    /// Status code of the last response.
    pub last_status_code: Option<u16>,
    /// Client failure of the last request, or the storage failure that
    /// ended the cycle.
    pub error: Option<UploadError>,
}

/// Drains the batches of one feature and decides when to come back.
pub struct DataUploadRunnable {
    storage: Arc<FeatureStorage>,
    uploader: DataUploader,
    strategy: Arc<dyn UploadSchedulerStrategy>,
    time: Arc<dyn TimeProvider>,
    logger: Arc<dyn InternalLogger>,
    max_batches_per_job: usize,
    max_batch_age: Duration,
    owner: bool,
    stopped: AtomicBool,
    state: RwLock<UploadState>,
}

impl DataUploadRunnable {
    /// Creates the runnable of `storage`'s feature.
    ///
    /// Defaults to ten batches per cycle, an 18 hour maximum batch age and
    /// owning the storage root.
    pub fn new(
        storage: Arc<FeatureStorage>,
        uploader: DataUploader,
        strategy: Arc<dyn UploadSchedulerStrategy>,
        time: Arc<dyn TimeProvider>,
        logger: Arc<dyn InternalLogger>,
    ) -> Self {
        Self {
            storage,
            uploader,
            strategy,
            time,
            logger,
            max_batches_per_job: 10,
            max_batch_age: crate::config::DEFAULT_MAX_BATCH_AGE,
            owner: true,
            stopped: AtomicBool::new(false),
            state: RwLock::new(UploadState::Idle),
        }
    }

    /// Sets how many batches one cycle may send.
    pub fn with_max_batches_per_job(mut self, max: usize) -> Self {
        self.max_batches_per_job = max.max(1);
        self
    }

    /// Sets the age after which batches are dropped unsent.
    pub fn with_max_batch_age(mut self, age: Duration) -> Self {
        self.max_batch_age = age;
        self
    }

    /// Sets whether this process owns the storage root.
    ///
    /// A runnable that does not own it never uploads.
    pub fn with_owner(mut self, owner: bool) -> Self {
        self.owner = owner;
        self
    }

    /// Feature this runnable uploads.
    pub fn feature(&self) -> &str {
        self.storage.name()
    }

    /// Current state.
    pub fn state(&self) -> UploadState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: UploadState) {
        *self.state.write() = state;
    }

    /// Delay before the first cycle.
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.strategy.initial_delay_ms(self.feature()))
    }

    /// Stops all future cycles.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.set_state(UploadState::Idle);
    }

    /// Returns true once [`stop`](Self::stop) was called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Runs one cycle.
    ///
    /// Returns the delay before the next cycle, or `None` if this runnable
    /// is done for good.
    pub fn run(&self) -> Option<Duration> {
        if self.is_stopped() || !self.owner {
            self.set_state(UploadState::Idle);
            return None;
        }
        self.set_state(UploadState::Running);

        let outcome = self.upload_batches();
        let delay = self.strategy.get_ms_delay_until_next_upload(
            self.feature(),
            outcome.attempts,
            outcome.last_status_code,
            outcome.error.as_ref(),
        );

        if self.is_stopped() {
            self.set_state(UploadState::Idle);
            return None;
        }
        self.set_state(UploadState::Scheduled);
        Some(Duration::from_millis(delay))
    }

    fn upload_batches(&self) -> UploadOutcome {
        let mut outcome = UploadOutcome::default();

        for _ in 0..self.max_batches_per_job {
            if self.is_stopped() {
                break;
            }
            let batch = match self.storage.read_next_batch() {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(e) => {
                    self.logger.log(
                        LogLevel::Error,
                        &[LogTarget::Maintainer, LogTarget::Telemetry],
                        &format!("Unable to read the next batch of {}", self.feature()),
                        Some(&e),
                    );
                    outcome.error = Some(e.into());
                    break;
                }
            };

            if let Some(reason) = self.unsendable(&batch) {
                self.logger.log(
                    LogLevel::Warn,
                    &[LogTarget::User, LogTarget::Telemetry],
                    &format!("Dropping batch {} of {}: {reason}", batch.id, self.feature()),
                    None,
                );
                self.confirm(&batch, true);
                continue;
            }

            let status = self
                .uploader
                .upload(&batch.events, batch.metadata.as_deref());
            outcome.attempts += 1;
            outcome.last_status_code = status.code();
            outcome.error = status.error().cloned();

            let sent = status.is_success();
            self.confirm(&batch, sent);
            if !sent {
                self.log_retained(&batch, &status);
                break;
            }
        }
        outcome
    }

    fn unsendable(&self, batch: &BatchData) -> Option<String> {
        if batch.events.is_empty() {
            return Some("it is empty".to_string());
        }
        let created = batch.id.timestamp_ms()?;
        let age = self.time.now_ms().saturating_sub(created);
        let max = u64::try_from(self.max_batch_age.as_millis()).unwrap_or(u64::MAX);
        (age > max).then(|| format!("it is older than {}s", self.max_batch_age.as_secs()))
    }

    fn confirm(&self, batch: &BatchData, delete: bool) {
        if let Err(e) = self.storage.confirm_batch_read(&batch.id, delete) {
            self.logger.log(
                LogLevel::Warn,
                &[LogTarget::Maintainer],
                &format!("Unable to release batch {} of {}", batch.id, self.feature()),
                Some(&e),
            );
        }
    }

    fn log_retained(&self, batch: &BatchData, status: &UploadStatus) {
        let level = if status.should_retry() {
            LogLevel::Debug
        } else {
            LogLevel::Warn
        };
        self.logger.log(
            level,
            &[LogTarget::Maintainer],
            &format!(
                "Batch {} of {} kept after a failed upload (retry expected: {})",
                batch.id,
                self.feature(),
                status.should_retry()
            ),
            None,
        );
    }
}

impl std::fmt::Debug for DataUploadRunnable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataUploadRunnable")
            .field("feature", &self.feature())
            .field("state", &self.state())
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UploadContext;
    use crate::http::HttpClient;
    use crate::request::{DefaultRequestFactory, Request};
    use crate::strategy::DefaultUploadSchedulerStrategy;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use telepipe_core::{
        BackPressureMitigation, BackPressureStrategy, ConsentProvider, FilePersistenceConfig,
        ManualTimeProvider, NoOpLogger, PersistenceContext, PersistenceExecutor, RawBatchEvent,
        TrackingConsent, UploadFrequency,
    };
    use tempfile::{tempdir, TempDir};

    const START: u64 = 1_700_000_000_000;

    #[derive(Default)]
    struct Server {
        answers: Mutex<VecDeque<Result<u16, UploadError>>>,
        bodies: Mutex<Vec<Vec<u8>>>,
    }

    impl Server {
        fn answer(&self, answer: Result<u16, UploadError>) {
            self.answers.lock().push_back(answer);
        }

        fn bodies(&self) -> Vec<Vec<u8>> {
            self.bodies.lock().clone()
        }
    }

    impl HttpClient for Server {
        fn execute(&self, request: &Request, _timeout: Duration) -> Result<u16, UploadError> {
            self.bodies.lock().push(request.body.clone());
            self.answers.lock().pop_front().unwrap_or(Ok(202))
        }
    }

    struct Harness {
        _dir: TempDir,
        clock: Arc<ManualTimeProvider>,
        server: Arc<Server>,
        storage: Arc<FeatureStorage>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let clock = Arc::new(ManualTimeProvider::new(START));
            let logger = Arc::new(NoOpLogger);
            let executor = Arc::new(
                PersistenceExecutor::start(
                    "upload-test",
                    BackPressureStrategy::new(64, BackPressureMitigation::IgnoreNewest),
                    None,
                    logger.clone(),
                )
                .unwrap(),
            );
            let context = PersistenceContext::new(
                dir.path(),
                executor,
                Arc::new(ConsentProvider::new(TrackingConsent::Granted)),
                logger,
                clock.clone(),
            );
            let config = FilePersistenceConfig::new()
                .recent_delay(Duration::from_secs(1))
                .max_items_per_batch(1);
            let storage = Arc::new(FeatureStorage::new(&context, "logs", config, None, None).unwrap());
            Self {
                _dir: dir,
                clock,
                server: Arc::new(Server::default()),
                storage,
            }
        }

        fn write(&self, payload: &str) {
            assert!(self
                .storage
                .write_event(RawBatchEvent::new(payload.as_bytes().to_vec()), None)
                .is_queued());
            self.storage.flush().unwrap();
            self.clock.advance(Duration::from_millis(10));
        }

        fn runnable(&self) -> DataUploadRunnable {
            let uploader = DataUploader::new(
                self.server.clone(),
                Arc::new(DefaultRequestFactory::new("Logs Request", "https://intake.test", "/logs")),
                UploadContext::new("key", "rust", "0.3.0"),
                Duration::from_secs(45),
                Arc::new(NoOpLogger),
            );
            DataUploadRunnable::new(
                Arc::clone(&self.storage),
                uploader,
                Arc::new(DefaultUploadSchedulerStrategy::new(UploadFrequency::Average)),
                self.clock.clone(),
                Arc::new(NoOpLogger),
            )
        }

        fn remaining(&self) -> usize {
            let mut count = 0;
            while self.storage.read_next_batch().unwrap().is_some() {
                count += 1;
            }
            count
        }
    }

    #[test]
    fn successful_uploads_delete_batches_in_order() {
        let h = Harness::new();
        h.write("first");
        h.write("second");
        h.clock.advance(Duration::from_secs(5));

        let runnable = h.runnable();
        let delay = runnable.run().unwrap();

        assert_eq!(h.server.bodies(), vec![b"first".to_vec(), b"second".to_vec()]);
        assert_eq!(h.storage.read_next_batch().unwrap(), None);
        assert_eq!(delay, Duration::from_millis(9_000));
        assert_eq!(runnable.state(), UploadState::Scheduled);
    }

    #[test]
    fn failed_upload_retains_batch_and_ends_cycle() {
        let h = Harness::new();
        h.write("first");
        h.write("second");
        h.clock.advance(Duration::from_secs(5));
        h.server.answer(Ok(500));

        let delay = h.runnable().run().unwrap();

        assert_eq!(h.server.bodies().len(), 1);
        assert_eq!(delay, Duration::from_millis(11_000));
        h.storage.flush().unwrap();
        assert_eq!(h.remaining(), 2);
    }

    #[test]
    fn client_error_also_retains_batch() {
        let h = Harness::new();
        h.write("first");
        h.clock.advance(Duration::from_secs(5));
        h.server.answer(Ok(400));

        h.runnable().run().unwrap();
        h.storage.flush().unwrap();
        assert_eq!(h.remaining(), 1);
    }

    #[test]
    fn network_error_backs_off_to_max() {
        let h = Harness::new();
        h.write("first");
        h.clock.advance(Duration::from_secs(5));
        h.server.answer(Err(UploadError::network("connection refused")));

        let delay = h.runnable().run().unwrap();
        assert_eq!(delay, Duration::from_millis(20_000));
    }

    #[test]
    fn expired_batches_are_dropped_unsent() {
        let h = Harness::new();
        h.write("stale");
        h.clock.advance(Duration::from_secs(120));

        let runnable = h.runnable().with_max_batch_age(Duration::from_secs(60));
        runnable.run().unwrap();

        assert!(h.server.bodies().is_empty());
        assert_eq!(h.storage.read_next_batch().unwrap(), None);
    }

    #[test]
    fn cycle_is_bounded_by_max_batches() {
        let h = Harness::new();
        for i in 0..3 {
            h.write(&format!("event-{i}"));
        }
        h.clock.advance(Duration::from_secs(5));

        h.runnable().with_max_batches_per_job(2).run().unwrap();
        assert_eq!(h.server.bodies().len(), 2);
    }

    #[test]
    fn empty_cycle_backs_off() {
        let h = Harness::new();
        let delay = h.runnable().run().unwrap();
        assert!(h.server.bodies().is_empty());
        assert_eq!(delay, Duration::from_millis(11_000));
    }

    #[test]
    fn secondary_process_never_uploads() {
        let h = Harness::new();
        h.write("first");
        h.clock.advance(Duration::from_secs(5));

        let runnable = h.runnable().with_owner(false);
        assert_eq!(runnable.run(), None);
        assert_eq!(runnable.state(), UploadState::Idle);
        assert!(h.server.bodies().is_empty());
    }

    #[test]
    fn stopped_runnable_goes_idle() {
        let h = Harness::new();
        let runnable = h.runnable();
        runnable.stop();
        assert!(runnable.is_stopped());
        assert_eq!(runnable.run(), None);
        assert_eq!(runnable.state(), UploadState::Idle);
        assert!(!runnable.state().is_active());
    }
}
