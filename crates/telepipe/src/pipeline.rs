//! The SDK instance: one storage root, one persistence worker, one upload
//! thread, and the features registered on them.

use crate::error::{PipelineError, PipelineResult};
use crate::feature::Feature;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telepipe_core::{
    BackPressureObserver, ConsentProvider, CoreConfig, CoreResult, DataStore, FeatureStorage,
    FilePersistenceConfig, InternalLogger, LogLevel, LogTarget, PersistenceContext,
    PersistenceExecutor, PersistenceTask, RawBatchEvent, StorageRoot, Submission,
    SystemTimeProvider, TimeProvider, TrackingConsent, TracingLogger, DEFAULT_CALL_TIMEOUT,
};
use telepipe_upload::{
    DataUploadRunnable, DataUploader, DefaultRequestFactory, DefaultUploadSchedulerStrategy,
    HttpClient, UploadConfig, UploadScheduler, UploadSchedulerStrategy, UploadState,
};

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    root: PathBuf,
    name: String,
    config: CoreConfig,
    upload: UploadConfig,
    logger: Arc<dyn InternalLogger>,
    time: Arc<dyn TimeProvider>,
    http_client: Option<Arc<dyn HttpClient>>,
    strategy: Option<Arc<dyn UploadSchedulerStrategy>>,
    backpressure_observer: Option<Arc<dyn BackPressureObserver<PersistenceTask>>>,
    call_timeout: Duration,
}

impl PipelineBuilder {
    fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            name: "telepipe".to_string(),
            config: CoreConfig::default(),
            upload: UploadConfig::default(),
            logger: Arc::new(TracingLogger),
            time: Arc::new(SystemTimeProvider),
            http_client: None,
            strategy: None,
            backpressure_observer: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Sets the instance name, used for thread names.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the core configuration.
    pub fn with_config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the upload configuration.
    pub fn with_upload_config(mut self, upload: UploadConfig) -> Self {
        self.upload = upload;
        self
    }

    /// Sets the internal logger. Defaults to [`TracingLogger`].
    pub fn with_logger(mut self, logger: Arc<dyn InternalLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Sets the clock. Defaults to the system clock.
    pub fn with_time_provider(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = time;
        self
    }

    /// Sets the HTTP client. Without one, events are persisted but never
    /// uploaded.
    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Replaces the default upload delay strategy.
    pub fn with_upload_strategy(mut self, strategy: Arc<dyn UploadSchedulerStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Observes the persistence queue filling up and dropping tasks.
    pub fn with_backpressure_observer(
        mut self,
        observer: Arc<dyn BackPressureObserver<PersistenceTask>>,
    ) -> Self {
        self.backpressure_observer = Some(observer);
        self
    }

    /// Sets how long synchronous storage calls wait for the persistence
    /// worker.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Opens the storage root and starts the worker threads.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be used or a thread cannot be
    /// spawned.
    pub fn build(self) -> PipelineResult<Pipeline> {
        let root = StorageRoot::open(&self.root)?;
        let executor = Arc::new(PersistenceExecutor::start(
            &self.name,
            self.config.backpressure,
            self.backpressure_observer,
            Arc::clone(&self.logger),
        )?);
        let consent = Arc::new(ConsentProvider::new(self.config.initial_consent));
        let mut context = PersistenceContext::new(
            root.path(),
            executor,
            consent,
            Arc::clone(&self.logger),
            self.time,
        );
        context.call_timeout = self.call_timeout;

        if !root.is_owner() {
            self.logger.log(
                LogLevel::Warn,
                &[LogTarget::User],
                &format!(
                    "{} is used by another process; events are kept but this instance will not upload them",
                    root.path().display()
                ),
                None,
            );
        }

        let scheduler = match &self.http_client {
            Some(_) if root.is_owner() => {
                Some(UploadScheduler::start(&self.name, Arc::clone(&self.logger))?)
            }
            _ => None,
        };
        let strategy = self.strategy.unwrap_or_else(|| {
            Arc::new(DefaultUploadSchedulerStrategy::new(
                self.config.upload_frequency,
            ))
        });

        Ok(Pipeline {
            root,
            config: self.config,
            upload: self.upload,
            context,
            http_client: self.http_client,
            strategy,
            scheduler,
            features: RwLock::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        })
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("root", &self.root)
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct Registered {
    storage: Arc<FeatureStorage>,
    datastore: Arc<DataStore>,
    runnable: Option<Arc<DataUploadRunnable>>,
}

/// A running pipeline.
///
/// There is no global instance: create as many as needed, each with its own
/// root. Two pipelines on the same root share files; only the first one
/// uploads.
///
/// ```rust,ignore
/// let pipeline = Pipeline::builder("/data/sdk")
///     .with_upload_config(UploadConfig::new(endpoint, context))
///     .with_http_client(client)
///     .build()?;
/// let logs = pipeline.register_feature(Feature::new(
///     "logs",
///     pipeline.default_request_factory("Logs Request", "/api/v2/logs"),
/// ))?;
/// pipeline.set_consent(TrackingConsent::Granted);
/// logs.write_event(RawBatchEvent::new(payload), None);
/// ```
pub struct Pipeline {
    root: StorageRoot,
    config: CoreConfig,
    upload: UploadConfig,
    context: PersistenceContext,
    http_client: Option<Arc<dyn HttpClient>>,
    strategy: Arc<dyn UploadSchedulerStrategy>,
    scheduler: Option<UploadScheduler>,
    features: RwLock<HashMap<String, Registered>>,
    stopped: AtomicBool,
}

impl Pipeline {
    /// Starts building a pipeline rooted at `root`.
    pub fn builder(root: impl Into<PathBuf>) -> PipelineBuilder {
        PipelineBuilder::new(root)
    }

    /// Registers a feature and starts its uploads.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Stopped`] after [`stop`](Self::stop)
    /// - [`PipelineError::FeatureAlreadyRegistered`] for a duplicate name
    /// - [`PipelineError::Core`] for an unusable name
    pub fn register_feature(&self, feature: Feature) -> PipelineResult<Arc<FeatureStorage>> {
        if self.is_stopped() {
            return Err(PipelineError::Stopped);
        }
        let mut features = self.features.write();
        if features.contains_key(&feature.name) {
            return Err(PipelineError::FeatureAlreadyRegistered { name: feature.name });
        }

        let persistence = feature.persistence.unwrap_or_else(|| {
            FilePersistenceConfig::for_feature(self.config.batch_size, &feature.storage)
        });
        let storage = Arc::new(FeatureStorage::new(
            &self.context,
            &feature.name,
            persistence,
            feature.encryption.clone(),
            feature.write_observer.clone(),
        )?);
        let datastore = Arc::new(DataStore::for_feature(
            &self.context,
            &feature.name,
            feature.encryption,
        )?);

        let runnable = match (&self.scheduler, &self.http_client) {
            (Some(scheduler), Some(client)) => {
                let uploader = DataUploader::new(
                    Arc::clone(client),
                    feature.request_factory,
                    self.upload.context.clone(),
                    self.upload.call_timeout,
                    Arc::clone(&self.context.logger),
                );
                let runnable = Arc::new(
                    DataUploadRunnable::new(
                        Arc::clone(&storage),
                        uploader,
                        Arc::clone(&self.strategy),
                        Arc::clone(&self.context.time),
                        Arc::clone(&self.context.logger),
                    )
                    .with_max_batches_per_job(
                        self.config.batch_processing_level.max_batches_per_upload_job(),
                    )
                    .with_max_batch_age(self.upload.max_batch_age)
                    .with_owner(self.root.is_owner()),
                );
                scheduler.start_job(Arc::clone(&runnable));
                Some(runnable)
            }
            _ => None,
        };

        features.insert(
            feature.name,
            Registered {
                storage: Arc::clone(&storage),
                datastore,
                runnable,
            },
        );
        Ok(storage)
    }

    /// A request factory posting to this pipeline's endpoint.
    pub fn default_request_factory(
        &self,
        description: impl Into<String>,
        path: impl Into<String>,
    ) -> Arc<DefaultRequestFactory> {
        Arc::new(DefaultRequestFactory::new(
            description,
            self.upload.endpoint.clone(),
            path,
        ))
    }

    /// Storage of a registered feature.
    pub fn feature(&self, name: &str) -> Option<Arc<FeatureStorage>> {
        self.features.read().get(name).map(|f| Arc::clone(&f.storage))
    }

    /// Datastore of a registered feature.
    pub fn datastore(&self, name: &str) -> Option<Arc<DataStore>> {
        self.features
            .read()
            .get(name)
            .map(|f| Arc::clone(&f.datastore))
    }

    /// Names of the registered features, sorted.
    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.features.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Upload state of a registered feature.
    ///
    /// Features that never upload (no HTTP client, secondary process) are
    /// always [`UploadState::Idle`].
    pub fn upload_state(&self, name: &str) -> Option<UploadState> {
        self.features.read().get(name).map(|f| {
            f.runnable
                .as_ref()
                .map_or(UploadState::Idle, |r| r.state())
        })
    }

    /// Queues an event for `feature`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnknownFeature`] if no such feature is
    /// registered. Rejections by the feature itself are reported in the
    /// returned [`Submission`].
    pub fn write_event(
        &self,
        feature: &str,
        event: RawBatchEvent,
        batch_metadata: Option<Vec<u8>>,
    ) -> PipelineResult<Submission> {
        let storage = self
            .feature(feature)
            .ok_or_else(|| PipelineError::UnknownFeature {
                name: feature.to_string(),
            })?;
        Ok(storage.write_event(event, batch_metadata))
    }

    /// Current tracking consent.
    pub fn consent(&self) -> TrackingConsent {
        self.context.consent.consent()
    }

    /// Changes the tracking consent. Pending data is migrated accordingly.
    pub fn set_consent(&self, consent: TrackingConsent) {
        let previous = self.context.consent.set_consent(consent);
        if previous != consent {
            self.context.logger.log(
                LogLevel::Debug,
                &[LogTarget::Maintainer],
                &format!("Tracking consent changed from {previous:?} to {consent:?}"),
                None,
            );
        }
    }

    /// Waits until every event queued so far is on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker does not catch up within the call
    /// timeout or the pipeline is stopped.
    pub fn flush(&self) -> PipelineResult<()> {
        self.context.executor.flush(self.context.call_timeout)?;
        Ok(())
    }

    /// Deletes every batch and datastore entry of every feature.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Stopped`] after [`stop`](Self::stop).
    pub fn clear_all_data(&self) -> PipelineResult<()> {
        if self.is_stopped() {
            return Err(PipelineError::Stopped);
        }
        let logger = Arc::clone(&self.context.logger);
        for (name, feature) in self.features.read().iter() {
            feature.storage.drop_all()?;
            let logger = Arc::clone(&logger);
            let name = name.clone();
            feature.datastore.clear_all_async(move |result: CoreResult<()>| {
                if let Err(e) = result {
                    logger.log(
                        LogLevel::Warn,
                        &[LogTarget::Maintainer],
                        &format!("Unable to clear the datastore of {name}"),
                        Some(&e),
                    );
                }
            })?;
        }
        Ok(())
    }

    /// Returns true if this process owns the storage root and uploads.
    pub fn is_owner(&self) -> bool {
        self.root.is_owner()
    }

    /// Storage root directory.
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Core configuration.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Upload configuration.
    pub fn upload_config(&self) -> &UploadConfig {
        &self.upload
    }

    /// Returns true after [`stop`](Self::stop).
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stops uploads and persistence.
    ///
    /// Queued work is discarded. Each worker gets the configured shutdown
    /// grace to finish what it is doing; this never blocks longer than
    /// that per worker.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let grace = self.config.shutdown_grace;
        self.context.consent.unregister_all();
        for feature in self.features.read().values() {
            if let Some(runnable) = &feature.runnable {
                runnable.stop();
            }
        }
        if let Some(scheduler) = &self.scheduler {
            scheduler.stop(grace);
        }
        self.context.executor.shutdown(grace);
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("root", &self.root.path())
            .field("owner", &self.is_owner())
            .field("features", &self.feature_names())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}
