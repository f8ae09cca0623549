//! What a feature brings to the pipeline.

use std::sync::Arc;
use telepipe_core::{FeatureStorageConfiguration, FilePersistenceConfig, WriteObserver};
use telepipe_storage::Encryption;
use telepipe_upload::RequestFactory;

/// Registration of one feature (logs, traces, ...).
///
/// ```rust,ignore
/// let logs = Feature::new("logs", Arc::new(DefaultRequestFactory::new(
///     "Logs Request",
///     "https://intake.example.com",
///     "/api/v2/logs",
/// )));
/// let storage = pipeline.register_feature(logs)?;
/// ```
#[derive(Clone)]
pub struct Feature {
    /// Feature name. Used as a directory name, so ASCII letters, digits,
    /// `-`, `_` and `.` only.
    pub name: String,
    /// Builds the upload request of a batch.
    pub request_factory: Arc<dyn RequestFactory>,
    /// Item and batch limits.
    pub storage: FeatureStorageConfiguration,
    /// Replaces the file settings derived from the pipeline configuration.
    pub persistence: Option<FilePersistenceConfig>,
    /// Encrypts events and metadata at rest.
    pub encryption: Option<Arc<dyn Encryption>>,
    /// Notified of every write.
    pub write_observer: Option<Arc<dyn WriteObserver>>,
}

impl Feature {
    /// Creates a feature with default limits.
    pub fn new(name: impl Into<String>, request_factory: Arc<dyn RequestFactory>) -> Self {
        Self {
            name: name.into(),
            request_factory,
            storage: FeatureStorageConfiguration::default(),
            persistence: None,
            encryption: None,
            write_observer: None,
        }
    }

    /// Sets the item and batch limits.
    pub fn with_storage_config(mut self, storage: FeatureStorageConfiguration) -> Self {
        self.storage = storage;
        self
    }

    /// Uses `persistence` as-is for this feature's files.
    pub fn with_persistence_config(mut self, persistence: FilePersistenceConfig) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Encrypts this feature's data at rest.
    pub fn with_encryption(mut self, encryption: Arc<dyn Encryption>) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Sets the write observer.
    pub fn with_write_observer(mut self, observer: Arc<dyn WriteObserver>) -> Self {
        self.write_observer = Some(observer);
        self
    }
}

impl std::fmt::Debug for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feature")
            .field("name", &self.name)
            .field("storage", &self.storage)
            .field("persistence", &self.persistence)
            .field("encrypted", &self.encryption.is_some())
            .finish_non_exhaustive()
    }
}
