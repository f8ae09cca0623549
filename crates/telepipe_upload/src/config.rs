//! Configuration for uploads.

use std::time::Duration;

/// Default request timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(45);

/// Default age after which a batch is dropped instead of uploaded.
pub const DEFAULT_MAX_BATCH_AGE: Duration = Duration::from_secs(18 * 60 * 60);

/// Identity sent with every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadContext {
    /// Intake API key.
    pub api_key: String,
    /// Name of the sending SDK flavor (for example `"android"`).
    pub source: String,
    /// Version of the sending SDK.
    pub sdk_version: String,
}

impl UploadContext {
    /// Creates a new upload context.
    pub fn new(
        api_key: impl Into<String>,
        source: impl Into<String>,
        sdk_version: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            source: source.into(),
            sdk_version: sdk_version.into(),
        }
    }
}

/// Configuration for upload operations.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Intake base URL.
    pub endpoint: String,
    /// Request timeout.
    pub call_timeout: Duration,
    /// Batches older than this are dropped without being sent.
    pub max_batch_age: Duration,
    /// Identity sent with every request.
    pub context: UploadContext,
}

impl UploadConfig {
    /// Creates a new upload configuration.
    pub fn new(endpoint: impl Into<String>, context: UploadContext) -> Self {
        Self {
            endpoint: endpoint.into(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_batch_age: DEFAULT_MAX_BATCH_AGE,
            context,
        }
    }

    /// Sets the request timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Sets the maximum batch age.
    pub fn with_max_batch_age(mut self, age: Duration) -> Self {
        self.max_batch_age = age;
        self
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self::new("", UploadContext::new("", "", ""))
    }
}
