//! Pipeline configuration.

use crate::consent::TrackingConsent;
use std::time::Duration;

/// How long a batch stays open for writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchSize {
    /// One second window.
    Small,
    /// Five second window.
    #[default]
    Medium,
    /// Ten second window.
    Large,
}

impl BatchSize {
    /// The "recent" window used for both file reuse and read grace.
    #[must_use]
    pub const fn window(self) -> Duration {
        match self {
            Self::Small => Duration::from_millis(1_000),
            Self::Medium => Duration::from_millis(5_000),
            Self::Large => Duration::from_millis(10_000),
        }
    }
}

/// Base step of the upload delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadFrequency {
    /// 500 ms base step.
    Frequent,
    /// 2000 ms base step.
    #[default]
    Average,
    /// 5000 ms base step.
    Rare,
}

impl UploadFrequency {
    /// Base step in milliseconds.
    #[must_use]
    pub const fn base_step_ms(self) -> u64 {
        match self {
            Self::Frequent => 500,
            Self::Average => 2_000,
            Self::Rare => 5_000,
        }
    }
}

/// How many batches a single upload cycle may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchProcessingLevel {
    /// One batch per cycle.
    Low,
    /// Ten batches per cycle.
    #[default]
    Medium,
    /// One hundred batches per cycle.
    High,
}

impl BatchProcessingLevel {
    /// Maximum batches handled per upload cycle.
    #[must_use]
    pub const fn max_batches_per_upload_job(self) -> usize {
        match self {
            Self::Low => 1,
            Self::Medium => 10,
            Self::High => 100,
        }
    }
}

/// What a full queue does with one more item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackPressureMitigation {
    /// Evict the oldest queued item to make room.
    DropOldest,
    /// Reject the new item.
    #[default]
    IgnoreNewest,
}

/// Bound and overflow policy of the persistence queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackPressureStrategy {
    /// Maximum number of queued items.
    pub capacity: usize,
    /// Overflow policy.
    pub mitigation: BackPressureMitigation,
}

impl Default for BackPressureStrategy {
    fn default() -> Self {
        Self {
            capacity: 1024,
            mitigation: BackPressureMitigation::IgnoreNewest,
        }
    }
}

impl BackPressureStrategy {
    /// Creates a strategy.
    #[must_use]
    pub const fn new(capacity: usize, mitigation: BackPressureMitigation) -> Self {
        Self {
            capacity,
            mitigation,
        }
    }
}

/// Configuration shared by every feature of a pipeline.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Open-batch window.
    pub batch_size: BatchSize,
    /// Upload delay base step.
    pub upload_frequency: UploadFrequency,
    /// Batches per upload cycle.
    pub batch_processing_level: BatchProcessingLevel,
    /// Persistence queue policy.
    pub backpressure: BackPressureStrategy,
    /// Consent at startup.
    pub initial_consent: TrackingConsent,
    /// How long shutdown waits for in-flight work.
    pub shutdown_grace: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            batch_size: BatchSize::Medium,
            upload_frequency: UploadFrequency::Average,
            batch_processing_level: BatchProcessingLevel::Medium,
            backpressure: BackPressureStrategy::default(),
            initial_consent: TrackingConsent::Pending,
            shutdown_grace: Duration::from_secs(1),
        }
    }
}

impl CoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the open-batch window.
    #[must_use]
    pub const fn batch_size(mut self, value: BatchSize) -> Self {
        self.batch_size = value;
        self
    }

    /// Sets the upload delay base step.
    #[must_use]
    pub const fn upload_frequency(mut self, value: UploadFrequency) -> Self {
        self.upload_frequency = value;
        self
    }

    /// Sets the number of batches per upload cycle.
    #[must_use]
    pub const fn batch_processing_level(mut self, value: BatchProcessingLevel) -> Self {
        self.batch_processing_level = value;
        self
    }

    /// Sets the persistence queue policy.
    #[must_use]
    pub const fn backpressure(mut self, value: BackPressureStrategy) -> Self {
        self.backpressure = value;
        self
    }

    /// Sets the consent at startup.
    #[must_use]
    pub const fn initial_consent(mut self, value: TrackingConsent) -> Self {
        self.initial_consent = value;
        self
    }

    /// Sets the shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace(mut self, value: Duration) -> Self {
        self.shutdown_grace = value;
        self
    }
}

/// Per-feature limits on items and batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureStorageConfiguration {
    /// Largest accepted event payload.
    pub max_item_size: u64,
    /// Events per batch before rotation.
    pub max_items_per_batch: usize,
    /// Batch size before rotation.
    pub max_batch_size: u64,
    /// Age after which a batch is deleted unsent.
    pub old_batch_threshold: Duration,
}

impl Default for FeatureStorageConfiguration {
    fn default() -> Self {
        Self {
            max_item_size: 512 * 1024,
            max_items_per_batch: 500,
            max_batch_size: 4 * 1024 * 1024,
            old_batch_threshold: Duration::from_secs(18 * 60 * 60),
        }
    }
}

impl FeatureStorageConfiguration {
    /// Sets the largest accepted event payload.
    #[must_use]
    pub const fn max_item_size(mut self, value: u64) -> Self {
        self.max_item_size = value;
        self
    }

    /// Sets the number of events per batch.
    #[must_use]
    pub const fn max_items_per_batch(mut self, value: usize) -> Self {
        self.max_items_per_batch = value;
        self
    }

    /// Sets the batch size before rotation.
    #[must_use]
    pub const fn max_batch_size(mut self, value: u64) -> Self {
        self.max_batch_size = value;
        self
    }

    /// Sets the age after which a batch is deleted unsent.
    #[must_use]
    pub const fn old_batch_threshold(mut self, value: Duration) -> Self {
        self.old_batch_threshold = value;
        self
    }
}

/// Everything a file orchestrator needs to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePersistenceConfig {
    /// Window during which a batch is "recent".
    pub recent_delay: Duration,
    /// Batch size before rotation.
    pub max_batch_size: u64,
    /// Largest accepted event payload.
    pub max_item_size: u64,
    /// Events per batch before rotation.
    pub max_items_per_batch: usize,
    /// Age after which a batch is deleted unsent.
    pub old_file_threshold: Duration,
    /// Disk budget for one directory.
    pub max_disk_space: u64,
    /// Minimum time between two automatic purges.
    pub cleanup_frequency: Duration,
}

impl Default for FilePersistenceConfig {
    fn default() -> Self {
        let feature = FeatureStorageConfiguration::default();
        Self {
            recent_delay: BatchSize::default().window(),
            max_batch_size: feature.max_batch_size,
            max_item_size: feature.max_item_size,
            max_items_per_batch: feature.max_items_per_batch,
            old_file_threshold: feature.old_batch_threshold,
            max_disk_space: 128 * 1024 * 1024,
            cleanup_frequency: Duration::from_secs(5),
        }
    }
}

impl FilePersistenceConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the configuration for one feature.
    #[must_use]
    pub fn for_feature(batch_size: BatchSize, feature: &FeatureStorageConfiguration) -> Self {
        Self {
            recent_delay: batch_size.window(),
            max_batch_size: feature.max_batch_size,
            max_item_size: feature.max_item_size,
            max_items_per_batch: feature.max_items_per_batch,
            old_file_threshold: feature.old_batch_threshold,
            ..Self::default()
        }
    }

    /// Sets the recent window.
    #[must_use]
    pub const fn recent_delay(mut self, value: Duration) -> Self {
        self.recent_delay = value;
        self
    }

    /// Sets the batch size before rotation.
    #[must_use]
    pub const fn max_batch_size(mut self, value: u64) -> Self {
        self.max_batch_size = value;
        self
    }

    /// Sets the largest accepted event payload.
    #[must_use]
    pub const fn max_item_size(mut self, value: u64) -> Self {
        self.max_item_size = value;
        self
    }

    /// Sets the number of events per batch.
    #[must_use]
    pub const fn max_items_per_batch(mut self, value: usize) -> Self {
        self.max_items_per_batch = value;
        self
    }

    /// Sets the age after which a batch is deleted.
    #[must_use]
    pub const fn old_file_threshold(mut self, value: Duration) -> Self {
        self.old_file_threshold = value;
        self
    }

    /// Sets the disk budget.
    #[must_use]
    pub const fn max_disk_space(mut self, value: u64) -> Self {
        self.max_disk_space = value;
        self
    }

    /// Sets the minimum time between automatic purges.
    #[must_use]
    pub const fn cleanup_frequency(mut self, value: Duration) -> Self {
        self.cleanup_frequency = value;
        self
    }

    /// Age below which an existing batch may still be written to.
    #[must_use]
    pub fn recent_write_delay_ms(&self) -> u64 {
        (self.recent_delay.as_millis() as f64 * 0.95).round() as u64
    }

    /// Age below which a batch is still too fresh to read.
    #[must_use]
    pub fn recent_read_delay_ms(&self) -> u64 {
        (self.recent_delay.as_millis() as f64 * 1.05).round() as u64
    }
}
