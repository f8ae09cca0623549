//! # Telepipe Core
//!
//! Local persistence for Telepipe: everything between a producer handing over
//! an event and a batch file being ready for upload.
//!
//! This crate provides:
//! - A bounded task queue with drop-oldest or ignore-newest backpressure
//! - The persistence executor, a single worker thread owning all file access
//! - Batch file selection, rotation, expiry and disk quota
//! - Consent-aware routing of writes with pending data migration
//! - Per-feature storage (write, read, confirm, drop) and a versioned
//!   key-value datastore
//!
//! ## Key Invariants
//!
//! - At most one batch per directory is open for writing
//! - A closed batch is never appended to again
//! - Events within a batch keep their insertion order
//! - Only batches written under granted consent are ever read for upload
//! - Nothing in this crate panics into the caller; failures are logged
//!   through [`InternalLogger`] or returned as values

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backpressure;
mod batch;
mod config;
mod consent;
mod datastore;
mod error;
mod executor;
pub mod file;
mod logger;
mod reader;
mod root;
mod storage;
mod time;
mod writer;

#[cfg(test)]
mod test_support;

pub use backpressure::{BackPressureObserver, BackPressuredQueue, OfferOutcome};
pub use batch::{batch_timestamp, BatchData, BatchId, METADATA_SUFFIX};
pub use config::{
    BackPressureMitigation, BackPressureStrategy, BatchProcessingLevel, BatchSize, CoreConfig,
    FeatureStorageConfiguration, FilePersistenceConfig, UploadFrequency,
};
pub use consent::{ConsentListener, ConsentProvider, TrackingConsent};
pub use datastore::{DataStore, DataStoreContent, DATASTORE_DIR};
pub use error::{CoreError, CoreResult};
pub use executor::{PersistenceExecutor, PersistenceTask};
pub use logger::{InternalLogger, LogLevel, LogTarget, NoOpLogger, TracingLogger};
pub use reader::FileEventBatchReader;
pub use root::StorageRoot;
pub use storage::{
    granted_dir_name, pending_dir_name, FeatureStorage, PersistenceContext, Rejection,
    Submission, DEFAULT_CALL_TIMEOUT,
};
pub use telepipe_storage::RawBatchEvent;
pub use time::{ManualTimeProvider, SystemTimeProvider, TimeProvider};
pub use writer::{EventBatchWriter, FileEventBatchWriter, WriteFailure, WriteObserver, WriteOutcome};

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
