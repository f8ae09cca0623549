//! # Telepipe
//!
//! On-device event durability and upload for observability SDKs.
//!
//! Producers hand over opaque events; Telepipe batches them into files,
//! respects the user's tracking consent, survives restarts and uploads the
//! batches in the background with adaptive backoff.
//!
//! This crate provides:
//! - [`Pipeline`], the SDK instance tying storage, consent and uploads together
//! - [`Feature`], the registration of one data stream
//! - Re-exports of the types a host needs from the lower crates
//!
//! ## Architecture
//!
//! ```text
//! producer ─ write_event ─▶ persistence queue ─▶ persistence worker
//!                                                   │
//!                              <feature>-pending-v2/ │ <feature>-v2/
//!                                                   ▼
//!                upload thread ◀─ read / confirm ─ batch files
//!                      │
//!                      └─ HttpClient ─▶ intake
//! ```
//!
//! ## Key Invariants
//!
//! - Producers never block and never see a panic
//! - Events written while consent is pending are uploaded only once it is
//!   granted, and deleted if it is refused
//! - A batch leaves the device only after the intake accepted it
//! - Only the process owning the storage root uploads

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod feature;
mod pipeline;

pub use error::{PipelineError, PipelineResult};
pub use feature::Feature;
pub use pipeline::{Pipeline, PipelineBuilder};

pub use telepipe_codec::{Cbor, Deserializer, Serializer};
pub use telepipe_core::{
    BackPressureMitigation, BackPressureObserver, BackPressureStrategy, BatchData, BatchId,
    BatchProcessingLevel, BatchSize, CoreConfig, CoreError, DataStore, DataStoreContent,
    EventBatchWriter, FeatureStorage, FeatureStorageConfiguration, FilePersistenceConfig,
    InternalLogger, LogLevel, LogTarget, ManualTimeProvider, NoOpLogger, PersistenceTask,
    RawBatchEvent, Rejection, Submission, SystemTimeProvider, TimeProvider, TrackingConsent,
    TracingLogger, UploadFrequency, WriteFailure, WriteObserver, WriteOutcome,
};
pub use telepipe_storage::Encryption;
#[cfg(feature = "encryption")]
pub use telepipe_storage::{AesGcmEncryption, EncryptionKey};
pub use telepipe_upload::{
    DefaultRequestFactory, DefaultUploadSchedulerStrategy, HttpClient, Request, RequestFactory,
    UploadConfig, UploadContext, UploadError, UploadSchedulerStrategy, UploadState, UploadStatus,
};
