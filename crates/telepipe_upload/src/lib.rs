//! # Telepipe Upload
//!
//! Periodic delivery of persisted batches to a remote intake.
//!
//! This crate provides:
//! - The upload status taxonomy and its user-facing log messages
//! - Request building (`RequestFactory`) and the `HttpClient` seam
//! - A data uploader that classifies every outcome without failing
//! - An adaptive delay strategy bounded per upload frequency
//! - The per-feature upload runnable and the timer thread driving it
//!
//! ## Architecture
//!
//! Each feature gets a [`DataUploadRunnable`]. The [`UploadScheduler`] runs
//! it when due; the runnable reads batches through its feature storage,
//! sends them with a [`DataUploader`], confirms or releases them, and asks
//! its [`UploadSchedulerStrategy`] when to come back.
//!
//! ## Key Invariants
//!
//! - A batch is deleted only after the intake accepted it, or when it is
//!   too old or empty to be worth sending
//! - A failed upload leaves the batch in place and ends the cycle
//! - The delay always stays within `[base, base × 10]` of the frequency
//! - A process that does not own the storage root never uploads

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod http;
mod request;
mod runnable;
mod scheduler;
mod status;
mod strategy;
mod uploader;

pub use config::{UploadConfig, UploadContext, DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_BATCH_AGE};
pub use error::{UploadError, UploadResult};
pub use http::{is_valid_header_value, HttpClient};
pub use request::{
    DefaultRequestFactory, Request, RequestFactory, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT_UTF8,
    HEADER_API_KEY, HEADER_EVP_ORIGIN, HEADER_EVP_ORIGIN_VERSION, HEADER_REQUEST_ID,
};
pub use runnable::{DataUploadRunnable, UploadOutcome, UploadState};
pub use scheduler::UploadScheduler;
pub use status::UploadStatus;
pub use strategy::{DefaultUploadSchedulerStrategy, UploadSchedulerStrategy};
pub use uploader::DataUploader;
