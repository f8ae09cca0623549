//! # Telepipe Testkit
//!
//! Test utilities for Telepipe.
//!
//! This crate provides:
//! - Temporary pipelines on a manual clock
//! - A scripted HTTP client and a capturing logger
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use telepipe_testkit::prelude::*;
//!
//! #[test]
//! fn events_reach_the_intake() {
//!     let test = TestPipeline::uploading(TrackingConsent::Granted);
//!     let logs = test.register("logs");
//!     test.write_all(&logs, &[b"hello"]);
//!     test.age_batches();
//!     assert!(wait_until(Duration::from_secs(5), || test.http.request_count() == 1));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fakes;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fakes::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use std::time::Duration;
    pub use telepipe::TrackingConsent;
}

pub use fakes::*;
pub use fixtures::*;
pub use generators::*;
