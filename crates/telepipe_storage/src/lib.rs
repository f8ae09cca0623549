//! # Telepipe Storage
//!
//! Byte-level access to batch files and their metadata sidecars.
//!
//! This crate knows how events are framed inside a batch file, but nothing
//! about which file to write to, consent, or uploads. Those decisions belong
//! to `telepipe_core`, which also does all logging. Readers here report
//! damage as data and leave it to the caller to decide what to log.
//!
//! ## Readers and Writers
//!
//! - [`PlainFileReaderWriter`] - Whole-file reads and writes (metadata sidecars)
//! - [`PlainBatchFileReaderWriter`] - Appends and reads framed events
//! - [`EncryptedFileReaderWriter`] / [`EncryptedBatchFileReaderWriter`] -
//!   Wrappers that apply an [`Encryption`] before bytes reach disk
//!
//! ## Example
//!
//! ```rust
//! use telepipe_storage::{BatchFileReaderWriter, PlainBatchFileReaderWriter, RawBatchEvent};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let file = dir.path().join("1700000000000");
//! let rw = PlainBatchFileReaderWriter::new();
//!
//! rw.write_event(&file, &RawBatchEvent::new(b"{}".to_vec()), true).unwrap();
//! let contents = rw.read_events(&file).unwrap();
//! assert_eq!(contents.events.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod encrypted;
mod error;
mod event;
mod file;

pub use batch::{
    frame_event, framed_len, parse_events, BatchFileContents, BatchFileReaderWriter,
    PlainBatchFileReaderWriter,
};
#[cfg(feature = "encryption")]
pub use encrypted::{AesGcmEncryption, EncryptionKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use encrypted::{
    decrypt_batch_bytes, EncryptedBatchFileReaderWriter, EncryptedFileReaderWriter, Encryption,
};
pub use error::{StorageError, StorageResult};
pub use event::RawBatchEvent;
pub use file::{FileReader, FileReaderWriter, FileWriter, PlainFileReaderWriter};
