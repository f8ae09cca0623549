//! # Telepipe Codec
//!
//! Binary framing for everything Telepipe keeps on disk.
//!
//! ## TLV Blocks
//!
//! Every block is laid out as:
//!
//! ```text
//! | type: u8 | length: u32 (big-endian) | data |
//! ```
//!
//! Blocks are concatenated with no separators. Batch files hold pairs of
//! `EventMetadata` and `EventData` blocks; datastore entries hold a single
//! [`VersionedRecord`] (`VersionCode` then `Data`).
//!
//! ## Structural Errors
//!
//! A record with the wrong number of blocks, or the right blocks in the wrong
//! order, is an error. It is never reported as "no data".
//!
//! ## Usage
//!
//! ```
//! use telepipe_codec::VersionedRecord;
//!
//! let record = VersionedRecord::new(1, b"payload".to_vec());
//! let bytes = record.encode().unwrap();
//! assert_eq!(VersionedRecord::decode(&bytes).unwrap(), record);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod block;
mod error;
mod record;
mod serializer;

pub use block::{
    decode_blocks, encode_blocks, validate_schema, TlvBlock, TlvBlockReader, TlvBlockType,
    HEADER_SIZE, MAX_BLOCK_SIZE,
};
pub use error::{CodecError, CodecResult};
pub use record::{VersionedRecord, VERSIONED_RECORD_SCHEMA};
pub use serializer::{Cbor, Deserializer, Serializer};
