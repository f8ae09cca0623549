//! Serializer seams for typed values stored as bytes.

use crate::error::{CodecError, CodecResult};
use serde::{de::DeserializeOwned, Serialize};

/// Turns a value into bytes.
pub trait Serializer<T: ?Sized>: Send + Sync {
    /// Serializes `value`.
    fn serialize(&self, value: &T) -> CodecResult<Vec<u8>>;
}

/// Turns bytes back into a value.
pub trait Deserializer<T>: Send + Sync {
    /// Deserializes `bytes`.
    fn deserialize(&self, bytes: &[u8]) -> CodecResult<T>;
}

/// CBOR serialization for any `serde` type.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cbor;

impl<T: Serialize + ?Sized> Serializer<T> for Cbor {
    fn serialize(&self, value: &T) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
        Ok(buf)
    }
}

impl<T: DeserializeOwned> Deserializer<T> for Cbor {
    fn deserialize(&self, bytes: &[u8]) -> CodecResult<T> {
        ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
    }
}
