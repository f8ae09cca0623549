//! Versioned records: a version code block followed by a data block.

use crate::block::{decode_blocks, encode_blocks, validate_schema, TlvBlock, TlvBlockType};
use crate::error::{CodecError, CodecResult};

/// Block layout every versioned record must follow.
pub const VERSIONED_RECORD_SCHEMA: [TlvBlockType; 2] =
    [TlvBlockType::VersionCode, TlvBlockType::Data];

/// A payload tagged with the version of the format it was written in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedRecord {
    /// Version of the payload format.
    pub version: u32,
    /// Serialized payload.
    pub data: Vec<u8>,
}

impl VersionedRecord {
    /// Creates a record.
    pub fn new(version: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            version,
            data: data.into(),
        }
    }

    /// Encodes the record as `VersionCode` then `Data`.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        encode_blocks(&[
            TlvBlock::new(TlvBlockType::VersionCode, self.version.to_be_bytes().to_vec()),
            TlvBlock::new(TlvBlockType::Data, self.data.clone()),
        ])
    }

    /// Decodes and validates a record.
    ///
    /// # Errors
    ///
    /// Any deviation from the fixed layout is a structural error.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let mut blocks = decode_blocks(bytes)?;
        validate_schema(&blocks, &VERSIONED_RECORD_SCHEMA)?;

        let data = blocks.pop().map(|b| b.data).unwrap_or_default();
        let version_block = blocks
            .pop()
            .ok_or(CodecError::InvalidBlockCount {
                expected: VERSIONED_RECORD_SCHEMA.len(),
                actual: 1,
            })?;
        let version_bytes: [u8; 4] =
            version_block
                .data
                .as_slice()
                .try_into()
                .map_err(|_| CodecError::InvalidPayloadSize {
                    block_type: TlvBlockType::VersionCode,
                    expected: 4,
                    actual: version_block.data.len(),
                })?;

        Ok(Self {
            version: u32::from_be_bytes(version_bytes),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encode_layout() {
        let bytes = VersionedRecord::new(7, b"ab".to_vec()).encode().unwrap();
        assert_eq!(
            bytes,
            vec![0x02, 0, 0, 0, 4, 0, 0, 0, 7, 0x03, 0, 0, 0, 2, b'a', b'b']
        );
    }

    #[test]
    fn empty_data_roundtrip() {
        let record = VersionedRecord::new(0, Vec::new());
        let decoded = VersionedRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn missing_data_block_is_count_error() {
        let bytes = encode_blocks(&[TlvBlock::new(
            TlvBlockType::VersionCode,
            1u32.to_be_bytes().to_vec(),
        )])
        .unwrap();
        let err = VersionedRecord::decode(&bytes).unwrap_err();
        assert_eq!(
            err,
            CodecError::InvalidBlockCount {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn swapped_blocks_are_order_error() {
        let bytes = encode_blocks(&[
            TlvBlock::new(TlvBlockType::Data, b"x".to_vec()),
            TlvBlock::new(TlvBlockType::VersionCode, 1u32.to_be_bytes().to_vec()),
        ])
        .unwrap();
        let err = VersionedRecord::decode(&bytes).unwrap_err();
        assert!(matches!(
            err,
            CodecError::UnexpectedBlockOrder { index: 0, .. }
        ));
    }

    #[test]
    fn short_version_block_is_rejected() {
        let bytes = encode_blocks(&[
            TlvBlock::new(TlvBlockType::VersionCode, vec![1, 2]),
            TlvBlock::new(TlvBlockType::Data, b"x".to_vec()),
        ])
        .unwrap();
        let err = VersionedRecord::decode(&bytes).unwrap_err();
        assert_eq!(
            err,
            CodecError::InvalidPayloadSize {
                block_type: TlvBlockType::VersionCode,
                expected: 4,
                actual: 2
            }
        );
    }

    proptest! {
        #[test]
        fn roundtrip_any_payload(version in any::<u32>(), data in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let record = VersionedRecord::new(version, data);
            let decoded = VersionedRecord::decode(&record.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded, record);
        }
    }
}
