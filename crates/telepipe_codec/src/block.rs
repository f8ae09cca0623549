//! TLV blocks and their wire encoding.
//!
//! ```text
//! | type (1) | length (4, big-endian) | data (length) |
//! ```

use crate::error::{CodecError, CodecResult};
use bytes::BufMut;

/// Size of a block header: type (1) + length (4).
pub const HEADER_SIZE: usize = 5;

/// Largest payload a single block may declare.
///
/// Anything above this is treated as corruption rather than allocated.
pub const MAX_BLOCK_SIZE: usize = 10 * 1024 * 1024;

/// Kind of a TLV block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvBlockType {
    /// Raw bytes of a batched event.
    EventData = 0x00,
    /// Caller-supplied metadata of a batched event.
    EventMetadata = 0x01,
    /// Version code of a datastore record.
    VersionCode = 0x02,
    /// Payload of a datastore record.
    Data = 0x03,
}

impl TlvBlockType {
    /// Converts a byte to a block type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::EventData),
            0x01 => Some(Self::EventMetadata),
            0x02 => Some(Self::VersionCode),
            0x03 => Some(Self::Data),
            _ => None,
        }
    }

    /// Converts the block type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A single type-length-value block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvBlock {
    /// Kind of the block.
    pub block_type: TlvBlockType,
    /// Payload bytes.
    pub data: Vec<u8>,
}

impl TlvBlock {
    /// Creates a block.
    pub fn new(block_type: TlvBlockType, data: impl Into<Vec<u8>>) -> Self {
        Self {
            block_type,
            data: data.into(),
        }
    }

    /// Size of the block once encoded.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.data.len()
    }

    /// Appends the encoded block to `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::BlockTooLarge`] if the payload exceeds
    /// [`MAX_BLOCK_SIZE`].
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        if self.data.len() > MAX_BLOCK_SIZE {
            return Err(CodecError::BlockTooLarge {
                declared: self.data.len(),
                max: MAX_BLOCK_SIZE,
            });
        }
        buf.reserve(self.encoded_len());
        buf.put_u8(self.block_type.as_byte());
        // Bounded by MAX_BLOCK_SIZE above
        buf.put_u32(self.data.len() as u32);
        buf.put_slice(&self.data);
        Ok(())
    }

    /// Encodes the block on its own.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }
}

/// Encodes blocks in the given order, with no separators.
///
/// # Errors
///
/// Returns an error if any block exceeds [`MAX_BLOCK_SIZE`].
pub fn encode_blocks(blocks: &[TlvBlock]) -> CodecResult<Vec<u8>> {
    let total = blocks.iter().map(TlvBlock::encoded_len).sum();
    let mut buf = Vec::with_capacity(total);
    for block in blocks {
        block.encode_into(&mut buf)?;
    }
    Ok(buf)
}

/// Decodes every block in `bytes`.
///
/// Unlike [`TlvBlockReader`], any malformed or trailing data is an error.
pub fn decode_blocks(bytes: &[u8]) -> CodecResult<Vec<TlvBlock>> {
    let mut reader = TlvBlockReader::new(bytes);
    let mut blocks = Vec::new();
    while let Some(block) = reader.next_block()? {
        blocks.push(block);
    }
    Ok(blocks)
}

/// Checks that `blocks` match `schema` exactly, in count and in order.
///
/// # Errors
///
/// - [`CodecError::InvalidBlockCount`] if the counts differ
/// - [`CodecError::UnexpectedBlockOrder`] at the first position whose kind differs
pub fn validate_schema(blocks: &[TlvBlock], schema: &[TlvBlockType]) -> CodecResult<()> {
    if blocks.len() != schema.len() {
        return Err(CodecError::InvalidBlockCount {
            expected: schema.len(),
            actual: blocks.len(),
        });
    }
    for (index, (block, expected)) in blocks.iter().zip(schema).enumerate() {
        if block.block_type != *expected {
            return Err(CodecError::UnexpectedBlockOrder {
                index,
                expected: *expected,
                found: block.block_type,
            });
        }
    }
    Ok(())
}

/// A streaming reader over concatenated TLV blocks.
///
/// The reader stops at the first malformed block. Callers that tolerate a
/// truncated tail (batch files written by a process that died mid-write)
/// iterate with [`Iterator`] and check [`TlvBlockReader::remaining`] afterwards.
#[derive(Debug)]
pub struct TlvBlockReader<'a> {
    data: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> TlvBlockReader<'a> {
    /// Creates a reader over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            failed: false,
        }
    }

    /// Current offset in the input.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not consumed by a successfully read block.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Reads the next block.
    ///
    /// Returns `Ok(None)` at a clean end of input.
    pub fn next_block(&mut self) -> CodecResult<Option<TlvBlock>> {
        if self.failed || self.pos == self.data.len() {
            return Ok(None);
        }
        match self.read_block() {
            Ok(block) => Ok(Some(block)),
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    fn read_block(&mut self) -> CodecResult<TlvBlock> {
        let offset = self.pos;
        let available = self.data.len() - offset;
        if available < HEADER_SIZE {
            return Err(CodecError::MalformedBlock {
                offset,
                declared: 0,
                remaining: available,
            });
        }

        let type_byte = self.data[offset];
        let block_type =
            TlvBlockType::from_byte(type_byte).ok_or(CodecError::UnknownBlockType(type_byte))?;

        let len_bytes: [u8; 4] = self.data[offset + 1..offset + HEADER_SIZE]
            .try_into()
            .map_err(|_| CodecError::MalformedBlock {
                offset,
                declared: 0,
                remaining: available,
            })?;
        let declared = u32::from_be_bytes(len_bytes) as usize;
        if declared > MAX_BLOCK_SIZE {
            return Err(CodecError::BlockTooLarge {
                declared,
                max: MAX_BLOCK_SIZE,
            });
        }

        let start = offset + HEADER_SIZE;
        let remaining = self.data.len() - start;
        if declared > remaining {
            return Err(CodecError::MalformedBlock {
                offset,
                declared,
                remaining,
            });
        }

        self.pos = start + declared;
        Ok(TlvBlock::new(block_type, &self.data[start..self.pos]))
    }
}

impl Iterator for TlvBlockReader<'_> {
    type Item = CodecResult<TlvBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_block().transpose()
    }
}
