//! Batch files: sequences of framed events.
//!
//! Each event is stored as two TLV blocks:
//!
//! ```text
//! | EventMetadata block | EventData block |
//! ```
//!
//! A process killed mid-append leaves a partial pair at the end of the file.
//! Readers return every complete event before it and report the damage.

use crate::error::StorageResult;
use crate::event::RawBatchEvent;
use crate::file::write_locked;
use std::fs;
use std::path::Path;
use telepipe_codec::{encode_blocks, CodecError, TlvBlock, TlvBlockReader, TlvBlockType};

/// Everything recovered from a batch file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchFileContents {
    /// Events in file order, up to the first damaged record.
    pub events: Vec<RawBatchEvent>,
    /// What stopped the read early, if anything.
    pub corruption: Option<CodecError>,
    /// Bytes left unread after the last complete event.
    pub unread_bytes: usize,
    /// Events skipped because they could not be decrypted.
    pub undecryptable: usize,
}

impl BatchFileContents {
    /// Returns true if the whole file was read.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.corruption.is_none() && self.undecryptable == 0
    }
}

/// Reads and appends framed events.
pub trait BatchFileReaderWriter: Send + Sync {
    /// Writes one event to `file`.
    fn write_event(&self, file: &Path, event: &RawBatchEvent, append: bool) -> StorageResult<()>;

    /// Reads every event from `file`.
    ///
    /// # Errors
    ///
    /// Only I/O failures are errors. Damaged content is reported in
    /// [`BatchFileContents::corruption`].
    fn read_events(&self, file: &Path) -> StorageResult<BatchFileContents>;
}

/// Frames an event as its metadata block followed by its data block.
pub fn frame_event(event: &RawBatchEvent) -> StorageResult<Vec<u8>> {
    Ok(encode_blocks(&[
        TlvBlock::new(TlvBlockType::EventMetadata, event.metadata.clone()),
        TlvBlock::new(TlvBlockType::EventData, event.data.clone()),
    ])?)
}

/// Size an event takes on disk once framed.
#[must_use]
pub fn framed_len(event: &RawBatchEvent) -> usize {
    2 * telepipe_codec::HEADER_SIZE + event.payload_len()
}

/// Splits raw batch bytes back into events.
pub fn parse_events(bytes: &[u8]) -> BatchFileContents {
    let mut reader = TlvBlockReader::new(bytes);
    let mut contents = BatchFileContents::default();
    let mut consumed = 0;

    loop {
        let metadata = match reader.next() {
            None => break,
            Some(Err(e)) => {
                contents.corruption = Some(e);
                break;
            }
            Some(Ok(block)) if block.block_type == TlvBlockType::EventMetadata => block.data,
            Some(Ok(block)) => {
                contents.corruption = Some(CodecError::UnexpectedBlockOrder {
                    index: contents.events.len() * 2,
                    expected: TlvBlockType::EventMetadata,
                    found: block.block_type,
                });
                break;
            }
        };

        match reader.next() {
            Some(Ok(block)) if block.block_type == TlvBlockType::EventData => {
                contents.events.push(RawBatchEvent {
                    data: block.data,
                    metadata,
                });
                consumed = reader.position();
            }
            Some(Ok(block)) => {
                contents.corruption = Some(CodecError::UnexpectedBlockOrder {
                    index: contents.events.len() * 2 + 1,
                    expected: TlvBlockType::EventData,
                    found: block.block_type,
                });
                break;
            }
            Some(Err(e)) => {
                contents.corruption = Some(e);
                break;
            }
            None => {
                contents.corruption = Some(CodecError::InvalidBlockCount {
                    expected: 2,
                    actual: 1,
                });
                break;
            }
        }
    }

    contents.unread_bytes = bytes.len() - consumed;
    contents
}

/// Stores events without transformation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainBatchFileReaderWriter;

impl PlainBatchFileReaderWriter {
    /// Creates a new plain batch reader/writer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl BatchFileReaderWriter for PlainBatchFileReaderWriter {
    fn write_event(&self, file: &Path, event: &RawBatchEvent, append: bool) -> StorageResult<()> {
        let framed = frame_event(event)?;
        write_locked(file, &framed, append)
    }

    fn read_events(&self, file: &Path) -> StorageResult<BatchFileContents> {
        let bytes = fs::read(file)?;
        Ok(parse_events(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn events() -> Vec<RawBatchEvent> {
        vec![
            RawBatchEvent::with_metadata(b"one".to_vec(), b"id-1".to_vec()),
            RawBatchEvent::new(b"two".to_vec()),
            RawBatchEvent::with_metadata(Vec::new(), b"id-3".to_vec()),
        ]
    }

    #[test]
    fn appended_events_read_back_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1000");
        let rw = PlainBatchFileReaderWriter::new();

        for event in events() {
            rw.write_event(&path, &event, true).unwrap();
        }

        let contents = rw.read_events(&path).unwrap();
        assert!(contents.is_complete());
        assert_eq!(contents.events, events());
        assert_eq!(contents.unread_bytes, 0);
    }

    #[test]
    fn framed_len_matches_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1000");
        let event = RawBatchEvent::with_metadata(b"payload".to_vec(), b"m".to_vec());

        PlainBatchFileReaderWriter::new()
            .write_event(&path, &event, false)
            .unwrap();
        let size = fs::metadata(&path).unwrap().len() as usize;
        assert_eq!(size, framed_len(&event));
    }

    #[test]
    fn truncated_tail_returns_valid_prefix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1000");
        let rw = PlainBatchFileReaderWriter::new();
        for event in events() {
            rw.write_event(&path, &event, true).unwrap();
        }

        let mut bytes = fs::read(&path).unwrap();
        let full = bytes.len();
        bytes.truncate(full - 2);
        fs::write(&path, &bytes).unwrap();

        let contents = rw.read_events(&path).unwrap();
        assert_eq!(contents.events, events()[..2].to_vec());
        assert!(matches!(
            contents.corruption,
            Some(CodecError::MalformedBlock { .. })
        ));
        let kept: usize = events()[..2].iter().map(framed_len).sum();
        assert_eq!(contents.unread_bytes, full - 2 - kept);
    }

    #[test]
    fn dangling_metadata_block_is_reported() {
        let bytes = TlvBlock::new(TlvBlockType::EventMetadata, b"m".to_vec())
            .encode()
            .unwrap();
        let contents = parse_events(&bytes);
        assert!(contents.events.is_empty());
        assert_eq!(
            contents.corruption,
            Some(CodecError::InvalidBlockCount {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(contents.unread_bytes, bytes.len());
    }

    #[test]
    fn data_block_without_metadata_is_order_error() {
        let bytes = TlvBlock::new(TlvBlockType::EventData, b"d".to_vec())
            .encode()
            .unwrap();
        let contents = parse_events(&bytes);
        assert!(matches!(
            contents.corruption,
            Some(CodecError::UnexpectedBlockOrder { index: 0, .. })
        ));
    }

    #[test]
    fn overwrite_replaces_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1000");
        let rw = PlainBatchFileReaderWriter::new();
        rw.write_event(&path, &RawBatchEvent::new(b"old".to_vec()), true)
            .unwrap();
        rw.write_event(&path, &RawBatchEvent::new(b"new".to_vec()), false)
            .unwrap();
        assert_eq!(
            rw.read_events(&path).unwrap().events,
            vec![RawBatchEvent::new(b"new".to_vec())]
        );
    }

    proptest! {
        #[test]
        fn any_cut_point_yields_a_prefix(cut in 0usize..64) {
            let mut bytes = Vec::new();
            for event in events() {
                bytes.extend(frame_event(&event).unwrap());
            }
            let cut = cut.min(bytes.len());
            let contents = parse_events(&bytes[..cut]);
            let expected = events();
            prop_assert!(contents.events.len() <= expected.len());
            prop_assert_eq!(&contents.events[..], &expected[..contents.events.len()]);
        }
    }
}
