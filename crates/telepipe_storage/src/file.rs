//! Whole-file byte readers and writers.

use crate::error::StorageResult;
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Reads a file as one byte buffer.
pub trait FileReader: Send + Sync {
    /// Reads the whole file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or unreadable.
    fn read_data(&self, file: &Path) -> StorageResult<Vec<u8>>;
}

/// Writes a byte buffer to a file.
pub trait FileWriter: Send + Sync {
    /// Writes `data` to `file`, appending or replacing the content.
    ///
    /// The file is created if it does not exist.
    fn write_data(&self, file: &Path, data: &[u8], append: bool) -> StorageResult<()>;
}

/// Both halves of plain file access.
pub trait FileReaderWriter: FileReader + FileWriter {}

impl<T: FileReader + FileWriter> FileReaderWriter for T {}

/// Reads and writes file content as-is.
///
/// Writes hold an exclusive advisory lock on the file for their duration so
/// another process sharing the directory never observes a partial write.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainFileReaderWriter;

impl PlainFileReaderWriter {
    /// Creates a new plain reader/writer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl FileReader for PlainFileReaderWriter {
    fn read_data(&self, file: &Path) -> StorageResult<Vec<u8>> {
        Ok(fs::read(file)?)
    }
}

impl FileWriter for PlainFileReaderWriter {
    fn write_data(&self, file: &Path, data: &[u8], append: bool) -> StorageResult<()> {
        write_locked(file, data, append)
    }
}

/// Writes `data` under an exclusive lock on `file`.
pub(crate) fn write_locked(file: &Path, data: &[u8], append: bool) -> StorageResult<()> {
    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    let mut handle = options.open(file)?;
    handle.lock_exclusive()?;
    let result = handle.write_all(data).and_then(|()| handle.flush());
    let unlock = FileExt::unlock(&handle);
    result?;
    unlock?;
    Ok(())
}
