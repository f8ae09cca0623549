//! CLI command implementations.

pub mod datastore;
pub mod dump;
pub mod inspect;
pub mod verify;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use telepipe_core::{batch_timestamp, granted_dir_name, pending_dir_name, DATASTORE_DIR};
use telepipe_storage::{
    AesGcmEncryption, BatchFileReaderWriter, EncryptedBatchFileReaderWriter,
    EncryptedFileReaderWriter, Encryption, EncryptionKey, FileReader, PlainBatchFileReaderWriter,
    PlainFileReaderWriter,
};
use thiserror::Error;

/// Errors reported by the commands themselves.
#[derive(Error, Debug)]
pub enum CliError {
    /// The path holds no Telepipe data.
    #[error("no Telepipe storage found at {0}")]
    NoStorage(PathBuf),

    /// The feature has no directory under the root.
    #[error("unknown feature: {0}")]
    UnknownFeature(String),

    /// The key file does not hold a usable key.
    #[error("invalid key file {path}: {reason}")]
    InvalidKey {
        /// Key file path.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },

    /// Some files are damaged.
    #[error("verification failed: {0} damaged files")]
    Damaged(usize),
}

/// Reads the key used to decrypt encrypted features.
pub fn load_encryption(
    key_file: Option<&Path>,
) -> Result<Option<Arc<dyn Encryption>>, Box<dyn std::error::Error>> {
    let Some(path) = key_file else {
        return Ok(None);
    };
    let bytes = std::fs::read(path)?;
    let key = EncryptionKey::from_bytes(&bytes).map_err(|e| CliError::InvalidKey {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(Some(Arc::new(AesGcmEncryption::new(&key))))
}

/// Batch reader matching the feature's encryption.
pub fn batch_reader(encryption: Option<Arc<dyn Encryption>>) -> Box<dyn BatchFileReaderWriter> {
    match encryption {
        Some(encryption) => Box::new(EncryptedBatchFileReaderWriter::new(
            PlainBatchFileReaderWriter::new(),
            encryption,
        )),
        None => Box::new(PlainBatchFileReaderWriter::new()),
    }
}

/// Whole-file reader matching the feature's encryption.
pub fn file_reader(encryption: Option<Arc<dyn Encryption>>) -> Box<dyn FileReader> {
    match encryption {
        Some(encryption) => Box::new(EncryptedFileReaderWriter::new(
            PlainFileReaderWriter::new(),
            encryption,
        )),
        None => Box::new(PlainFileReaderWriter::new()),
    }
}

/// Names of every feature with data under `root`, sorted.
///
/// A feature shows up through its batch directories or its datastore.
pub fn feature_names(root: &Path) -> Vec<String> {
    let mut names = BTreeSet::new();
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(feature) = name.strip_suffix("-pending-v2") {
            names.insert(feature.to_string());
        } else if let Some(feature) = name.strip_suffix("-v2") {
            names.insert(feature.to_string());
        } else if path.join(DATASTORE_DIR).is_dir() {
            names.insert(name);
        }
    }
    names.into_iter().collect()
}

/// Batch directory of `feature`.
pub fn batch_dir(root: &Path, feature: &str, pending: bool) -> PathBuf {
    if pending {
        root.join(pending_dir_name(feature))
    } else {
        root.join(granted_dir_name(feature))
    }
}

/// Batch files of `dir` with their timestamps, oldest first.
///
/// Metadata sidecars and stray files are left out.
pub fn batch_files(dir: &Path) -> Vec<(u64, PathBuf)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<(u64, PathBuf)> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter_map(|p| batch_timestamp(&p).map(|ts| (ts, p)))
        .collect();
    files.sort();
    files
}

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Payload bytes as text if they are UTF-8, as a byte count otherwise.
pub fn display_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<{} binary bytes>", bytes.len()),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use telepipe_storage::{BatchFileReaderWriter, PlainBatchFileReaderWriter, RawBatchEvent};

    /// Writes `payloads` as one batch file.
    pub fn write_batch(file: &Path, payloads: &[&[u8]]) {
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        let writer = PlainBatchFileReaderWriter::new();
        for payload in payloads {
            writer
                .write_event(file, &RawBatchEvent::new(payload.to_vec()), true)
                .unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::write_batch;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn features_are_found_by_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("logs-v2")).unwrap();
        std::fs::create_dir_all(dir.path().join("rum-pending-v2")).unwrap();
        std::fs::create_dir_all(dir.path().join("session").join(DATASTORE_DIR)).unwrap();
        std::fs::create_dir_all(dir.path().join("unrelated")).unwrap();

        assert_eq!(feature_names(dir.path()), vec!["logs", "rum", "session"]);
    }

    #[test]
    fn batch_files_skip_sidecars() {
        let dir = TempDir::new().unwrap();
        write_batch(&dir.path().join("2000"), &[b"b"]);
        write_batch(&dir.path().join("1000"), &[b"a"]);
        std::fs::write(dir.path().join("1000_metadata"), b"meta").unwrap();

        let files = batch_files(dir.path());
        let stamps: Vec<u64> = files.iter().map(|(ts, _)| *ts).collect();
        assert_eq!(stamps, vec![1000, 2000]);
    }

    #[test]
    fn sizes_are_readable() {
        assert_eq!(format_size(12), "12 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn short_key_files_are_rejected() {
        let dir = TempDir::new().unwrap();
        let key = dir.path().join("key");
        std::fs::write(&key, [0u8; 5]).unwrap();

        assert!(load_encryption(Some(&key)).is_err());
        assert!(load_encryption(None).unwrap().is_none());

        std::fs::write(&key, [7u8; 32]).unwrap();
        assert!(load_encryption(Some(&key)).unwrap().is_some());
    }
}
