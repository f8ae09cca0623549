//! File system operations that log failures instead of returning them.
//!
//! Batch persistence degrades rather than fails: a file that cannot be
//! listed, sized or deleted is reported to maintainers and treated as absent.

use crate::logger::{InternalLogger, LogLevel, LogTarget};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

fn report(logger: &dyn InternalLogger, action: &str, path: &Path, error: &io::Error) {
    logger.log(
        LogLevel::Error,
        &[LogTarget::Maintainer, LogTarget::Telemetry],
        &format!("Unable to {action} {}", path.display()),
        Some(error),
    );
}

/// Returns true if `path` exists.
pub fn exists(path: &Path, logger: &dyn InternalLogger) -> bool {
    match path.try_exists() {
        Ok(exists) => exists,
        Err(e) => {
            report(logger, "check existence of", path, &e);
            false
        }
    }
}

/// Size of `path` in bytes, 0 if unknown.
pub fn len(path: &Path, logger: &dyn InternalLogger) -> u64 {
    match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
        Err(e) => {
            report(logger, "read size of", path, &e);
            0
        }
    }
}

/// Regular files directly inside `dir`.
pub fn list_files(dir: &Path, logger: &dyn InternalLogger) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            report(logger, "list", dir, &e);
            return Vec::new();
        }
    };
    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect()
}

/// Deletes a file. Returns true if it is gone afterwards.
pub fn delete(path: &Path, logger: &dyn InternalLogger) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            report(logger, "delete", path, &e);
            false
        }
    }
}

/// Deletes a directory and everything in it.
pub fn delete_dir_all(path: &Path, logger: &dyn InternalLogger) -> bool {
    match fs::remove_dir_all(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            report(logger, "delete directory", path, &e);
            false
        }
    }
}

/// Creates `dir` and its parents.
pub fn make_dirs(dir: &Path, logger: &dyn InternalLogger) -> bool {
    match fs::create_dir_all(dir) {
        Ok(()) => true,
        Err(e) => {
            report(logger, "create directory", dir, &e);
            false
        }
    }
}

/// Moves `from` to `to`.
pub fn rename(from: &Path, to: &Path, logger: &dyn InternalLogger) -> bool {
    match fs::rename(from, to) {
        Ok(()) => true,
        Err(e) => {
            report(logger, "move", from, &e);
            false
        }
    }
}

/// Returns true if files can be created in `dir`.
pub fn is_writable(dir: &Path) -> bool {
    fs::metadata(dir)
        .map(|meta| !meta.permissions().readonly())
        .unwrap_or(false)
}

/// Returns true if `name` is usable as a single path component.
///
/// Accepts ASCII letters, digits, `-`, `_` and `.`, not starting with `.`.
#[must_use]
pub fn is_valid_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}
