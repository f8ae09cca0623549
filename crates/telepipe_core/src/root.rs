//! Storage root directory and process ownership.
//!
//! ```text
//! <root>/
//! ├─ .lock                  # Advisory lock held by the owning process
//! ├─ <feature>-pending-v2/
//! ├─ <feature>-v2/
//! └─ <feature>/datastore_v0/
//! ```
//!
//! Several processes of the same application may share a root (for example
//! a main process and a background service). Only the one holding the lock
//! uploads; the others still persist their events.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Lock file name.
const LOCK_FILE: &str = ".lock";

/// An opened storage root.
///
/// Holds the exclusive lock for as long as it lives, if it obtained it.
#[derive(Debug)]
pub struct StorageRoot {
    path: PathBuf,
    lock: Option<File>,
}

impl StorageRoot {
    /// Opens `path`, creating it if needed, and tries to take ownership.
    ///
    /// Failing to take the lock is not an error: the root opens as
    /// secondary, see [`is_owner`](Self::is_owner).
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not a directory or cannot be created.
    pub fn open(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_root(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        let lock = lock_file.try_lock_exclusive().ok().map(|()| lock_file);

        Ok(Self {
            path: path.to_path_buf(),
            lock,
        })
    }

    /// Root directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if this process owns the root and may upload.
    #[must_use]
    pub fn is_owner(&self) -> bool {
        self.lock.is_some()
    }
}

impl Drop for StorageRoot {
    fn drop(&mut self) {
        if let Some(lock) = &self.lock {
            let _ = lock.unlock();
        }
    }
}
