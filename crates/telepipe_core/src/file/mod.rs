//! Batch file management.
//!
//! ```text
//! <root>/
//! ├─ <feature>-pending-v2/   # written while consent is pending
//! │  ├─ 1700000000000
//! │  └─ 1700000000000_metadata
//! └─ <feature>-v2/           # written while consent is granted; uploaded
//!    └─ 1700000000250
//! ```

mod consent_aware;
pub mod fs;
mod migrator;
mod orchestrator;

pub use consent_aware::{ConsentAwareFileOrchestrator, RoutedFileOrchestrator};
pub use migrator::{ConsentAwareFileMigrator, DataMigration};
pub use orchestrator::BatchFileOrchestrator;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Chooses which files events go to and which batches are ready to read.
pub trait FileOrchestrator: Send + Sync {
    /// Returns the file the next event of `intended_size` bytes goes to.
    ///
    /// `None` means the event must not be written.
    fn get_writable_file(&self, intended_size: u64) -> Option<PathBuf>;

    /// The batch currently open for writing, without opening a new one.
    fn current_writable_file(&self) -> Option<PathBuf>;

    /// Batches ready for upload, oldest first.
    fn get_readable_files(&self, exclude: &HashSet<PathBuf>) -> Vec<PathBuf>;

    /// The oldest batch ready for upload.
    fn get_readable_file(&self, exclude: &HashSet<PathBuf>) -> Option<PathBuf> {
        self.get_readable_files(exclude).into_iter().next()
    }

    /// Every batch, oldest first.
    fn get_all_files(&self) -> Vec<PathBuf>;

    /// Sidecar path of `batch`.
    fn get_metadata_file(&self, batch: &Path) -> Option<PathBuf>;

    /// Directory holding the batches, if there is a single one.
    fn root_dir(&self) -> Option<PathBuf>;
}
