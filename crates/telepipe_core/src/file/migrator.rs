//! Moves or wipes pending data when the consent changes.

use super::fs;
use crate::batch::{batch_timestamp, METADATA_SUFFIX};
use crate::consent::TrackingConsent;
use crate::logger::{InternalLogger, LogLevel, LogTarget};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const MAX_ATTEMPTS: usize = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// What to do with stored data on a consent transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataMigration {
    /// Leave everything in place.
    NoOp,
    /// Delete a directory and its content.
    Wipe {
        /// Directory to delete.
        dir: PathBuf,
    },
    /// Move every file from one directory to another, keeping names. A
    /// batch whose name is taken moves under the next free timestamp.
    Move {
        /// Source directory.
        from: PathBuf,
        /// Destination directory.
        to: PathBuf,
    },
}

impl DataMigration {
    /// Decides the migration for `previous -> new`.
    ///
    /// `previous` is `None` at initialization.
    #[must_use]
    pub fn plan(
        previous: Option<TrackingConsent>,
        new: TrackingConsent,
        pending_dir: &Path,
        granted_dir: &Path,
    ) -> Self {
        use crate::consent::TrackingConsent::{Granted, NotGranted, Pending};

        match (previous, new) {
            (None, _) => Self::Wipe {
                dir: pending_dir.to_path_buf(),
            },
            (Some(Granted | NotGranted), Pending) => Self::Wipe {
                dir: pending_dir.to_path_buf(),
            },
            (Some(Pending), Granted) => Self::Move {
                from: pending_dir.to_path_buf(),
                to: granted_dir.to_path_buf(),
            },
            (Some(Pending), NotGranted) => Self::Wipe {
                dir: pending_dir.to_path_buf(),
            },
            _ => Self::NoOp,
        }
    }
}

/// Applies [`DataMigration`]s to the file system.
pub struct ConsentAwareFileMigrator {
    logger: Arc<dyn InternalLogger>,
}

impl ConsentAwareFileMigrator {
    /// Creates a migrator.
    pub fn new(logger: Arc<dyn InternalLogger>) -> Self {
        Self { logger }
    }

    /// Plans and applies the migration for `previous -> new`.
    ///
    /// Returns the migration that was applied.
    pub fn migrate(
        &self,
        previous: Option<TrackingConsent>,
        new: TrackingConsent,
        pending_dir: &Path,
        granted_dir: &Path,
    ) -> DataMigration {
        let migration = DataMigration::plan(previous, new, pending_dir, granted_dir);
        self.apply(&migration);
        migration
    }

    /// Applies a migration, retrying a few times on failure.
    pub fn apply(&self, migration: &DataMigration) -> bool {
        let description = match migration {
            DataMigration::NoOp => return true,
            DataMigration::Wipe { .. } => "wipe",
            DataMigration::Move { .. } => "move",
        };

        for attempt in 1..=MAX_ATTEMPTS {
            let done = match migration {
                DataMigration::NoOp => true,
                DataMigration::Wipe { dir } => fs::delete_dir_all(dir, self.logger.as_ref()),
                DataMigration::Move { from, to } => self.move_files(from, to),
            };
            if done {
                return true;
            }
            if attempt < MAX_ATTEMPTS {
                thread::sleep(RETRY_DELAY);
            }
        }
        self.logger.log(
            LogLevel::Error,
            &[LogTarget::Maintainer, LogTarget::Telemetry],
            &format!("Data migration ({description}) failed after {MAX_ATTEMPTS} attempts"),
            None,
        );
        false
    }

    fn move_files(&self, from: &Path, to: &Path) -> bool {
        let logger = self.logger.as_ref();
        if !fs::exists(from, logger) {
            return true;
        }
        if !fs::exists(to, logger) && !fs::make_dirs(to, logger) {
            return false;
        }

        let mut files = fs::list_files(from, logger);
        files.sort_by_key(|path| move_order(path));

        let mut all_moved = true;
        // Source and destination names of the last batch, for its sidecar.
        let mut last_batch: Option<(String, String)> = None;
        for file in files {
            let Some(name) = file.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
                continue;
            };
            let target_name = match name.strip_suffix(METADATA_SUFFIX) {
                Some(base) => match &last_batch {
                    Some((source, target)) if source == base => {
                        format!("{target}{METADATA_SUFFIX}")
                    }
                    _ => name.clone(),
                },
                None => {
                    let target = self.free_batch_name(&name, to);
                    last_batch = Some((name.clone(), target.clone()));
                    target
                }
            };

            let target = to.join(&target_name);
            if fs::exists(&target, logger) {
                logger.log(
                    LogLevel::Warn,
                    &[LogTarget::Maintainer],
                    &format!(
                        "Not moving {}: {} already exists",
                        file.display(),
                        target.display()
                    ),
                    None,
                );
                continue;
            }
            if target_name != name {
                logger.log(
                    LogLevel::Debug,
                    &[LogTarget::Maintainer],
                    &format!("Batch {name} moved as {target_name} to avoid a name clash"),
                    None,
                );
            }
            all_moved &= fs::rename(&file, &target, logger);
        }
        all_moved
    }

    /// `name`, or the next timestamp whose batch and sidecar are both free in
    /// `dir`. Names that are not timestamps are returned unchanged.
    fn free_batch_name(&self, name: &str, dir: &Path) -> String {
        let logger = self.logger.as_ref();
        let is_free = |candidate: &str| {
            !fs::exists(&dir.join(candidate), logger)
                && !fs::exists(&dir.join(format!("{candidate}{METADATA_SUFFIX}")), logger)
        };
        if is_free(name) {
            return name.to_string();
        }
        let Ok(timestamp) = name.parse::<u64>() else {
            return name.to_string();
        };
        (timestamp.saturating_add(1)..u64::MAX)
            .map(|candidate| candidate.to_string())
            .find(|candidate| is_free(candidate))
            .unwrap_or_else(|| name.to_string())
    }
}

/// Batches oldest first, each followed by its sidecar.
fn move_order(path: &Path) -> (u64, bool, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_suffix(METADATA_SUFFIX) {
        Some(base) => (base.parse().unwrap_or(u64::MAX), true, name.clone()),
        None => (
            batch_timestamp(path).unwrap_or(u64::MAX),
            false,
            name.clone(),
        ),
    }
}

impl std::fmt::Debug for ConsentAwareFileMigrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsentAwareFileMigrator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingLogger;
    use std::fs as stdfs;
    use tempfile::tempdir;
    use crate::consent::TrackingConsent::{Granted, NotGranted, Pending};

    fn dirs(root: &Path) -> (PathBuf, PathBuf) {
        (root.join("logs-pending-v2"), root.join("logs-v2"))
    }

    #[test]
    fn plan_covers_every_transition() {
        let (p, g) = (PathBuf::from("/p"), PathBuf::from("/g"));
        let wipe = DataMigration::Wipe { dir: p.clone() };
        let mv = DataMigration::Move {
            from: p.clone(),
            to: g.clone(),
        };

        assert_eq!(DataMigration::plan(None, Pending, &p, &g), wipe);
        assert_eq!(DataMigration::plan(None, Granted, &p, &g), wipe);
        assert_eq!(DataMigration::plan(None, NotGranted, &p, &g), wipe);
        assert_eq!(DataMigration::plan(Some(Granted), Pending, &p, &g), wipe);
        assert_eq!(DataMigration::plan(Some(NotGranted), Pending, &p, &g), wipe);
        assert_eq!(DataMigration::plan(Some(Pending), Granted, &p, &g), mv);
        assert_eq!(DataMigration::plan(Some(Pending), NotGranted, &p, &g), wipe);
        assert_eq!(
            DataMigration::plan(Some(Granted), NotGranted, &p, &g),
            DataMigration::NoOp
        );
        assert_eq!(
            DataMigration::plan(Some(NotGranted), Granted, &p, &g),
            DataMigration::NoOp
        );
        assert_eq!(
            DataMigration::plan(Some(Granted), Granted, &p, &g),
            DataMigration::NoOp
        );
    }

    #[test]
    fn move_preserves_names_and_sidecars() {
        let root = tempdir().unwrap();
        let (pending, granted) = dirs(root.path());
        stdfs::create_dir_all(&pending).unwrap();
        for name in ["1000", "1000_metadata", "2000", "900"] {
            stdfs::write(pending.join(name), name.as_bytes()).unwrap();
        }

        let migrator = ConsentAwareFileMigrator::new(Arc::new(RecordingLogger::default()));
        migrator.migrate(Some(Pending), Granted, &pending, &granted);

        for name in ["1000", "1000_metadata", "2000", "900"] {
            assert_eq!(stdfs::read(granted.join(name)).unwrap(), name.as_bytes());
            assert!(!pending.join(name).exists());
        }
    }

    #[test]
    fn move_never_replaces_granted_batches() {
        let root = tempdir().unwrap();
        let (pending, granted) = dirs(root.path());
        stdfs::create_dir_all(&pending).unwrap();
        stdfs::create_dir_all(&granted).unwrap();
        stdfs::write(granted.join("1000"), b"granted").unwrap();
        stdfs::write(pending.join("1000"), b"pending-1000").unwrap();
        stdfs::write(pending.join("1000_metadata"), b"meta-1000").unwrap();
        stdfs::write(pending.join("1001"), b"pending-1001").unwrap();

        let migrator = ConsentAwareFileMigrator::new(Arc::new(RecordingLogger::default()));
        migrator.migrate(Some(Pending), Granted, &pending, &granted);

        assert_eq!(stdfs::read(granted.join("1000")).unwrap(), b"granted");
        assert_eq!(stdfs::read(granted.join("1001")).unwrap(), b"pending-1000");
        assert_eq!(
            stdfs::read(granted.join("1001_metadata")).unwrap(),
            b"meta-1000"
        );
        assert_eq!(stdfs::read(granted.join("1002")).unwrap(), b"pending-1001");
        assert!(!granted.join("1000_metadata").exists());
    }

    #[test]
    fn move_order_is_oldest_first() {
        let mut files = vec![
            PathBuf::from("/p/2000"),
            PathBuf::from("/p/1000_metadata"),
            PathBuf::from("/p/1000"),
            PathBuf::from("/p/900"),
        ];
        files.sort_by_key(|p| move_order(p));
        assert_eq!(
            files,
            vec![
                PathBuf::from("/p/900"),
                PathBuf::from("/p/1000"),
                PathBuf::from("/p/1000_metadata"),
                PathBuf::from("/p/2000"),
            ]
        );
    }

    #[test]
    fn wipe_removes_pending_only() {
        let root = tempdir().unwrap();
        let (pending, granted) = dirs(root.path());
        stdfs::create_dir_all(&pending).unwrap();
        stdfs::create_dir_all(&granted).unwrap();
        stdfs::write(pending.join("1000"), b"p").unwrap();
        stdfs::write(granted.join("1000"), b"g").unwrap();

        let migrator = ConsentAwareFileMigrator::new(Arc::new(RecordingLogger::default()));
        migrator.migrate(Some(Pending), NotGranted, &pending, &granted);

        assert!(!pending.exists());
        assert!(granted.join("1000").exists());
    }

    #[test]
    fn moving_missing_directory_is_a_no_op() {
        let root = tempdir().unwrap();
        let (pending, granted) = dirs(root.path());
        let migrator = ConsentAwareFileMigrator::new(Arc::new(RecordingLogger::default()));
        assert!(migrator.apply(&DataMigration::Move {
            from: pending,
            to: granted.clone()
        }));
        assert!(!granted.exists());
    }
}
