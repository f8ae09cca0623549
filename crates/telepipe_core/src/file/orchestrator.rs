//! Batch file selection, rotation and cleanup for one directory.

use super::{fs, FileOrchestrator};
use crate::batch::{batch_timestamp, METADATA_SUFFIX};
use crate::config::FilePersistenceConfig;
use crate::logger::{InternalLogger, LogLevel, LogTarget};
use crate::time::TimeProvider;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Default)]
struct WriteState {
    previous_file: Option<PathBuf>,
    previous_item_count: usize,
    last_cleanup_ms: Option<u64>,
}

/// Owns the batch files of a single directory.
///
/// Batch files are named by their creation time in epoch milliseconds. Names
/// are strictly increasing within the directory. At most one file is open for
/// writing: the newest one, and only while it is recent, small enough and
/// below the item limit.
pub struct BatchFileOrchestrator {
    root: PathBuf,
    config: FilePersistenceConfig,
    logger: Arc<dyn InternalLogger>,
    time: Arc<dyn TimeProvider>,
    state: Mutex<WriteState>,
}

impl BatchFileOrchestrator {
    /// Creates an orchestrator for `root`. The directory is created lazily.
    pub fn new(
        root: impl Into<PathBuf>,
        config: FilePersistenceConfig,
        logger: Arc<dyn InternalLogger>,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            root: root.into(),
            config,
            logger,
            time,
            state: Mutex::new(WriteState::default()),
        }
    }

    /// The persistence limits in use.
    #[must_use]
    pub fn config(&self) -> &FilePersistenceConfig {
        &self.config
    }

    /// Deletes expired batches, then the oldest ones until the directory
    /// fits in `max_disk_space`.
    pub fn purge_stale_and_over_quota(&self) {
        let now = self.time.now_ms();
        let mut state = self.state.lock();
        self.cleanup(now);
        state.last_cleanup_ms = Some(now);
    }

    fn cleanup(&self, now: u64) {
        self.delete_obsolete_files(now);
        self.free_space_if_needed();
    }

    fn is_root_valid(&self) -> bool {
        let logger = self.logger.as_ref();
        if fs::exists(&self.root, logger) {
            if !self.root.is_dir() {
                self.log_root_error("is not a directory");
                false
            } else if !fs::is_writable(&self.root) {
                self.log_root_error("is not writable");
                false
            } else {
                true
            }
        } else if fs::make_dirs(&self.root, logger) {
            true
        } else {
            self.log_root_error("can't be created");
            false
        }
    }

    fn log_root_error(&self, problem: &str) {
        self.logger.log(
            LogLevel::Error,
            &[LogTarget::Maintainer, LogTarget::Telemetry],
            &format!("The provided root dir {problem}: {}", self.root.display()),
            None,
        );
    }

    fn list_batch_files(&self) -> Vec<(u64, PathBuf)> {
        let mut files: Vec<(u64, PathBuf)> = fs::list_files(&self.root, self.logger.as_ref())
            .into_iter()
            .filter_map(|path| batch_timestamp(&path).map(|ts| (ts, path)))
            .collect();
        files.sort_by_key(|(ts, _)| *ts);
        files
    }

    fn metadata_path(&self, batch: &Path) -> Option<PathBuf> {
        let name = batch.file_name()?.to_str()?;
        Some(self.root.join(format!("{name}{METADATA_SUFFIX}")))
    }

    fn delete_batch(&self, batch: &Path) -> u64 {
        let logger = self.logger.as_ref();
        let mut freed = fs::len(batch, logger);
        fs::delete(batch, logger);
        if let Some(meta) = self.metadata_path(batch) {
            if fs::exists(&meta, logger) {
                freed += fs::len(&meta, logger);
                fs::delete(&meta, logger);
            }
        }
        freed
    }

    fn delete_obsolete_files(&self, now: u64) {
        let threshold = now.saturating_sub(self.config.old_file_threshold.as_millis() as u64);
        let obsolete: Vec<PathBuf> = self
            .list_batch_files()
            .into_iter()
            .filter(|(ts, _)| *ts < threshold)
            .map(|(_, path)| path)
            .collect();
        for batch in &obsolete {
            self.delete_batch(batch);
        }
        if !obsolete.is_empty() {
            self.logger.log(
                LogLevel::Debug,
                &[LogTarget::Maintainer],
                &format!(
                    "Deleted {} obsolete batches from {}",
                    obsolete.len(),
                    self.root.display()
                ),
                None,
            );
        }
    }

    fn free_space_if_needed(&self) {
        let logger = self.logger.as_ref();
        let files = self.list_batch_files();
        let size_on_disk: u64 = files
            .iter()
            .map(|(_, path)| {
                let meta = self
                    .metadata_path(path)
                    .map(|m| fs::len(&m, logger))
                    .unwrap_or(0);
                fs::len(path, logger) + meta
            })
            .sum();
        let max = self.config.max_disk_space;
        if size_on_disk <= max {
            return;
        }

        let mut to_free = size_on_disk - max;
        self.logger.log(
            LogLevel::Error,
            &[LogTarget::Maintainer, LogTarget::Telemetry],
            &format!(
                "Too much disk space used ({size_on_disk}/{max}): cleaning up to free {to_free} bytes"
            ),
            None,
        );
        for (_, batch) in files {
            if to_free == 0 {
                break;
            }
            to_free = to_free.saturating_sub(self.delete_batch(&batch));
        }
    }

    fn is_recent(&self, ts: u64, now: u64, delay_ms: u64) -> bool {
        now.saturating_sub(ts) < delay_ms
    }

    fn reusable_file(
        &self,
        state: &WriteState,
        files: &[(u64, PathBuf)],
        intended_size: u64,
        now: u64,
    ) -> Option<PathBuf> {
        let previous = state.previous_file.as_ref()?;
        let (ts, newest) = files.last()?;
        if previous != newest {
            return None;
        }
        let fresh = self.is_recent(*ts, now, self.config.recent_write_delay_ms());
        let has_room =
            fs::len(newest, self.logger.as_ref()) + intended_size <= self.config.max_batch_size;
        let below_item_limit = state.previous_item_count < self.config.max_items_per_batch;
        (fresh && has_room && below_item_limit).then(|| newest.clone())
    }
}

impl FileOrchestrator for BatchFileOrchestrator {
    fn get_writable_file(&self, intended_size: u64) -> Option<PathBuf> {
        if !self.is_root_valid() {
            return None;
        }
        let now = self.time.now_ms();
        let mut state = self.state.lock();

        let cleanup_due = state.last_cleanup_ms.map_or(true, |last| {
            now.saturating_sub(last) > self.config.cleanup_frequency.as_millis() as u64
        });
        if cleanup_due {
            self.cleanup(now);
            state.last_cleanup_ms = Some(now);
        }

        let files = self.list_batch_files();
        if let Some(file) = self.reusable_file(&state, &files, intended_size, now) {
            state.previous_item_count += 1;
            return Some(file);
        }

        let name = files
            .last()
            .map_or(now, |(newest, _)| now.max(newest.saturating_add(1)));
        let file = self.root.join(name.to_string());
        state.previous_file = Some(file.clone());
        state.previous_item_count = 1;
        Some(file)
    }

    fn current_writable_file(&self) -> Option<PathBuf> {
        let now = self.time.now_ms();
        let state = self.state.lock();
        let files = self.list_batch_files();
        let (ts, newest) = files.last()?;
        let fresh = self.is_recent(*ts, now, self.config.recent_write_delay_ms());
        (state.previous_file.as_ref() == Some(newest) && fresh).then(|| newest.clone())
    }

    fn get_readable_files(&self, exclude: &HashSet<PathBuf>) -> Vec<PathBuf> {
        if !self.is_root_valid() {
            return Vec::new();
        }
        let now = self.time.now_ms();
        self.delete_obsolete_files(now);
        let read_delay = self.config.recent_read_delay_ms();
        self.list_batch_files()
            .into_iter()
            .filter(|(ts, path)| !exclude.contains(path) && !self.is_recent(*ts, now, read_delay))
            .map(|(_, path)| path)
            .collect()
    }

    fn get_all_files(&self) -> Vec<PathBuf> {
        if !self.is_root_valid() {
            return Vec::new();
        }
        self.list_batch_files()
            .into_iter()
            .map(|(_, path)| path)
            .collect()
    }

    fn get_metadata_file(&self, batch: &Path) -> Option<PathBuf> {
        if batch.parent() != Some(self.root.as_path()) {
            self.logger.log(
                LogLevel::Debug,
                &[LogTarget::Maintainer],
                &format!(
                    "{} is not a batch of {}",
                    batch.display(),
                    self.root.display()
                ),
                None,
            );
            return None;
        }
        self.metadata_path(batch)
    }

    fn root_dir(&self) -> Option<PathBuf> {
        Some(self.root.clone())
    }
}

impl std::fmt::Debug for BatchFileOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchFileOrchestrator")
            .field("root", &self.root)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
