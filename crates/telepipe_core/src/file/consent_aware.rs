//! Routes batch files by tracking consent.

use super::{BatchFileOrchestrator, ConsentAwareFileMigrator, DataMigration, FileOrchestrator};
use crate::consent::TrackingConsent;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Sends writes to the pending or granted directory depending on consent.
///
/// Only granted batches are ever readable. The consent seen here changes
/// only through [`on_consent_updated`](Self::on_consent_updated), which runs
/// on the persistence executor, so a write never races a migration.
pub struct ConsentAwareFileOrchestrator {
    pending: BatchFileOrchestrator,
    granted: BatchFileOrchestrator,
    migrator: ConsentAwareFileMigrator,
    consent: RwLock<Option<TrackingConsent>>,
}

impl ConsentAwareFileOrchestrator {
    /// Creates an orchestrator with no consent applied yet.
    ///
    /// Until the first [`on_consent_updated`](Self::on_consent_updated), writes
    /// go to the pending directory.
    pub fn new(
        pending: BatchFileOrchestrator,
        granted: BatchFileOrchestrator,
        migrator: ConsentAwareFileMigrator,
    ) -> Self {
        Self {
            pending,
            granted,
            migrator,
            consent: RwLock::new(None),
        }
    }

    /// Applies a consent change and migrates data accordingly.
    ///
    /// The first call wipes the pending directory. Repeating the current
    /// consent does nothing.
    pub fn on_consent_updated(&self, new: TrackingConsent) -> DataMigration {
        let mut consent = self.consent.write();
        let previous = *consent;
        if previous == Some(new) {
            return DataMigration::NoOp;
        }
        let migration = self
            .migrator
            .migrate(previous, new, &self.pending_dir(), &self.granted_dir());
        *consent = Some(new);
        migration
    }

    /// Consent currently applied.
    #[must_use]
    pub fn consent(&self) -> Option<TrackingConsent> {
        *self.consent.read()
    }

    /// Orchestrator of the pending directory.
    #[must_use]
    pub fn pending(&self) -> &BatchFileOrchestrator {
        &self.pending
    }

    /// Orchestrator of the granted directory.
    #[must_use]
    pub fn granted(&self) -> &BatchFileOrchestrator {
        &self.granted
    }

    /// Orchestrator for writes that were accepted under `accepted`.
    ///
    /// Consent changes overtake queued writes, so a write is routed by the
    /// consent it was accepted with and by the consent applied now:
    ///
    /// - accepted while granted: granted directory, whatever happened since
    /// - accepted while pending: wherever the pending data lives now, i.e.
    ///   pending, granted once migrated, or nowhere once refused
    #[must_use]
    pub fn routed(self: &Arc<Self>, accepted: TrackingConsent) -> RoutedFileOrchestrator {
        RoutedFileOrchestrator {
            inner: Arc::clone(self),
            accepted,
        }
    }

    fn pending_dir(&self) -> PathBuf {
        self.pending.root_dir().unwrap_or_default()
    }

    fn granted_dir(&self) -> PathBuf {
        self.granted.root_dir().unwrap_or_default()
    }

    fn writable_delegate(&self) -> Option<&BatchFileOrchestrator> {
        match *self.consent.read() {
            None | Some(TrackingConsent::Pending) => Some(&self.pending),
            Some(TrackingConsent::Granted) => Some(&self.granted),
            Some(TrackingConsent::NotGranted) => None,
        }
    }

    fn delegate_for(&self, accepted: TrackingConsent) -> Option<&BatchFileOrchestrator> {
        match accepted {
            TrackingConsent::Granted => Some(&self.granted),
            TrackingConsent::Pending => self.writable_delegate(),
            TrackingConsent::NotGranted => None,
        }
    }
}

impl FileOrchestrator for ConsentAwareFileOrchestrator {
    fn get_writable_file(&self, intended_size: u64) -> Option<PathBuf> {
        self.writable_delegate()?.get_writable_file(intended_size)
    }

    fn current_writable_file(&self) -> Option<PathBuf> {
        self.writable_delegate()?.current_writable_file()
    }

    fn get_readable_files(&self, exclude: &HashSet<PathBuf>) -> Vec<PathBuf> {
        self.granted.get_readable_files(exclude)
    }

    fn get_all_files(&self) -> Vec<PathBuf> {
        let mut files = self.pending.get_all_files();
        files.extend(self.granted.get_all_files());
        files
    }

    fn get_metadata_file(&self, batch: &Path) -> Option<PathBuf> {
        if batch.parent() == self.pending.root_dir().as_deref() {
            self.pending.get_metadata_file(batch)
        } else {
            self.granted.get_metadata_file(batch)
        }
    }

    fn root_dir(&self) -> Option<PathBuf> {
        None
    }
}

/// A [`ConsentAwareFileOrchestrator`] seen by one accepted write.
///
/// Created by [`ConsentAwareFileOrchestrator::routed`].
#[derive(Debug, Clone)]
pub struct RoutedFileOrchestrator {
    inner: Arc<ConsentAwareFileOrchestrator>,
    accepted: TrackingConsent,
}

impl FileOrchestrator for RoutedFileOrchestrator {
    fn get_writable_file(&self, intended_size: u64) -> Option<PathBuf> {
        self.inner
            .delegate_for(self.accepted)?
            .get_writable_file(intended_size)
    }

    fn current_writable_file(&self) -> Option<PathBuf> {
        self.inner
            .delegate_for(self.accepted)?
            .current_writable_file()
    }

    fn get_readable_files(&self, exclude: &HashSet<PathBuf>) -> Vec<PathBuf> {
        self.inner.get_readable_files(exclude)
    }

    fn get_all_files(&self) -> Vec<PathBuf> {
        self.inner.get_all_files()
    }

    fn get_metadata_file(&self, batch: &Path) -> Option<PathBuf> {
        self.inner.get_metadata_file(batch)
    }

    fn root_dir(&self) -> Option<PathBuf> {
        None
    }
}

impl std::fmt::Debug for ConsentAwareFileOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsentAwareFileOrchestrator")
            .field("pending", &self.pending)
            .field("granted", &self.granted)
            .field("consent", &self.consent())
            .finish()
    }
}
