//! Tracking consent and change notification.

use parking_lot::RwLock;
use std::sync::Arc;

/// The user's permission state for data collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TrackingConsent {
    /// No decision yet. Data is kept aside until one is made.
    #[default]
    Pending,
    /// Data may be collected and uploaded.
    Granted,
    /// Data must not be collected.
    NotGranted,
}

impl TrackingConsent {
    /// Returns true if events should be accepted at all.
    #[must_use]
    pub const fn accepts_writes(self) -> bool {
        !matches!(self, Self::NotGranted)
    }
}

/// Notified after the consent changes.
pub trait ConsentListener: Send + Sync {
    /// Called once per effective change, outside any lock.
    fn on_consent_updated(&self, previous: TrackingConsent, new: TrackingConsent);
}

/// Holds the current consent and fans out changes.
#[derive(Default)]
pub struct ConsentProvider {
    consent: RwLock<TrackingConsent>,
    listeners: RwLock<Vec<Arc<dyn ConsentListener>>>,
}

impl ConsentProvider {
    /// Creates a provider starting at `initial`.
    #[must_use]
    pub fn new(initial: TrackingConsent) -> Self {
        Self {
            consent: RwLock::new(initial),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Current consent.
    #[must_use]
    pub fn consent(&self) -> TrackingConsent {
        *self.consent.read()
    }

    /// Changes the consent and notifies listeners if it actually changed.
    ///
    /// Returns the previous value.
    pub fn set_consent(&self, new: TrackingConsent) -> TrackingConsent {
        let previous = std::mem::replace(&mut *self.consent.write(), new);
        if previous != new {
            let listeners = self.listeners.read().clone();
            for listener in listeners {
                listener.on_consent_updated(previous, new);
            }
        }
        previous
    }

    /// Registers a listener for future changes.
    pub fn register(&self, listener: Arc<dyn ConsentListener>) {
        self.listeners.write().push(listener);
    }

    /// Removes every listener.
    pub fn unregister_all(&self) {
        self.listeners.write().clear();
    }
}

impl std::fmt::Debug for ConsentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsentProvider")
            .field("consent", &self.consent())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}
