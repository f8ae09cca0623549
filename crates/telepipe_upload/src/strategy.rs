//! Delay between two upload cycles.

use crate::error::UploadError;
use parking_lot::Mutex;
use std::collections::HashMap;
use telepipe_core::UploadFrequency;

/// Decides how long a feature waits before its next upload cycle.
pub trait UploadSchedulerStrategy: Send + Sync {
    /// Returns the delay, in milliseconds, before the next cycle of `feature`.
    ///
    /// `upload_attempts` counts the requests sent during the cycle that just
    /// ended; `last_status_code` and `error` describe the last one.
    fn get_ms_delay_until_next_upload(
        &self,
        feature: &str,
        upload_attempts: usize,
        last_status_code: Option<u16>,
        error: Option<&UploadError>,
    ) -> u64;

    /// Returns the delay before the first cycle of `feature`.
    fn initial_delay_ms(&self, feature: &str) -> u64;
}

/// Step applied on each change, as a fraction of the current delay.
const DELAY_CHANGE_FACTOR: f64 = 0.1;

/// Keeps one delay per feature between `base` and `base × 10`.
///
/// - a cycle with nothing sent, or a failed upload, lengthens the delay
/// - a successful upload shortens it, dropping straight back to the default
///   if it had grown past it
/// - a failure to reach the server jumps to the longest delay
#[derive(Debug)]
pub struct DefaultUploadSchedulerStrategy {
    min_delay_ms: u64,
    default_delay_ms: u64,
    max_delay_ms: u64,
    delays: Mutex<HashMap<String, u64>>,
}

impl DefaultUploadSchedulerStrategy {
    /// Creates a strategy for the given upload frequency.
    pub fn new(frequency: UploadFrequency) -> Self {
        let base = frequency.base_step_ms();
        Self {
            min_delay_ms: base,
            default_delay_ms: base * 5,
            max_delay_ms: base * 10,
            delays: Mutex::new(HashMap::new()),
        }
    }

    /// Shortest delay ever returned.
    pub fn min_delay_ms(&self) -> u64 {
        self.min_delay_ms
    }

    /// Starting delay.
    pub fn default_delay_ms(&self) -> u64 {
        self.default_delay_ms
    }

    /// Longest delay ever returned.
    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    fn increase(&self, current: u64) -> u64 {
        let grown = (current as f64 * (1.0 + DELAY_CHANGE_FACTOR)).round() as u64;
        grown.min(self.max_delay_ms)
    }

    fn decrease(&self, current: u64) -> u64 {
        if current > self.default_delay_ms {
            return self.default_delay_ms;
        }
        let shrunk = (current as f64 * (1.0 - DELAY_CHANGE_FACTOR)).round() as u64;
        shrunk.max(self.min_delay_ms)
    }
}

impl UploadSchedulerStrategy for DefaultUploadSchedulerStrategy {
    fn get_ms_delay_until_next_upload(
        &self,
        feature: &str,
        upload_attempts: usize,
        last_status_code: Option<u16>,
        error: Option<&UploadError>,
    ) -> u64 {
        let mut delays = self.delays.lock();
        let current = delays
            .get(feature)
            .copied()
            .unwrap_or(self.default_delay_ms);

        let succeeded = upload_attempts > 0
            && error.is_none()
            && last_status_code.is_some_and(|code| (200..300).contains(&code));
        let next = if error.is_some_and(UploadError::is_network) {
            self.max_delay_ms
        } else if succeeded {
            self.decrease(current)
        } else {
            self.increase(current)
        };

        let next = next.clamp(self.min_delay_ms, self.max_delay_ms);
        delays.insert(feature.to_string(), next);
        next
    }

    fn initial_delay_ms(&self, feature: &str) -> u64 {
        self.delays
            .lock()
            .get(feature)
            .copied()
            .unwrap_or(self.default_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn average() -> DefaultUploadSchedulerStrategy {
        DefaultUploadSchedulerStrategy::new(UploadFrequency::Average)
    }

    #[test]
    fn average_bounds() {
        let strategy = average();
        assert_eq!(strategy.min_delay_ms(), 2_000);
        assert_eq!(strategy.default_delay_ms(), 10_000);
        assert_eq!(strategy.max_delay_ms(), 20_000);
        assert_eq!(strategy.initial_delay_ms("logs"), 10_000);
    }

    #[test]
    fn failures_grow_within_bounds() {
        let strategy = average();
        let mut last = strategy.default_delay_ms();
        for _ in 0..3 {
            let delay = strategy.get_ms_delay_until_next_upload("logs", 1, Some(500), None);
            assert!(delay > last);
            assert!(delay <= 20_000);
            last = delay;
        }
    }

    #[test]
    fn network_error_jumps_to_max() {
        let strategy = average();
        let error = UploadError::network("unreachable");
        let delay = strategy.get_ms_delay_until_next_upload("logs", 1, None, Some(&error));
        assert_eq!(delay, 20_000);
    }

    #[test]
    fn success_after_failures_returns_to_default() {
        let strategy = average();
        let error = UploadError::network("unreachable");
        strategy.get_ms_delay_until_next_upload("logs", 1, None, Some(&error));

        let delay = strategy.get_ms_delay_until_next_upload("logs", 1, Some(202), None);
        assert_eq!(delay, 10_000);
        let delay = strategy.get_ms_delay_until_next_upload("logs", 1, Some(202), None);
        assert!(delay < 10_000);
    }

    #[test]
    fn repeated_success_floors_at_min() {
        let strategy = average();
        for _ in 0..100 {
            strategy.get_ms_delay_until_next_upload("logs", 1, Some(202), None);
        }
        assert_eq!(strategy.initial_delay_ms("logs"), 2_000);
    }

    #[test]
    fn idle_cycles_back_off() {
        let strategy = average();
        let delay = strategy.get_ms_delay_until_next_upload("logs", 0, None, None);
        assert_eq!(delay, 11_000);
    }

    #[test]
    fn features_are_independent() {
        let strategy = average();
        let error = UploadError::network("unreachable");
        strategy.get_ms_delay_until_next_upload("logs", 1, None, Some(&error));
        assert_eq!(strategy.initial_delay_ms("logs"), 20_000);
        assert_eq!(strategy.initial_delay_ms("traces"), 10_000);
    }

    fn outcome() -> impl Strategy<Value = (usize, Option<u16>, bool)> {
        (0usize..5, proptest::option::of(100u16..600), any::<bool>())
    }

    proptest! {
        #[test]
        fn delay_always_within_bounds(outcomes in proptest::collection::vec(outcome(), 1..50)) {
            let strategy = DefaultUploadSchedulerStrategy::new(UploadFrequency::Frequent);
            for (attempts, code, network) in outcomes {
                let error = network.then(|| UploadError::network("down"));
                let delay = strategy.get_ms_delay_until_next_upload("f", attempts, code, error.as_ref());
                prop_assert!(delay >= strategy.min_delay_ms());
                prop_assert!(delay <= strategy.max_delay_ms());
            }
        }
    }
}
