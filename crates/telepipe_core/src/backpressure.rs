//! Bounded queue with an overflow policy.
//!
//! The queue never holds more than `capacity` items. When an item arrives at
//! a full queue, [`BackPressureMitigation`] decides whether the oldest queued
//! item or the new one is dropped. Observers hear about drops and about the
//! queue filling up, always after the internal lock is released.

use crate::config::{BackPressureMitigation, BackPressureStrategy};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of [`BackPressuredQueue::offer`].
#[derive(Debug, PartialEq, Eq)]
pub enum OfferOutcome<T> {
    /// The item was queued. `evicted` holds the item dropped to make room.
    Accepted {
        /// Oldest item, removed under [`BackPressureMitigation::DropOldest`].
        evicted: Option<T>,
    },
    /// The queue was full and the new item was rejected.
    Dropped(T),
    /// The queue no longer accepts items.
    Closed(T),
}

impl<T> OfferOutcome<T> {
    /// Returns true if the offered item is now queued.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Receives backpressure notifications.
pub trait BackPressureObserver<T>: Send + Sync {
    /// The queue just became full.
    fn on_threshold_reached(&self) {}

    /// An item was dropped, either evicted or rejected.
    fn on_item_dropped(&self, item: &T) {
        let _ = item;
    }
}

struct State<T> {
    items: VecDeque<T>,
    threshold_signaled: bool,
    closed: bool,
    wakeups: u64,
}

/// A bounded FIFO queue guarded by a single mutex.
pub struct BackPressuredQueue<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
    strategy: BackPressureStrategy,
    observer: Option<Arc<dyn BackPressureObserver<T>>>,
}

impl<T> BackPressuredQueue<T> {
    /// Creates an empty queue.
    pub fn new(
        strategy: BackPressureStrategy,
        observer: Option<Arc<dyn BackPressureObserver<T>>>,
    ) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(strategy.capacity.min(1024)),
                threshold_signaled: false,
                closed: false,
                wakeups: 0,
            }),
            ready: Condvar::new(),
            strategy,
            observer,
        }
    }

    /// The configured policy.
    #[must_use]
    pub fn strategy(&self) -> BackPressureStrategy {
        self.strategy
    }

    /// Offers an item to the queue.
    pub fn offer(&self, item: T) -> OfferOutcome<T> {
        let capacity = self.strategy.capacity;
        let mut state = self.state.lock();
        if state.closed {
            return OfferOutcome::Closed(item);
        }

        if state.items.len() < capacity {
            state.items.push_back(item);
            let crossed = state.items.len() == capacity && !state.threshold_signaled;
            if crossed {
                state.threshold_signaled = true;
            }
            drop(state);
            self.ready.notify_one();
            if crossed {
                if let Some(observer) = &self.observer {
                    observer.on_threshold_reached();
                }
            }
            return OfferOutcome::Accepted { evicted: None };
        }

        match self.strategy.mitigation {
            BackPressureMitigation::DropOldest if capacity > 0 => {
                let evicted = state.items.pop_front();
                state.items.push_back(item);
                drop(state);
                self.ready.notify_one();
                if let (Some(observer), Some(evicted)) = (&self.observer, &evicted) {
                    observer.on_item_dropped(evicted);
                }
                OfferOutcome::Accepted { evicted }
            }
            _ => {
                drop(state);
                if let Some(observer) = &self.observer {
                    observer.on_item_dropped(&item);
                }
                OfferOutcome::Dropped(item)
            }
        }
    }

    /// Removes and returns the oldest item.
    pub fn poll(&self) -> Option<T> {
        let mut state = self.state.lock();
        let item = state.items.pop_front();
        Self::rearm(&mut state, self.strategy.capacity);
        item
    }

    /// Removes the oldest item, waiting up to `timeout` for one.
    ///
    /// Returns early with `None` if the queue is closed or [`wake`](Self::wake)
    /// is called.
    pub fn poll_blocking(&self, timeout: Duration) -> Option<T> {
        let mut state = self.state.lock();
        self.wait_ready(&mut state, timeout);
        let item = state.items.pop_front();
        Self::rearm(&mut state, self.strategy.capacity);
        item
    }

    /// Atomically removes every item, in insertion order.
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.state.lock();
        let items = state.items.drain(..).collect();
        Self::rearm(&mut state, self.strategy.capacity);
        items
    }

    /// Like [`drain`](Self::drain), waiting up to `timeout` for items.
    pub fn drain_blocking(&self, timeout: Duration) -> Vec<T> {
        let mut state = self.state.lock();
        self.wait_ready(&mut state, timeout);
        let items = state.items.drain(..).collect();
        Self::rearm(&mut state, self.strategy.capacity);
        items
    }

    /// Wakes every thread blocked in a `*_blocking` call.
    pub fn wake(&self) {
        self.state.lock().wakeups += 1;
        self.ready.notify_all();
    }

    /// Stops accepting items. Queued items stay until drained.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    /// Returns true once [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    fn wait_ready(&self, state: &mut MutexGuard<'_, State<T>>, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let wakeups = state.wakeups;
        while state.items.is_empty() && !state.closed && state.wakeups == wakeups {
            if self.ready.wait_until(state, deadline).timed_out() {
                break;
            }
        }
    }

    fn rearm(state: &mut State<T>, capacity: usize) {
        if state.items.len() < capacity {
            state.threshold_signaled = false;
        }
    }
}

impl<T> std::fmt::Debug for BackPressuredQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackPressuredQueue")
            .field("strategy", &self.strategy)
            .field("len", &self.len())
            .finish()
    }
}
