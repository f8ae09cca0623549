//! The upload thread.
//!
//! A single thread owns a timer heap of feature runnables. Each runnable
//! runs when due and hands back the delay before its next turn; the thread
//! sleeps until the earliest deadline in between.

use crate::error::UploadResult;
use crate::runnable::{DataUploadRunnable, UploadState};
use parking_lot::{Condvar, Mutex};
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use telepipe_core::{InternalLogger, LogLevel, LogTarget};

struct Timer {
    due: Instant,
    seq: u64,
    job: Arc<DataUploadRunnable>,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[derive(Default)]
struct Timers {
    heap: BinaryHeap<Reverse<Timer>>,
    next_seq: u64,
}

impl Timers {
    fn push(&mut self, job: Arc<DataUploadRunnable>, due: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        job.set_state(UploadState::Scheduled);
        self.heap.push(Reverse(Timer { due, seq, job }));
    }
}

struct Shared {
    timers: Mutex<Timers>,
    wake: Condvar,
    stopped: AtomicBool,
    logger: Arc<dyn InternalLogger>,
}

impl Shared {
    fn next_due(&self) -> Option<Arc<DataUploadRunnable>> {
        let mut timers = self.timers.lock();
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return None;
            }
            let now = Instant::now();
            match timers.heap.peek() {
                Some(Reverse(timer)) if timer.due <= now => {
                    return timers.heap.pop().map(|Reverse(timer)| timer.job);
                }
                Some(Reverse(timer)) => {
                    let due = timer.due;
                    self.wake.wait_until(&mut timers, due);
                }
                None => self.wake.wait(&mut timers),
            }
        }
    }

    fn run_loop(&self) {
        while let Some(job) = self.next_due() {
            let next = match panic::catch_unwind(AssertUnwindSafe(|| job.run())) {
                Ok(next) => next,
                Err(_) => {
                    self.logger.log(
                        LogLevel::Error,
                        &[LogTarget::Maintainer, LogTarget::Telemetry],
                        &format!("Upload cycle of {} panicked", job.feature()),
                        None,
                    );
                    Some(job.initial_delay())
                }
            };
            if let Some(delay) = next {
                if !self.stopped.load(Ordering::SeqCst) {
                    self.timers.lock().push(job, Instant::now() + delay);
                }
            }
        }
    }
}

/// Single thread running every feature's upload cycles.
pub struct UploadScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    finished: Mutex<Option<mpsc::Receiver<()>>>,
}

impl UploadScheduler {
    /// Starts the upload thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start(name: &str, logger: Arc<dyn InternalLogger>) -> UploadResult<Self> {
        let shared = Arc::new(Shared {
            timers: Mutex::new(Timers::default()),
            wake: Condvar::new(),
            stopped: AtomicBool::new(false),
            logger,
        });

        let (done_tx, done_rx) = mpsc::channel();
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("{name}-upload"))
            .spawn(move || {
                worker_shared.run_loop();
                let _ = done_tx.send(());
            })?;

        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
            finished: Mutex::new(Some(done_rx)),
        })
    }

    /// Schedules the first cycle of `job` after its initial delay.
    pub fn start_job(&self, job: Arc<DataUploadRunnable>) {
        let delay = job.initial_delay();
        self.schedule(job, delay);
    }

    /// Schedules a cycle of `job` after `delay`.
    ///
    /// Ignored once the scheduler is stopped.
    pub fn schedule(&self, job: Arc<DataUploadRunnable>, delay: Duration) {
        if self.is_stopped() {
            return;
        }
        self.shared.timers.lock().push(job, Instant::now() + delay);
        self.shared.wake.notify_one();
    }

    /// Number of cycles waiting for their deadline.
    pub fn pending(&self) -> usize {
        self.shared.timers.lock().heap.len()
    }

    /// Returns true after [`stop`](Self::stop).
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Stops every runnable and the thread.
    ///
    /// Waits up to `grace` for a cycle in progress, then returns anyway; the
    /// thread exits on its own once that cycle ends.
    pub fn stop(&self, grace: Duration) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let cancelled: Vec<_> = {
            let mut timers = self.shared.timers.lock();
            timers.heap.drain().map(|Reverse(timer)| timer.job).collect()
        };
        for job in &cancelled {
            job.stop();
        }
        self.shared.wake.notify_all();

        let finished = self.finished.lock().take();
        let done = finished.map_or(true, |rx| rx.recv_timeout(grace).is_ok());
        if done {
            if let Some(handle) = self.worker.lock().take() {
                let _ = handle.join();
            }
        } else {
            self.shared.logger.log(
                LogLevel::Warn,
                &[LogTarget::Maintainer],
                &format!("Upload still in progress after {grace:?}, not waiting for it"),
                None,
            );
        }
    }
}

impl Drop for UploadScheduler {
    fn drop(&mut self) {
        if !self.is_stopped() {
            self.stop(Duration::ZERO);
        }
    }
}

impl std::fmt::Debug for UploadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadScheduler")
            .field("pending", &self.pending())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
