//! The persistence executor: one worker thread that owns all file access.
//!
//! Two lanes feed the worker:
//!
//! - the **data lane**, a [`BackPressuredQueue`] that producers write into and
//!   that may drop tasks when full
//! - the **control lane**, unbounded, for consent migrations and synchronous
//!   calls; it is always drained before the next data task runs
//!
//! Every task runs inside `catch_unwind`. A panicking task is logged and the
//! worker moves on to the next one.

use crate::backpressure::{BackPressureObserver, BackPressuredQueue, OfferOutcome};
use crate::config::BackPressureStrategy;
use crate::error::{CoreError, CoreResult};
use crate::logger::{InternalLogger, LogLevel, LogTarget};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long the idle worker sleeps before rechecking the control lane.
const IDLE_WAIT: Duration = Duration::from_millis(100);
const FLUSH_POLL: Duration = Duration::from_millis(5);

/// A named unit of work for the persistence worker.
pub struct PersistenceTask {
    name: String,
    run: Box<dyn FnOnce() + Send + 'static>,
}

impl PersistenceTask {
    /// Wraps a closure.
    pub fn new(name: impl Into<String>, run: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name: name.into(),
            run: Box::new(run),
        }
    }

    /// Name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for PersistenceTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceTask")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

struct LoggingObserver {
    logger: Arc<dyn InternalLogger>,
    forward: Option<Arc<dyn BackPressureObserver<PersistenceTask>>>,
    capacity: usize,
}

impl BackPressureObserver<PersistenceTask> for LoggingObserver {
    fn on_threshold_reached(&self) {
        self.logger.log(
            LogLevel::Warn,
            &[LogTarget::Maintainer, LogTarget::Telemetry],
            &format!("Persistence queue reached its capacity of {}", self.capacity),
            None,
        );
        if let Some(forward) = &self.forward {
            forward.on_threshold_reached();
        }
    }

    fn on_item_dropped(&self, item: &PersistenceTask) {
        self.logger.log(
            LogLevel::Error,
            &[LogTarget::Maintainer, LogTarget::Telemetry],
            &format!("Dropped persistence task {}", item.name()),
            None,
        );
        if let Some(forward) = &self.forward {
            forward.on_item_dropped(item);
        }
    }
}

struct Shared {
    data: BackPressuredQueue<PersistenceTask>,
    control: Mutex<VecDeque<PersistenceTask>>,
    shutdown: AtomicBool,
    logger: Arc<dyn InternalLogger>,
}

impl Shared {
    fn run_loop(&self) {
        loop {
            self.run_control();
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            if let Some(task) = self.data.poll_blocking(IDLE_WAIT) {
                // Control tasks queued before this data task was offered go first.
                self.run_control();
                self.run(task);
            }
        }
    }

    fn run_control(&self) {
        loop {
            let next = self.control.lock().pop_front();
            match next {
                Some(task) => self.run(task),
                None => break,
            }
        }
    }

    fn run(&self, task: PersistenceTask) {
        let PersistenceTask { name, run } = task;
        if panic::catch_unwind(AssertUnwindSafe(run)).is_err() {
            self.logger.log(
                LogLevel::Error,
                &[LogTarget::Maintainer, LogTarget::Telemetry],
                &format!("Persistence task {name} panicked"),
                None,
            );
        }
    }
}

/// Single-threaded executor for every file operation of a pipeline.
pub struct PersistenceExecutor {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    finished: Mutex<Option<mpsc::Receiver<()>>>,
}

impl PersistenceExecutor {
    /// Starts the worker thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start(
        name: &str,
        strategy: BackPressureStrategy,
        observer: Option<Arc<dyn BackPressureObserver<PersistenceTask>>>,
        logger: Arc<dyn InternalLogger>,
    ) -> CoreResult<Self> {
        let observer = LoggingObserver {
            logger: Arc::clone(&logger),
            forward: observer,
            capacity: strategy.capacity,
        };
        let shared = Arc::new(Shared {
            data: BackPressuredQueue::new(strategy, Some(Arc::new(observer))),
            control: Mutex::new(VecDeque::new()),
            shutdown: AtomicBool::new(false),
            logger,
        });

        let (done_tx, done_rx) = mpsc::channel();
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("{name}-persistence"))
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

    /// Queues a data task, subject to backpressure.
    pub fn submit(
        &self,
        name: impl Into<String>,
        task: impl FnOnce() + Send + 'static,
    ) -> OfferOutcome<PersistenceTask> {
        let task = PersistenceTask::new(name, task);
        if self.is_shut_down() {
            return OfferOutcome::Closed(task);
        }
        self.shared.data.offer(task)
    }

    /// Queues a control task. Control tasks are never dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ExecutorClosed`] after shutdown.
    pub fn submit_control(
        &self,
        name: impl Into<String>,
        task: impl FnOnce() + Send + 'static,
    ) -> CoreResult<()> {
        if self.is_shut_down() {
            return Err(CoreError::ExecutorClosed);
        }
        self.shared
            .control
            .lock()
            .push_back(PersistenceTask::new(name, task));
        self.shared.data.wake();
        Ok(())
    }

    /// Runs `f` on the worker and waits for its result.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Timeout`] if the result does not arrive within `timeout`
    /// - [`CoreError::TaskPanicked`] if `f` panicked
    /// - [`CoreError::ExecutorClosed`] after shutdown
    pub fn call<R, F>(&self, name: &str, timeout: Duration, f: F) -> CoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        self.submit_control(name, move || {
            let _ = tx.send(f());
        })?;
        match rx.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(CoreError::timeout(name, timeout)),
            Err(RecvTimeoutError::Disconnected) if self.is_shut_down() => {
                Err(CoreError::ExecutorClosed)
            }
            Err(RecvTimeoutError::Disconnected) => Err(CoreError::TaskPanicked {
                name: name.to_string(),
            }),
        }
    }

    /// Waits until every data task queued so far has run.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Timeout`] if the data lane does not empty in
    /// time, or the errors of [`call`](Self::call).
    pub fn flush(&self, timeout: Duration) -> CoreResult<()> {
        let deadline = Instant::now() + timeout;
        while !self.shared.data.is_empty() {
            if self.is_shut_down() {
                return Err(CoreError::ExecutorClosed);
            }
            if Instant::now() >= deadline {
                return Err(CoreError::timeout("flush", timeout));
            }
            thread::sleep(FLUSH_POLL);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.call("flush", remaining, || ())
    }

    /// Number of data tasks waiting.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.data.len()
    }

    /// Returns true once shutdown has started.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    /// Stops the worker.
    ///
    /// Queued tasks are discarded and counted. The task in flight gets up to
    /// `grace` to finish; after that the worker is left to finish on its own.
    /// Returns the number of discarded tasks.
    pub fn shutdown(&self, grace: Duration) -> usize {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return 0;
        }
        self.shared.data.close();
        let discarded = self.shared.data.drain().len()
            + self.shared.control.lock().drain(..).count();
        if discarded > 0 {
            self.shared.logger.log(
                LogLevel::Warn,
                &[LogTarget::Maintainer],
                &format!("Discarded {discarded} pending persistence tasks on shutdown"),
                None,
            );
        }

        let finished = self.finished.lock().take();
        let handle = self.worker.lock().take();
        if let (Some(finished), Some(handle)) = (finished, handle) {
            match finished.recv_timeout(grace) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    let _ = handle.join();
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.shared.logger.log(
                        LogLevel::Warn,
                        &[LogTarget::Maintainer],
                        &format!("Persistence worker still busy after {grace:?}, detaching"),
                        None,
                    );
                }
            }
        }
        discarded
    }
}

impl Drop for PersistenceExecutor {
    fn drop(&mut self) {
        if !self.is_shut_down() {
            self.shutdown(Duration::ZERO);
        }
    }
}

impl std::fmt::Debug for PersistenceExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceExecutor")
            .field("pending", &self.pending())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
