//! Stand-ins for the collaborators a host plugs into a pipeline.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::error::Error;
use std::time::Duration;
use telepipe::{
    HttpClient, InternalLogger, LogLevel, LogTarget, Request, UploadError,
    UploadSchedulerStrategy,
};

/// An HTTP client answering from a script and recording every request.
///
/// Answers queued with [`enqueue`](Self::enqueue) are used first, in order;
/// after that every request gets the default answer (202 unless changed).
#[derive(Debug)]
pub struct FakeHttpClient {
    scripted: Mutex<VecDeque<Result<u16, UploadError>>>,
    default: Mutex<Result<u16, UploadError>>,
    requests: Mutex<Vec<Request>>,
}

impl Default for FakeHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHttpClient {
    /// Creates a client accepting everything with 202.
    pub fn new() -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            default: Mutex::new(Ok(202)),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues the answer to the next unanswered request.
    pub fn enqueue(&self, answer: Result<u16, UploadError>) {
        self.scripted.lock().push_back(answer);
    }

    /// Sets the answer used once the script is exhausted.
    pub fn set_default(&self, answer: Result<u16, UploadError>) {
        *self.default.lock() = answer;
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// Bodies of every request received so far.
    pub fn bodies(&self) -> Vec<Vec<u8>> {
        self.requests.lock().iter().map(|r| r.body.clone()).collect()
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl HttpClient for FakeHttpClient {
    fn execute(&self, request: &Request, _timeout: Duration) -> Result<u16, UploadError> {
        self.requests.lock().push(request.clone());
        let scripted = self.scripted.lock().pop_front();
        scripted.unwrap_or_else(|| self.default.lock().clone())
    }
}

/// One captured log message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Severity.
    pub level: LogLevel,
    /// Audiences.
    pub targets: Vec<LogTarget>,
    /// Message text.
    pub message: String,
    /// Display of the attached error, if any.
    pub error: Option<String>,
}

/// A logger keeping every message for later assertions.
#[derive(Debug, Default)]
pub struct CapturingLogger {
    entries: Mutex<Vec<LogEntry>>,
}

impl CapturingLogger {
    /// Creates an empty logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message logged so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// First message containing `needle`.
    pub fn find(&self, needle: &str) -> Option<LogEntry> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.message.contains(needle))
            .cloned()
    }

    /// Returns true if some message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.find(needle).is_some()
    }

    /// Messages addressed to `target`.
    pub fn for_target(&self, target: LogTarget) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.targets.contains(&target))
            .cloned()
            .collect()
    }

    /// Forgets everything logged so far.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl InternalLogger for CapturingLogger {
    fn log(
        &self,
        level: LogLevel,
        targets: &[LogTarget],
        message: &str,
        error: Option<&(dyn Error + 'static)>,
    ) {
        self.entries.lock().push(LogEntry {
            level,
            targets: targets.to_vec(),
            message: message.to_string(),
            error: error.map(|e| e.to_string()),
        });
    }
}

/// Upload strategy waiting the same short delay every time.
///
/// Keeps background upload tests fast; the real delay bounds are covered
/// by the default strategy's own tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelayStrategy {
    delay_ms: u64,
}

impl FixedDelayStrategy {
    /// Creates a strategy always answering `delay`.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl UploadSchedulerStrategy for FixedDelayStrategy {
    fn get_ms_delay_until_next_upload(
        &self,
        _feature: &str,
        _upload_attempts: usize,
        _last_status_code: Option<u16>,
        _error: Option<&UploadError>,
    ) -> u64 {
        self.delay_ms
    }

    fn initial_delay_ms(&self, _feature: &str) -> u64 {
        self.delay_ms
    }
}
