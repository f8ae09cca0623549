use crate::logger::{InternalLogger, LogLevel, LogTarget};
use parking_lot::Mutex;
use std::error::Error;

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub level: LogLevel,
    pub targets: Vec<LogTarget>,
    pub message: String,
}

#[derive(Debug, Default)]
pub(crate) struct RecordingLogger {
    entries: Mutex<Vec<Entry>>,
}

impl RecordingLogger {
    pub fn entries(&self) -> Vec<Entry> {
        self.entries.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries.lock().iter().any(|e| e.message.contains(needle))
    }

    pub fn find(&self, needle: &str) -> Option<Entry> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.message.contains(needle))
            .cloned()
    }
}

impl InternalLogger for RecordingLogger {
    fn log(
        &self,
        level: LogLevel,
        targets: &[LogTarget],
        message: &str,
        _error: Option<&(dyn Error + 'static)>,
    ) {
        self.entries.lock().push(Entry {
            level,
            targets: targets.to_vec(),
            message: message.to_string(),
        });
    }
}
