//! Internal logging with audience targets.
//!
//! Every message names who it is for: the host developer ([`LogTarget::User`]),
//! SDK maintainers ([`LogTarget::Maintainer`]) or the self-monitoring pipeline
//! ([`LogTarget::Telemetry`]). [`TracingLogger`] forwards all of them to
//! `tracing`; tests swap in a capturing implementation.

use std::error::Error;
use std::fmt;

/// Severity of an internal log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Very detailed tracing.
    Verbose,
    /// Debugging information.
    Debug,
    /// Normal operation.
    Info,
    /// Something unexpected that was recovered from.
    Warn,
    /// An operation failed.
    Error,
}

/// Audience of an internal log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTarget {
    /// The developer integrating the SDK.
    User,
    /// The developers of the SDK itself.
    Maintainer,
    /// The SDK's own health reporting.
    Telemetry,
}

impl fmt::Display for LogTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::User => "user",
            Self::Maintainer => "maintainer",
            Self::Telemetry => "telemetry",
        };
        f.write_str(name)
    }
}

/// Sink for internal log messages.
pub trait InternalLogger: Send + Sync {
    /// Records a message for the given audiences.
    fn log(
        &self,
        level: LogLevel,
        targets: &[LogTarget],
        message: &str,
        error: Option<&(dyn Error + 'static)>,
    );
}

/// Forwards internal logs to `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl InternalLogger for TracingLogger {
    fn log(
        &self,
        level: LogLevel,
        targets: &[LogTarget],
        message: &str,
        error: Option<&(dyn Error + 'static)>,
    ) {
        let targets = targets
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let error = error.map(ToString::to_string);
        match level {
            LogLevel::Verbose => tracing::trace!(targets = %targets, error = ?error, "{message}"),
            LogLevel::Debug => tracing::debug!(targets = %targets, error = ?error, "{message}"),
            LogLevel::Info => tracing::info!(targets = %targets, error = ?error, "{message}"),
            LogLevel::Warn => tracing::warn!(targets = %targets, error = ?error, "{message}"),
            LogLevel::Error => tracing::error!(targets = %targets, error = ?error, "{message}"),
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLogger;

impl InternalLogger for NoOpLogger {
    fn log(&self, _: LogLevel, _: &[LogTarget], _: &str, _: Option<&(dyn Error + 'static)>) {}
}
