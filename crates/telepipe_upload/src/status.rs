//! Outcome of one upload attempt.

use crate::error::UploadError;
use telepipe_core::{InternalLogger, LogLevel, LogTarget};

/// How the server (or the network) answered an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    /// 2xx.
    Success {
        /// Status code.
        code: u16,
    },
    /// 401 or 403, or an API key that cannot be sent at all.
    InvalidTokenError {
        /// Status code, if the request reached the server.
        code: Option<u16>,
    },
    /// 3xx.
    HttpRedirection {
        /// Status code.
        code: u16,
    },
    /// 4xx other than token and rate limiting codes.
    HttpClientError {
        /// Status code.
        code: u16,
    },
    /// 408 or 429.
    HttpClientRateLimiting {
        /// Status code.
        code: u16,
    },
    /// 5xx.
    HttpServerError {
        /// Status code.
        code: u16,
    },
    /// Any other status code.
    UnknownHttpError {
        /// Status code.
        code: u16,
    },
    /// The server could not be reached.
    NetworkError {
        /// Underlying error.
        error: UploadError,
    },
    /// The server host name could not be resolved.
    DnsError {
        /// Underlying error.
        error: UploadError,
    },
    /// The request could not be built.
    RequestCreationError {
        /// Underlying error.
        error: UploadError,
    },
    /// The client failed for another reason.
    UnknownError {
        /// Underlying error.
        error: UploadError,
    },
}

impl UploadStatus {
    /// Maps an HTTP status code.
    pub fn from_code(code: u16) -> Self {
        match code {
            200..=299 => Self::Success { code },
            300..=399 => Self::HttpRedirection { code },
            401 | 403 => Self::InvalidTokenError { code: Some(code) },
            408 | 429 => Self::HttpClientRateLimiting { code },
            400..=499 => Self::HttpClientError { code },
            500..=599 => Self::HttpServerError { code },
            _ => Self::UnknownHttpError { code },
        }
    }

    /// Maps a client failure.
    pub fn from_error(error: UploadError) -> Self {
        match error {
            UploadError::Network { .. } | UploadError::Timeout { .. } => {
                Self::NetworkError { error }
            }
            UploadError::Dns { .. } => Self::DnsError { error },
            UploadError::RequestCreation { .. } => Self::RequestCreationError { error },
            UploadError::InvalidHeader { .. } => Self::InvalidTokenError { code: None },
            _ => Self::UnknownError { error },
        }
    }

    /// Returns the HTTP status code, if the server answered.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Success { code }
            | Self::HttpRedirection { code }
            | Self::HttpClientError { code }
            | Self::HttpClientRateLimiting { code }
            | Self::HttpServerError { code }
            | Self::UnknownHttpError { code } => Some(*code),
            Self::InvalidTokenError { code } => *code,
            Self::NetworkError { .. }
            | Self::DnsError { .. }
            | Self::RequestCreationError { .. }
            | Self::UnknownError { .. } => None,
        }
    }

    /// Returns the client failure, if the request did not complete.
    pub fn error(&self) -> Option<&UploadError> {
        match self {
            Self::NetworkError { error }
            | Self::DnsError { error }
            | Self::RequestCreationError { error }
            | Self::UnknownError { error } => Some(error),
            _ => None,
        }
    }

    /// Returns true if the batch was accepted.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns true if the failure is transient.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::HttpClientRateLimiting { .. }
            | Self::HttpServerError { .. }
            | Self::NetworkError { .. }
            | Self::DnsError { .. }
            | Self::UnknownError { .. } => true,
            Self::Success { .. }
            | Self::InvalidTokenError { .. }
            | Self::HttpRedirection { .. }
            | Self::HttpClientError { .. }
            | Self::UnknownHttpError { .. }
            | Self::RequestCreationError { .. } => false,
        }
    }

    /// Reports the outcome of sending `byte_size` bytes for `context`.
    pub fn log(
        &self,
        context: &str,
        byte_size: usize,
        logger: &dyn InternalLogger,
        request_id: Option<&str>,
    ) {
        let batch = match request_id {
            Some(id) => format!("Batch {id} [{byte_size} bytes] ({context})"),
            None => format!("Batch [{byte_size} bytes] ({context})"),
        };
        const USER: &[LogTarget] = &[LogTarget::User];
        const USER_TELEMETRY: &[LogTarget] = &[LogTarget::User, LogTarget::Telemetry];
        const KEPT: &str = "the batch is kept until it expires.";
        const RETRY: &str = "we will retry later.";

        let (level, targets, message) = match self {
            Self::Success { .. } => (LogLevel::Info, USER, format!("{batch} sent successfully.")),
            Self::NetworkError { error } => (
                LogLevel::Warn,
                USER,
                format!("{batch} failed because of a network error ({error}); {RETRY}"),
            ),
            Self::DnsError { error } => (
                LogLevel::Warn,
                USER,
                format!("{batch} failed because of a DNS error ({error}); {RETRY}"),
            ),
            Self::InvalidTokenError { .. } => (
                LogLevel::Error,
                USER,
                format!(
                    "{batch} failed because your token is invalid; {KEPT} \
                     Make sure that the provided token still exists and you're \
                     targeting the relevant site."
                ),
            ),
            Self::HttpRedirection { .. } => (
                LogLevel::Warn,
                USER,
                format!("{batch} failed because of a network redirection; {KEPT}"),
            ),
            Self::HttpClientError { .. } => (
                LogLevel::Error,
                USER_TELEMETRY,
                format!("{batch} failed because of a processing error or invalid data; {KEPT}"),
            ),
            Self::HttpClientRateLimiting { .. } => (
                LogLevel::Warn,
                USER_TELEMETRY,
                format!("{batch} failed because of an intake rate limitation; {RETRY}"),
            ),
            Self::HttpServerError { .. } => (
                LogLevel::Error,
                USER,
                format!("{batch} failed because of a server processing error; {RETRY}"),
            ),
            Self::UnknownHttpError { code } => (
                LogLevel::Error,
                USER,
                format!(
                    "{batch} failed because of an unexpected HTTP error (status code = {code}); {KEPT}"
                ),
            ),
            Self::RequestCreationError { error } => (
                LogLevel::Error,
                USER,
                format!(
                    "{batch} failed because of an error when creating the request ({error}); {KEPT}"
                ),
            ),
            Self::UnknownError { error } => (
                LogLevel::Error,
                USER,
                format!("{batch} failed because of an unknown error ({error}); {RETRY}"),
            ),
        };
        logger.log(level, targets, &message, None);
    }
}
