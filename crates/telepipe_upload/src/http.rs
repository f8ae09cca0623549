//! HTTP client abstraction.
//!
//! No HTTP stack is bundled. The host plugs in whatever client it already
//! ships (reqwest, ureq, a platform networking layer) by implementing
//! [`HttpClient`].

use crate::error::UploadError;
use crate::request::Request;
use std::time::Duration;

/// Executes upload requests.
pub trait HttpClient: Send + Sync {
    /// POSTs `request` and returns the response status code.
    ///
    /// Must give up after `timeout` with [`UploadError::Timeout`]. Failures
    /// to reach the server should use [`UploadError::Network`] or
    /// [`UploadError::Dns`] so the scheduler can back off accordingly.
    fn execute(&self, request: &Request, timeout: Duration) -> Result<u16, UploadError>;
}

/// Returns true if `value` can be sent as an HTTP header value.
///
/// Only visible ASCII and spaces are accepted.
pub fn is_valid_header_value(value: &str) -> bool {
    value.bytes().all(|b| b == b' ' || b == b'\t' || b.is_ascii_graphic())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_values() {
        assert!(is_valid_header_value("pub0123abc"));
        assert!(is_valid_header_value("token with spaces"));
        assert!(!is_valid_header_value("tök"));
        assert!(!is_valid_header_value("line\nbreak"));
    }
}
