//! Upload requests and how batches become one.

use crate::config::UploadContext;
use crate::error::UploadResult;
use std::collections::BTreeMap;
use telepipe_core::RawBatchEvent;
use uuid::Uuid;

/// Header carrying the intake API key.
pub const HEADER_API_KEY: &str = "API-Key";
/// Header naming the sending SDK flavor.
pub const HEADER_EVP_ORIGIN: &str = "EVP-Origin";
/// Header carrying the sending SDK version.
pub const HEADER_EVP_ORIGIN_VERSION: &str = "EVP-Origin-Version";
/// Header carrying the request identifier.
pub const HEADER_REQUEST_ID: &str = "Request-Id";

/// Plain text content type.
pub const CONTENT_TYPE_TEXT_UTF8: &str = "text/plain;charset=UTF-8";
/// JSON content type.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// An HTTP POST ready to be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Unique identifier, also sent as `Request-Id`.
    pub id: String,
    /// Human readable name used in logs (for example `"Logs Request"`).
    pub description: String,
    /// Target URL.
    pub url: String,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
    /// Request body.
    pub body: Vec<u8>,
    /// `Content-Type` of the body, if any.
    pub content_type: Option<String>,
}

/// Builds the request for one batch.
///
/// Each feature plugs its own factory; [`DefaultRequestFactory`] covers
/// the common "events joined by a separator" shape.
pub trait RequestFactory: Send + Sync {
    /// Creates the request for `events` and their batch metadata.
    fn create(
        &self,
        context: &UploadContext,
        events: &[RawBatchEvent],
        batch_metadata: Option<&[u8]>,
    ) -> UploadResult<Request>;
}

/// Request factory joining event payloads into one body.
#[derive(Debug, Clone)]
pub struct DefaultRequestFactory {
    description: String,
    endpoint: String,
    path: String,
    separator: Vec<u8>,
    prefix: Vec<u8>,
    suffix: Vec<u8>,
    content_type: String,
}

impl DefaultRequestFactory {
    /// Creates a factory posting to `endpoint` + `path`.
    ///
    /// Events are joined by a newline and sent as UTF-8 text.
    pub fn new(
        description: impl Into<String>,
        endpoint: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            endpoint: endpoint.into(),
            path: path.into(),
            separator: b"\n".to_vec(),
            prefix: Vec::new(),
            suffix: Vec::new(),
            content_type: CONTENT_TYPE_TEXT_UTF8.to_string(),
        }
    }

    /// Sets the bytes written between two events.
    pub fn with_separator(mut self, separator: impl Into<Vec<u8>>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Sets the bytes written before the first and after the last event.
    pub fn with_envelope(mut self, prefix: impl Into<Vec<u8>>, suffix: impl Into<Vec<u8>>) -> Self {
        self.prefix = prefix.into();
        self.suffix = suffix.into();
        self
    }

    /// Sets the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Sends events as a JSON array.
    pub fn json_array(self) -> Self {
        self.with_separator(b",".to_vec())
            .with_envelope(b"[".to_vec(), b"]".to_vec())
            .with_content_type(CONTENT_TYPE_JSON)
    }

    fn url(&self) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), self.path)
    }

    fn body(&self, events: &[RawBatchEvent]) -> Vec<u8> {
        let payload: usize = events.iter().map(|e| e.data.len()).sum();
        let mut body = Vec::with_capacity(
            self.prefix.len()
                + payload
                + self.separator.len() * events.len().saturating_sub(1)
                + self.suffix.len(),
        );
        body.extend_from_slice(&self.prefix);
        for (i, event) in events.iter().enumerate() {
            if i > 0 {
                body.extend_from_slice(&self.separator);
            }
            body.extend_from_slice(&event.data);
        }
        body.extend_from_slice(&self.suffix);
        body
    }
}

impl RequestFactory for DefaultRequestFactory {
    fn create(
        &self,
        context: &UploadContext,
        events: &[RawBatchEvent],
        _batch_metadata: Option<&[u8]>,
    ) -> UploadResult<Request> {
        let id = Uuid::new_v4().to_string();

        let mut headers = BTreeMap::new();
        headers.insert(HEADER_API_KEY.to_string(), context.api_key.clone());
        headers.insert(HEADER_EVP_ORIGIN.to_string(), context.source.clone());
        headers.insert(
            HEADER_EVP_ORIGIN_VERSION.to_string(),
            context.sdk_version.clone(),
        );
        headers.insert(HEADER_REQUEST_ID.to_string(), id.clone());

        Ok(Request {
            id,
            description: self.description.clone(),
            url: self.url(),
            headers,
            body: self.body(events),
            content_type: Some(self.content_type.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> UploadContext {
        UploadContext::new("secret", "rust", "0.3.0")
    }

    fn events(payloads: &[&str]) -> Vec<RawBatchEvent> {
        payloads
            .iter()
            .map(|p| RawBatchEvent::new(p.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn joins_events_with_newlines() {
        let factory = DefaultRequestFactory::new("Logs Request", "https://intake.test/", "/api/v2/logs");
        let request = factory
            .create(&context(), &events(&["a", "b", "c"]), None)
            .unwrap();

        assert_eq!(request.url, "https://intake.test/api/v2/logs");
        assert_eq!(request.body, b"a\nb\nc");
        assert_eq!(request.description, "Logs Request");
        assert_eq!(request.content_type.as_deref(), Some(CONTENT_TYPE_TEXT_UTF8));
    }

    #[test]
    fn json_array_envelope() {
        let factory = DefaultRequestFactory::new("RUM Request", "https://intake.test", "/rum").json_array();
        let request = factory
            .create(&context(), &events(&["{}", "{\"a\":1}"]), None)
            .unwrap();
        assert_eq!(request.body, b"[{},{\"a\":1}]");
        assert_eq!(request.content_type.as_deref(), Some(CONTENT_TYPE_JSON));

        let empty = factory.create(&context(), &[], None).unwrap();
        assert_eq!(empty.body, b"[]");
    }

    #[test]
    fn identity_headers() {
        let factory = DefaultRequestFactory::new("Logs Request", "https://intake.test", "/logs");
        let request = factory.create(&context(), &events(&["a"]), None).unwrap();

        assert_eq!(request.headers[HEADER_API_KEY], "secret");
        assert_eq!(request.headers[HEADER_EVP_ORIGIN], "rust");
        assert_eq!(request.headers[HEADER_EVP_ORIGIN_VERSION], "0.3.0");
        assert_eq!(request.headers[HEADER_REQUEST_ID], request.id);
        assert!(Uuid::parse_str(&request.id).is_ok());
    }

    #[test]
    fn request_ids_are_unique() {
        let factory = DefaultRequestFactory::new("Logs Request", "https://intake.test", "/logs");
        let a = factory.create(&context(), &events(&["a"]), None).unwrap();
        let b = factory.create(&context(), &events(&["a"]), None).unwrap();
        assert_ne!(a.id, b.id);
    }
}
