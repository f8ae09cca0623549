//! Sending one batch.

use crate::config::UploadContext;
use crate::error::UploadError;
use crate::http::{is_valid_header_value, HttpClient};
use crate::request::{RequestFactory, HEADER_API_KEY};
use crate::status::UploadStatus;
use std::sync::Arc;
use std::time::Duration;
use telepipe_core::{InternalLogger, LogLevel, LogTarget, RawBatchEvent};

/// Turns a batch into a request, sends it and classifies the answer.
pub struct DataUploader {
    client: Arc<dyn HttpClient>,
    factory: Arc<dyn RequestFactory>,
    context: UploadContext,
    call_timeout: Duration,
    logger: Arc<dyn InternalLogger>,
}

impl DataUploader {
    /// Creates an uploader.
    pub fn new(
        client: Arc<dyn HttpClient>,
        factory: Arc<dyn RequestFactory>,
        context: UploadContext,
        call_timeout: Duration,
        logger: Arc<dyn InternalLogger>,
    ) -> Self {
        Self {
            client,
            factory,
            context,
            call_timeout,
            logger,
        }
    }

    /// Uploads `events` and returns how it went. Never panics, never fails.
    pub fn upload(&self, events: &[RawBatchEvent], batch_metadata: Option<&[u8]>) -> UploadStatus {
        let request = match self.factory.create(&self.context, events, batch_metadata) {
            Ok(request) => request,
            Err(e) => {
                self.logger.log(
                    LogLevel::Error,
                    &[LogTarget::Maintainer, LogTarget::Telemetry],
                    "Unable to create the request, probably due to bad data format",
                    Some(&e),
                );
                let error = match e {
                    UploadError::RequestCreation { .. } => e,
                    other => UploadError::request_creation(other.to_string()),
                };
                return UploadStatus::RequestCreationError { error };
            }
        };

        let api_key_valid = request
            .headers
            .get(HEADER_API_KEY)
            .is_some_and(|key| !key.is_empty() && is_valid_header_value(key));
        let status = if api_key_valid {
            match self.client.execute(&request, self.call_timeout) {
                Ok(code) => UploadStatus::from_code(code),
                Err(e) => UploadStatus::from_error(e),
            }
        } else {
            UploadStatus::InvalidTokenError { code: None }
        };

        status.log(
            &request.description,
            request.body.len(),
            self.logger.as_ref(),
            Some(&request.id),
        );
        status
    }
}

impl std::fmt::Debug for DataUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataUploader")
            .field("context", &self.context.source)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UploadResult;
    use crate::request::{DefaultRequestFactory, Request};
    use parking_lot::Mutex;
    use telepipe_core::NoOpLogger;

    struct ScriptedClient {
        answer: Result<u16, UploadError>,
        seen: Mutex<Vec<(Request, Duration)>>,
    }

    impl ScriptedClient {
        fn answering(answer: Result<u16, UploadError>) -> Arc<Self> {
            Arc::new(Self {
                answer,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl HttpClient for ScriptedClient {
        fn execute(&self, request: &Request, timeout: Duration) -> Result<u16, UploadError> {
            self.seen.lock().push((request.clone(), timeout));
            self.answer.clone()
        }
    }

    struct FailingFactory;

    impl RequestFactory for FailingFactory {
        fn create(
            &self,
            _context: &UploadContext,
            _events: &[RawBatchEvent],
            _batch_metadata: Option<&[u8]>,
        ) -> UploadResult<Request> {
            Err(UploadError::other("cannot serialize"))
        }
    }

    fn uploader(client: Arc<ScriptedClient>, api_key: &str) -> DataUploader {
        DataUploader::new(
            client,
            Arc::new(DefaultRequestFactory::new("Logs Request", "https://intake.test", "/logs")),
            UploadContext::new(api_key, "rust", "0.3.0"),
            Duration::from_secs(45),
            Arc::new(NoOpLogger),
        )
    }

    fn batch() -> Vec<RawBatchEvent> {
        vec![RawBatchEvent::new(b"a".to_vec()), RawBatchEvent::new(b"b".to_vec())]
    }

    #[test]
    fn accepted_batch_is_success() {
        let client = ScriptedClient::answering(Ok(202));
        let status = uploader(client.clone(), "key").upload(&batch(), None);

        assert_eq!(status, UploadStatus::Success { code: 202 });
        let seen = client.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.body, b"a\nb");
        assert_eq!(seen[0].1, Duration::from_secs(45));
    }

    #[test]
    fn http_failure_is_classified() {
        let client = ScriptedClient::answering(Ok(503));
        let status = uploader(client, "key").upload(&batch(), None);
        assert_eq!(status, UploadStatus::HttpServerError { code: 503 });
    }

    #[test]
    fn transport_failure_is_classified() {
        let client = ScriptedClient::answering(Err(UploadError::dns("no such host")));
        let status = uploader(client, "key").upload(&batch(), None);
        assert!(matches!(status, UploadStatus::DnsError { .. }));
    }

    #[test]
    fn unsendable_api_key_never_reaches_the_client() {
        for key in ["", "clé"] {
            let client = ScriptedClient::answering(Ok(202));
            let status = uploader(client.clone(), key).upload(&batch(), None);
            assert_eq!(status, UploadStatus::InvalidTokenError { code: None });
            assert!(client.seen.lock().is_empty());
        }
    }

    #[test]
    fn factory_failure_is_request_creation_error() {
        let client = ScriptedClient::answering(Ok(202));
        let uploader = DataUploader::new(
            client.clone(),
            Arc::new(FailingFactory),
            UploadContext::new("key", "rust", "0.3.0"),
            Duration::from_secs(45),
            Arc::new(NoOpLogger),
        );

        let status = uploader.upload(&batch(), None);
        assert!(matches!(status, UploadStatus::RequestCreationError { .. }));
        assert!(!status.should_retry());
        assert!(client.seen.lock().is_empty());
    }
}
