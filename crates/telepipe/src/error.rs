//! Error types for the pipeline facade.

use thiserror::Error;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors returned by [`Pipeline`](crate::Pipeline).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Persistence layer error.
    #[error(transparent)]
    Core(#[from] telepipe_core::CoreError),

    /// Upload layer error.
    #[error(transparent)]
    Upload(#[from] telepipe_upload::UploadError),

    /// A feature with this name is already registered.
    #[error("feature {name:?} is already registered")]
    FeatureAlreadyRegistered {
        /// Feature name.
        name: String,
    },

    /// No feature with this name is registered.
    #[error("unknown feature {name:?}")]
    UnknownFeature {
        /// Feature name.
        name: String,
    },

    /// The pipeline was stopped.
    #[error("pipeline is stopped")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = PipelineError::FeatureAlreadyRegistered {
            name: "logs".into(),
        };
        assert_eq!(err.to_string(), "feature \"logs\" is already registered");
        assert_eq!(PipelineError::Stopped.to_string(), "pipeline is stopped");

        let err: PipelineError = telepipe_core::CoreError::ExecutorClosed.into();
        assert_eq!(err.to_string(), "executor is shut down");
    }
}
