//! Error types for the model run execution pipeline

/// Main error type for model run execution
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("resource not found: {resource}")]
    ResourceNotFound { resource: String },

    #[error("invalid model: {message}")]
    InvalidModel { message: String },

    #[error("model engine failed: {message}")]
    EngineFailure { message: String },

    #[error("output packaging failed: {message}")]
    PackagingError { message: String },

    #[error("cortical image rendering failed: {message}")]
    RenderError { message: String },

    #[error("data store error: {message}")]
    Store { message: String },

    #[error("queue error: {message}")]
    Queue { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("logging initialization failed: {message}")]
    Logging { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorkerError {
    /// Get the error type as a string for categorization
    pub fn error_type(&self) -> &'static str {
        match self {
            WorkerError::ResourceNotFound { .. } => "resource_not_found",
            WorkerError::InvalidModel { .. } => "invalid_model",
            WorkerError::EngineFailure { .. } => "engine_failure",
            WorkerError::PackagingError { .. } => "packaging_error",
            WorkerError::RenderError { .. } => "render_error",
            WorkerError::Store { .. } => "store_error",
            WorkerError::Queue { .. } => "queue_error",
            WorkerError::Config { .. } => "config_error",
            WorkerError::Logging { .. } => "logging_error",
            WorkerError::Io(_) => "io_error",
            WorkerError::Serialization(_) => "serialization_error",
        }
    }

    /// Check whether this error is fatal to the current job only.
    ///
    /// Job-fatal errors are caught at the executor boundary and converted
    /// into a FAILED state transition. Everything else is an infrastructure
    /// failure: no state transition can be recorded safely, so it propagates
    /// to the caller and the delivery is left for external redelivery.
    pub fn is_job_fatal(&self) -> bool {
        matches!(
            self,
            WorkerError::ResourceNotFound { .. }
                | WorkerError::InvalidModel { .. }
                | WorkerError::EngineFailure { .. }
                | WorkerError::PackagingError { .. }
                | WorkerError::RenderError { .. }
        )
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_types() {
        let error = WorkerError::InvalidModel {
            message: "no such model".to_string(),
        };
        assert_eq!(error.error_type(), "invalid_model");
        assert!(error.is_job_fatal());
    }

    #[test]
    fn test_infrastructure_errors_are_not_job_fatal() {
        let error = WorkerError::Store {
            message: "connection refused".to_string(),
        };
        assert!(!error.is_job_fatal());

        let error = WorkerError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        assert!(!error.is_job_fatal());
    }

    #[test]
    fn test_job_fatal_taxonomy() {
        let errors = [
            WorkerError::ResourceNotFound {
                resource: "subject s1".to_string(),
            },
            WorkerError::EngineFailure {
                message: "engine crashed".to_string(),
            },
            WorkerError::PackagingError {
                message: "prediction volume missing".to_string(),
            },
            WorkerError::RenderError {
                message: "stimulus index out of range".to_string(),
            },
        ];
        for error in errors {
            assert!(error.is_job_fatal(), "{} should be job-fatal", error);
        }
    }
}
