//! Error taxonomy for the pipeline.
//!
//! Every component catches failures at its boundary and turns them into
//! `error: Option<String>` view state; nothing here is thrown into the
//! rendering layer.

/// How a failure should be treated by the component that observed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Stream drop or network failure; retried locally up to a bound.
    Transient,
    /// Bad JSON or unexpected shape; the offending unit is discarded.
    Malformed,
    /// Retries exhausted or worker gone; surfaced with a manual fallback.
    Terminal,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("HTTP error: {status} ({message})")]
    Http { status: u16, message: String },

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Worker unavailable")]
    WorkerUnavailable,

    #[error("Correlation id already in flight: {0}")]
    DuplicateCorrelationId(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transport(_) | Self::Cache(_) | Self::Cancelled => ErrorClass::Transient,
            Self::Http { status, .. } if *status >= 500 || *status == 429 => ErrorClass::Transient,
            Self::Http { .. } | Self::Malformed(_) | Self::Worker(_) => ErrorClass::Malformed,
            Self::WorkerUnavailable
            | Self::DuplicateCorrelationId(_)
            | Self::ServiceUnavailable(_) => ErrorClass::Terminal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(value: serde_json::Error) -> Self {
        Self::Malformed(value.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse env var {key}={value}: {reason}")]
    InvalidEnv {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            PipelineError::Transport("reset".into()).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            PipelineError::Http {
                status: 503,
                message: "down".into()
            }
            .class(),
            ErrorClass::Transient
        );
        assert_eq!(
            PipelineError::Http {
                status: 404,
                message: "missing".into()
            }
            .class(),
            ErrorClass::Malformed
        );
        assert_eq!(
            PipelineError::ServiceUnavailable("retries exhausted".into()).class(),
            ErrorClass::Terminal
        );
    }

    #[test]
    fn test_json_errors_are_malformed() {
        let err: PipelineError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert_eq!(err.class(), ErrorClass::Malformed);
        assert!(err.to_string().starts_with("Malformed payload"));
    }
}
