use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResmonError {
    #[error("Unsupported OS platform: {0}")]
    PlatformUnsupported(String),

    #[error("Failed to parse sample: {0}")]
    SampleParse(String),

    #[error("Command '{command}' failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Command '{command}' timed out after {timeout:?}")]
    CommandTimeout { command: String, timeout: Duration },

    #[error("Variable not found: {0}")]
    VariableNotFound(String),

    #[error("Duplicate metric definition: {0}")]
    DuplicateMetric(String),

    #[error("Backend '{backend}' failed to initialize: {reason}")]
    BackendInit { backend: String, reason: String },

    #[error("Backend '{backend}' failed to publish '{metric}': {reason}")]
    BackendPublish {
        backend: String,
        metric: String,
        reason: String,
    },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ResmonError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::SampleParse(message.into())
    }

    pub fn backend_init(backend: impl Into<String>, reason: impl ToString) -> Self {
        Self::BackendInit {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the next sampling cycle can be expected to succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::PlatformUnsupported(_))
    }
}

pub type Result<T> = std::result::Result<T, ResmonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_unsupported_is_not_retryable() {
        assert!(!ResmonError::PlatformUnsupported("plan9".to_string()).is_retryable());
        assert!(ResmonError::parse("bad column").is_retryable());
        assert!(ResmonError::CommandTimeout {
            command: "free -m".to_string(),
            timeout: Duration::from_secs(2),
        }
        .is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = ResmonError::backend_init("prometheus", "address in use");
        assert_eq!(
            err.to_string(),
            "Backend 'prometheus' failed to initialize: address in use"
        );
    }
}
