//! Error types for the operations engine

use dbops_store::{ConflictError, StoreError};
use dbops_types::{ClusterPhase, OpsType, SpecValidationError};
use thiserror::Error;

/// How the outer driver should treat an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Terminal; never retry
    Fatal,
    /// Re-invoke later without surfacing an error
    NeedWaiting,
    /// Default retry policy
    Retryable,
}

/// Engine error type
#[derive(Debug, Error)]
pub enum OpsError {
    /// No behaviour is registered for the type
    #[error("OpsRequest type {0} is not supported")]
    NotSupported(OpsType),

    /// The request is malformed or does not match the cluster
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Terminal failure caused by the system rather than the request
    #[error("{message}")]
    Fatal {
        reason: &'static str,
        message: String,
    },

    /// Admission must wait for the cluster to reach an allowed phase
    #[error("current cluster phase {current} is not in the expected phases {expected:?}")]
    WaitForClusterPhase {
        current: ClusterPhase,
        expected: Vec<ClusterPhase>,
    },

    /// A handler cannot make progress yet
    #[error("Need waiting: {0}")]
    NeedWaiting(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Opaque handler failure
    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Behaviour for {0} is already registered")]
    AlreadyRegistered(OpsType),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, OpsError>;

impl OpsError {
    pub fn fatal(reason: &'static str, message: impl Into<String>) -> Self {
        Self::Fatal {
            reason,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotSupported(_) | Self::Validation(_) | Self::Fatal { .. } => ErrorKind::Fatal,
            Self::WaitForClusterPhase { .. } | Self::NeedWaiting(_) => ErrorKind::NeedWaiting,
            Self::Store(_) | Self::Handler(_) | Self::AlreadyRegistered(_) | Self::Internal(_) => {
                ErrorKind::Retryable
            }
        }
    }
}

impl From<SpecValidationError> for OpsError {
    fn from(e: SpecValidationError) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<serde_json::Error> for OpsError {
    fn from(e: serde_json::Error) -> Self {
        Self::Store(StoreError::InvalidData(e.to_string()))
    }
}

impl ConflictError for OpsError {
    fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbops_types::{reason, ObjectKey};

    #[test]
    fn test_error_classification() {
        assert_eq!(
            OpsError::fatal(reason::QUEUE_FULL, "full").kind(),
            ErrorKind::Fatal
        );
        assert_eq!(
            OpsError::Validation("bad".into()).kind(),
            ErrorKind::Fatal
        );
        assert_eq!(
            OpsError::NeedWaiting("pods not ready".into()).kind(),
            ErrorKind::NeedWaiting
        );
        assert_eq!(
            OpsError::Handler("timeout".into()).kind(),
            ErrorKind::Retryable
        );
    }

    #[test]
    fn test_store_conflict_is_detected() {
        let err = OpsError::from(StoreError::Conflict {
            key: ObjectKey::new("default", "pg"),
            current: 3,
            expected: 2,
        });
        assert!(err.is_conflict());
        assert_eq!(err.kind(), ErrorKind::Retryable);
        assert!(!OpsError::Internal("x".into()).is_conflict());
    }
}
