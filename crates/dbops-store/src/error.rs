//! Store error types

use dbops_types::ObjectKey;
use thiserror::Error;

/// Store errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(ObjectKey),

    #[error("Object already exists: {0}")]
    AlreadyExists(ObjectKey),

    #[error("Version conflict on {key}: current {current}, expected {expected}")]
    Conflict {
        key: ObjectKey,
        current: u64,
        expected: u64,
    },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
