//! Error types for Fuse state

use thiserror::Error;

/// Main error type for Fuse state
#[derive(Error, Debug)]
pub enum FuseError {
    // ============ Storage Errors ============
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Duplicate document {id} in collection {collection}")]
    DuplicateDocument { collection: String, id: String },

    // ============ State Errors ============
    #[error("Invalid state entry at {key}: {reason}")]
    InvalidEntry { key: String, reason: String },

    #[error("Version conflict for {key}: expected {expected}, got {actual}")]
    VersionConflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    // ============ Serialization Errors ============
    #[error("Serialization failed: {0}")]
    Serialization(String),

    // ============ Configuration Errors ============
    #[error("Configuration error: {0}")]
    Config(String),

    // ============ General Errors ============
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FuseError {
    pub fn storage(err: impl ToString) -> Self {
        FuseError::Storage(err.to_string())
    }

    pub fn invalid_entry(key: impl Into<String>, reason: impl ToString) -> Self {
        FuseError::InvalidEntry {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    pub fn version_conflict(key: impl Into<String>, expected: u64, actual: u64) -> Self {
        FuseError::VersionConflict {
            key: key.into(),
            expected,
            actual,
        }
    }
}

impl From<std::io::Error> for FuseError {
    fn from(err: std::io::Error) -> Self {
        FuseError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for FuseError {
    fn from(err: serde_json::Error) -> Self {
        FuseError::Serialization(err.to_string())
    }
}
