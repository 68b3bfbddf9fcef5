//! Store errors

use thiserror::Error;

/// Errors that can occur when reading or writing stored resources
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// Name of the missing object
        name: String,
    },

    /// Create collided with an existing object
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Kind of the existing object
        kind: String,
        /// Name of the existing object
        name: String,
    },

    /// Write carried a stale resourceVersion
    #[error("Conflict writing {kind} {name}: object was modified concurrently")]
    Conflict {
        /// Kind of the written object
        kind: String,
        /// Name of the written object
        name: String,
    },

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object cannot be written as given (e.g. missing name)
    #[error("Invalid object: {0}")]
    InvalidObject(String),
}

impl StoreError {
    /// Whether re-reading and re-applying the change can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether the error means the object is gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
