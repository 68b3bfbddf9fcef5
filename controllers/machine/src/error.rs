//! Controller-specific error types.
//!
//! Unresolved references and `Unknown` conditions are recorded on the
//! resources themselves and never surface here. These errors are faults:
//! the store or the API server could not be reached, or the process was
//! misconfigured.

use machine_store::StoreError;
use thiserror::Error;

/// Errors that can occur in the Machine Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Store read or write failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Admission webhook server failed
    #[error("Webhook server failed: {0}")]
    Webhook(String),

    /// Every attempt of a pass hit a stale resourceVersion
    #[error("Gave up on {kind} {name} after {attempts} conflicting writes")]
    ConflictRetriesExhausted {
        kind: &'static str,
        name: String,
        attempts: u32,
    },
}
