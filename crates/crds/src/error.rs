//! Validation errors raised at the API-write boundary

use thiserror::Error;

/// Errors returned synchronously when a write is rejected
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A `noupdate` field changed after the object was initialized
    #[error("{kind} field {field} cannot be changed once the object is initialized")]
    ImmutableField {
        /// Kind of the rejected object
        kind: &'static str,
        /// Wire name of the field
        field: &'static str,
    },

    /// A reference field does not hold a valid object name
    #[error("{field} is not a valid {kind} reference ({value:?}): {reason}")]
    MalformedReference {
        /// Wire name of the field
        field: &'static str,
        /// Referenced kind
        kind: &'static str,
        /// Offending value
        value: String,
        /// Why the value was rejected
        reason: String,
    },

    /// A field annotation tag could not be parsed
    #[error("Malformed field tag {0:?}")]
    MalformedTag(String),

    /// Builtin drivers are protected from normal clients
    #[error("MachineDriver {name} is builtin and cannot be {action}")]
    BuiltinDriver {
        /// Driver name
        name: String,
        /// Rejected action (e.g. "deleted", "modified (url)")
        action: String,
    },

    /// Inactive drivers cannot be selected by new templates
    #[error("MachineDriver {0} is not active and cannot be selected")]
    InactiveDriver(String),

    /// Object could not be serialized for field comparison
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
