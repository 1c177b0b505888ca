//! Error types for the vigil-model crate.

use thiserror::Error;

/// Errors that can occur while constructing model types.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A matcher could not be constructed.
    #[error("invalid matcher on label '{name}': {reason}")]
    InvalidMatcher {
        /// The label name the matcher applies to.
        name: String,
        /// Why the matcher is invalid.
        reason: String,
    },

    /// A severity string was not recognized.
    #[error("unknown severity: {value}")]
    UnknownSeverity {
        /// The unrecognized severity value.
        value: String,
    },
}

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;
