//! Error types for the vigil-engine crate.
//!
//! The taxonomy separates conditions by blast radius: configuration errors
//! are fatal at load, batch errors reject one ingestion call, and delivery
//! errors are recorded per receiver without ever propagating as process
//! failures. An alert that matches no route is a logged, counted condition
//! rather than an error variant.

use thiserror::Error;
use vigil_model::ModelError;

/// Errors that can occur in the alert routing engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid routing or inhibition configuration. Fatal at load.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Why the configuration is invalid.
        reason: String,
    },

    /// A route references a receiver that is not registered.
    #[error("unknown receiver: {name}")]
    UnknownReceiver {
        /// The missing receiver name.
        name: String,
    },

    /// Invalid silence specification.
    #[error("invalid silence: {reason}")]
    InvalidSilence {
        /// Why the silence is invalid.
        reason: String,
    },

    /// An ingestion batch was malformed and rejected wholesale.
    #[error("invalid alert batch: {reason}")]
    InvalidBatch {
        /// Which event failed validation and why.
        reason: String,
    },

    /// A notifier exhausted its retries or failed permanently.
    #[error("delivery to '{receiver}' failed: {reason}")]
    DeliveryFailed {
        /// The receiver whose notifier failed.
        receiver: String,
        /// The failure reported by the notifier.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Error from the model layer (e.g. an invalid matcher).
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_config() {
        let err = EngineError::InvalidConfig {
            reason: "root route must name a receiver".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid configuration: root route must name a receiver"
        );
    }

    #[test]
    fn error_display_unknown_receiver() {
        let err = EngineError::UnknownReceiver {
            name: "pager".to_string(),
        };
        assert_eq!(err.to_string(), "unknown receiver: pager");
    }

    #[test]
    fn error_display_invalid_batch() {
        let err = EngineError::InvalidBatch {
            reason: "event 3: empty label set".to_string(),
        };
        assert_eq!(err.to_string(), "invalid alert batch: event 3: empty label set");
    }

    #[test]
    fn error_display_delivery_failed() {
        let err = EngineError::DeliveryFailed {
            receiver: "ops".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "delivery to 'ops' failed: connection refused");
    }

    #[test]
    fn error_from_model_error() {
        let model_err = ModelError::UnknownSeverity {
            value: "page".to_string(),
        };
        let err: EngineError = model_err.into();
        assert!(matches!(err, EngineError::Model(_)));
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<String>("not json");
        assert!(json_err.is_err());
        let err: EngineError = json_err.unwrap_err().into();
        assert!(matches!(err, EngineError::Serialization(_)));
    }
}
