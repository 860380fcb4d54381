//! Error types for the ember learned-cardinality subsystem.
//!
//! Public prediction and training entry points never surface these errors:
//! they degrade to the 0 sentinel ("use the engine estimate") or to a silent
//! no-op. The `Result` type is used at the booster layer, where the model
//! catches failures and decides how to degrade.

use thiserror::Error;

/// The primary error type for ember operations.
#[derive(Error, Debug)]
pub enum EmberError {
    /// A feature row does not match the width the booster was built with.
    #[error("feature width mismatch: got {got}, expected {expected}")]
    FeatureWidth { got: usize, expected: usize },

    /// Booster training error
    #[error("training error: {message}")]
    Training { message: String },

    /// Booster inference error
    #[error("inference error: {message}")]
    Inference { message: String },

    /// Booster snapshot (de)serialization error
    #[error("snapshot error: {message}")]
    Snapshot { message: String },

    /// Internal error (bug in the subsystem)
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl EmberError {
    /// Create a training error.
    pub fn training(message: impl Into<String>) -> Self {
        Self::Training {
            message: message.into(),
        }
    }

    /// Create an inference error.
    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference {
            message: message.into(),
        }
    }

    /// Create a snapshot error.
    pub fn snapshot(message: impl Into<String>) -> Self {
        Self::Snapshot {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for EmberError {
    fn from(err: serde_json::Error) -> Self {
        Self::Snapshot {
            message: err.to_string(),
        }
    }
}

/// Result type alias for ember operations.
pub type Result<T> = std::result::Result<T, EmberError>;
