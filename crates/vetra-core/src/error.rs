//! Error types for the VETRA core.
//!
//! Only configuration-plane and lifecycle failures surface as errors here.
//! Data-plane anomalies (queue overflow, out-of-order samples, unknown
//! frames) are counters plus `warn` logs by design: the agent must always
//! preserve the next frame.

use thiserror::Error;

/// A specialized `Result` type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Top-level error type for the core plumbing.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CoreError {
    /// A worker was asked to start while already running
    #[error("worker '{name}' is already running")]
    AlreadyRunning {
        /// Name of the worker
        name: String,
    },

    /// A worker thread could not be spawned
    #[error("worker '{name}' failed to start: {reason}")]
    WorkerStart {
        /// Name of the worker
        name: String,
        /// Reason reported by the runtime
        reason: String,
    },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration error
        message: String,
    },

    /// Validation error for input data
    #[error("validation error: {message}")]
    Validation {
        /// Description of what validation failed
        message: String,
    },
}

impl CoreError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Returns `true` if retrying the failed operation can succeed later.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::AlreadyRunning { .. } | Self::WorkerStart { .. } => true,
            Self::Configuration { .. } | Self::Validation { .. } => false,
        }
    }
}
