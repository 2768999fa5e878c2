//! Error types for the CAN side.
//!
//! These cover the configuration plane only: a malformed decoder manifest is
//! rejected and the previous dictionary kept. Per-frame decode failures are
//! counters plus `warn` logs, never errors.

use thiserror::Error;

use vetra_core::SignalId;

/// A specialized `Result` type for CAN configuration operations.
pub type CanResult<T> = Result<T, CanError>;

/// Errors raised while ingesting a decoder manifest.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CanError {
    /// The manifest document is structurally unusable
    #[error("invalid decoder manifest: {message}")]
    InvalidManifest {
        /// Description of the problem
        message: String,
    },

    /// A signal format inside a message is unusable
    #[error("signal {signal_id} in message {message_id:#x}: {reason}")]
    InvalidSignalFormat {
        /// Offending signal id
        signal_id: SignalId,
        /// Message the signal belongs to
        message_id: u32,
        /// Why the format was rejected
        reason: String,
    },
}

impl CanError {
    /// Creates a new invalid-manifest error.
    #[must_use]
    pub fn invalid_manifest(message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            message: message.into(),
        }
    }
}
