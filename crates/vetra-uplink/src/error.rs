//! Error types for the uplink boundary.

use thiserror::Error;

/// A specialized `Result` type for uplink operations.
pub type UplinkResult<T> = Result<T, UplinkError>;

/// Errors surfaced by the uplink boundary.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UplinkError {
    /// The transport rejected or failed a publish
    #[error("publish failed: {message}")]
    Publish {
        /// Transport-reported reason
        message: String,
    },

    /// The transport is not connected yet
    #[error("publisher not connected")]
    NotConnected,

    /// Payload serialization failed
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl UplinkError {
    /// Creates a new publish error.
    #[must_use]
    pub fn publish(message: impl Into<String>) -> Self {
        Self::Publish {
            message: message.into(),
        }
    }

    /// Returns `true` when a later retry can succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Publish { .. } | Self::NotConnected => true,
            Self::Serialize(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(UplinkError::publish("broker unavailable").is_recoverable());
        assert!(UplinkError::NotConnected.is_recoverable());
    }
}
