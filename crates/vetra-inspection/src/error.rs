//! Error types for campaign ingestion and expression parsing.
//!
//! All of these are configuration-plane: a campaign document that fails to
//! parse is rejected and the previous campaign set stays active. Evaluation
//! anomalies (type mismatches, undefined operands) are counters, not errors.

use thiserror::Error;

/// A specialized `Result` type for inspection configuration operations.
pub type InspectionResult<T> = Result<T, InspectionError>;

/// Errors raised while ingesting a campaign document.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum InspectionError {
    /// The condition expression failed to parse
    #[error("expression syntax error at offset {position}: {message}")]
    ExpressionSyntax {
        /// Byte offset of the failure in the expression text
        position: usize,
        /// Description of the failure
        message: String,
    },

    /// A signal name in the document has no id mapping
    #[error("unknown signal name '{name}'")]
    UnknownSignal {
        /// The unresolvable name
        name: String,
    },

    /// The campaign document is structurally unusable
    #[error("invalid campaign document: {message}")]
    InvalidCampaign {
        /// Description of the problem
        message: String,
    },

    /// The condition language version is not supported
    #[error("unsupported condition language version {version}")]
    UnsupportedLanguageVersion {
        /// Version the document asked for
        version: u32,
    },
}

impl InspectionError {
    /// Creates a new syntax error.
    #[must_use]
    pub fn syntax(position: usize, message: impl Into<String>) -> Self {
        Self::ExpressionSyntax {
            position,
            message: message.into(),
        }
    }

    /// Creates a new invalid-campaign error.
    #[must_use]
    pub fn invalid_campaign(message: impl Into<String>) -> Self {
        Self::InvalidCampaign {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = InspectionError::syntax(12, "expected ')'");
        assert!(err.to_string().contains("offset 12"));
        assert!(InspectionError::UnknownSignal {
            name: "Vehicle.Missing".into()
        }
        .to_string()
        .contains("Vehicle.Missing"));
    }
}
