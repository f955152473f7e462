//! Error types for the rule engine core.

/// Errors produced by rule validation and payload (de)serialization.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The rule failed validation and must not be persisted.
    #[error("Invalid rule: {message}")]
    InvalidRule {
        /// Description of the first failed check.
        message: String,
    },

    /// A rule or payload could not be serialized or deserialized.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a new `InvalidRule` error.
    #[must_use]
    pub fn invalid_rule(message: impl Into<String>) -> Self {
        Self::InvalidRule {
            message: message.into(),
        }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a validation error.
    #[must_use]
    pub fn is_invalid_rule(&self) -> bool {
        matches!(self, Self::InvalidRule { .. })
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
