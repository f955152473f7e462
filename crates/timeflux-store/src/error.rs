//! Error types shared by all rule store backends.

use std::fmt;

/// Errors that can occur during rule store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The caller passed an invalid workspace id, rule id or rule.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of what was invalid.
        message: String,
    },

    /// A stored rule document could not be serialized or deserialized.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// The backing store could not be reached.
    ///
    /// Backends must surface connectivity failures with this variant and
    /// never silently return empty results.
    #[error("Store unavailable: {message}")]
    Unavailable {
        /// Description of the connectivity failure.
        message: String,
    },

    /// An internal store error occurred.
    #[error("Internal store error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StoreError {
    /// Creates a new `InvalidArgument` error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
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

    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is an invalid argument error.
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }

    /// Returns `true` if this is an unavailability error.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidArgument { .. } => ErrorCategory::Validation,
            Self::Serialization { .. } => ErrorCategory::Serialization,
            Self::Unavailable { .. } => ErrorCategory::Infrastructure,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Categories of store errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Caller-side validation error.
    Validation,
    /// Serialization/deserialization error.
    Serialization,
    /// Infrastructure/connection error.
    Infrastructure,
    /// Internal error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Serialization => write!(f, "serialization"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::invalid_argument("workspace id is blank");
        assert_eq!(err.to_string(), "Invalid argument: workspace id is blank");

        let err = StoreError::unavailable("connection refused");
        assert_eq!(err.to_string(), "Store unavailable: connection refused");
    }

    #[test]
    fn test_error_predicates() {
        let err = StoreError::invalid_argument("bad");
        assert!(err.is_invalid_argument());
        assert!(!err.is_unavailable());

        let err = StoreError::unavailable("down");
        assert!(err.is_unavailable());
        assert!(!err.is_invalid_argument());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            StoreError::invalid_argument("bad").category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            StoreError::serialization("truncated").category(),
            ErrorCategory::Serialization
        );
        assert_eq!(
            StoreError::unavailable("down").category(),
            ErrorCategory::Infrastructure
        );
        assert_eq!(StoreError::internal("bug").category(), ErrorCategory::Internal);
        assert_eq!(ErrorCategory::Infrastructure.to_string(), "infrastructure");
    }

    #[test]
    fn test_from_serde_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: StoreError = parse_err.into();
        assert_eq!(err.category(), ErrorCategory::Serialization);
    }
}
