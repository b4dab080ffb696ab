//! Error types for querent.
//!
//! Every failure surfaces as one [`Error`] variant. Driver failures are mapped
//! onto this taxonomy by [`crate::adapter::normalize`]; validation and
//! association failures come from callers and pass through unchanged.

use thiserror::Error;

/// The main error type for querent operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Uncategorized failure: connectivity, syntax, protocol.
    #[error("{0}")]
    Unexpected(String),

    /// A change set rejected its input.
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// A read expected a row and found none.
    #[error("{0}")]
    NotFound(String),

    /// A uniqueness constraint rejected a write.
    #[error("{message}")]
    Duplicate {
        message: String,
        field: Option<String>,
    },

    /// A relational-integrity failure reported by a collaborator.
    #[error("{message}")]
    Association {
        message: String,
        field: Option<String>,
    },

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unexpected,
    Validation,
    NotFound,
    Duplicate,
    Association,
}

impl Error {
    /// Create a validation error for the given field.
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: non_empty(field.into()),
        }
    }

    /// Create a duplicate error, optionally naming the offending field.
    pub fn duplicate(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Duplicate {
            message: message.into(),
            field: non_empty(field.into()),
        }
    }

    /// Create an association error for the given field.
    pub fn association(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Association {
            message: message.into(),
            field: non_empty(field.into()),
        }
    }

    /// Category of this error. Configuration and IO failures are unexpected.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Duplicate { .. } => ErrorKind::Duplicate,
            Self::Association { .. } => ErrorKind::Association,
            Self::Unexpected(_) | Self::Config(_) | Self::Io(_) => ErrorKind::Unexpected,
        }
    }

    /// Field the error is attached to, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. }
            | Self::Duplicate { field, .. }
            | Self::Association { field, .. } => field.as_deref(),
            _ => None,
        }
    }

    pub fn is_unexpected(&self) -> bool {
        self.kind() == ErrorKind::Unexpected
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_duplicate(&self) -> bool {
        self.kind() == ErrorKind::Duplicate
    }

    pub fn is_association(&self) -> bool {
        self.kind() == ErrorKind::Association
    }
}

fn non_empty(field: String) -> Option<String> {
    if field.is_empty() { None } else { Some(field) }
}

/// Result type alias for querent operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_is_message() {
        let err = Error::duplicate("Duplicate entry 'a' for key 'name'", "name");
        assert_eq!(err.to_string(), "Duplicate entry 'a' for key 'name'");
        assert_eq!(err.field(), Some("name"));
    }

    #[test]
    fn test_error_kinds() {
        assert!(Error::Unexpected("boom".into()).is_unexpected());
        assert!(Error::NotFound("no rows".into()).is_not_found());
        assert!(Error::duplicate("dup", "").is_duplicate());
        assert!(Error::validation("required", "name").is_validation());
        assert!(Error::association("missing parent", "user_id").is_association());
        assert!(Error::Config("bad".into()).is_unexpected());
    }

    #[test]
    fn test_empty_field_is_none() {
        assert_eq!(Error::duplicate("dup", "").field(), None);
    }
}
