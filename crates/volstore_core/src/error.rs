//! Error types for volstore core.

use crate::entity::EntityKind;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in persistence operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Transport codec error.
    #[error("codec error: {0}")]
    Codec(#[from] volstore_codec::CodecError),

    /// Error raised by the relational engine. Propagated unwrapped.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A field name that is not declared for the entity kind.
    #[error("{kind} has no field named `{field}`")]
    UnknownField {
        /// Entity kind that was accessed.
        kind: EntityKind,
        /// The undeclared field name.
        field: String,
    },

    /// A value whose type does not match the declared field type.
    #[error("invalid value for {kind}.{field}: expected {expected}, found {found}")]
    InvalidFieldValue {
        /// Entity kind that was accessed.
        kind: EntityKind,
        /// Field name.
        field: String,
        /// Expected value type.
        expected: &'static str,
        /// Actual value type or description.
        found: String,
    },

    /// A required single record is absent.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Entity kind that was looked up.
        kind: EntityKind,
        /// Identifier that was looked up.
        id: String,
    },

    /// A create collided with an existing primary identifier.
    #[error("{kind} {id} already exists")]
    DuplicateIdentifier {
        /// Entity kind being created.
        kind: EntityKind,
        /// Identifier that collided.
        id: String,
    },

    /// Stored schema is older than expected and migrations are disabled.
    #[error("schema version {found} is older than required version {expected}")]
    SchemaVersion {
        /// Version recorded in the database.
        found: u32,
        /// Version this build requires.
        expected: u32,
    },

    /// Unknown storage kind, missing connection string or unsupported engine.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        /// Description of the problem.
        message: String,
    },

    /// Custom attributes cannot be applied to the shared default classification.
    #[error("cannot update classification {id}: {message}")]
    ClassificationUpdate {
        /// Classification identifier.
        id: String,
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates an unknown field error.
    pub fn unknown_field(kind: EntityKind, field: impl Into<String>) -> Self {
        Self::UnknownField {
            kind,
            field: field.into(),
        }
    }

    /// Creates an invalid field value error.
    pub fn invalid_field_value(
        kind: EntityKind,
        field: impl Into<String>,
        expected: &'static str,
        found: impl Into<String>,
    ) -> Self {
        Self::InvalidFieldValue {
            kind,
            field: field.into(),
            expected,
            found: found.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Creates a duplicate identifier error.
    pub fn duplicate(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::DuplicateIdentifier {
            kind,
            id: id.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Creates a classification update error.
    pub fn classification_update(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ClassificationUpdate {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Whether this is a `NotFound` error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this is a `DuplicateIdentifier` error.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateIdentifier { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::not_found(EntityKind::Volume, "fake-uuid");
        assert_eq!(err.to_string(), "Volume fake-uuid not found");
        assert!(err.is_not_found());

        let err = CoreError::unknown_field(EntityKind::Snapshot, "colour");
        assert!(err.to_string().contains("`colour`"));

        let err = CoreError::SchemaVersion {
            found: 1,
            expected: 2,
        };
        assert!(err.to_string().contains("older"));
    }

    #[test]
    fn duplicate_predicate() {
        let err = CoreError::duplicate(EntityKind::Volume, "abc");
        assert!(err.is_duplicate());
        assert!(!err.is_not_found());
    }
}
