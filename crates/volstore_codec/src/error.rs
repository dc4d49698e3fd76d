//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding transport documents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode bytes or text into a value.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// Float values are not part of the transport model.
    #[error("float values are not supported in transport documents")]
    FloatForbidden,

    /// A timestamp string could not be parsed.
    #[error("invalid timestamp: {value}")]
    InvalidTimestamp {
        /// The offending text.
        value: String,
    },

    /// A transport document has no `class` entry.
    #[error("transport document has no class")]
    MissingClass,

    /// A value had a different shape than required.
    #[error("expected {expected}, found {found}")]
    UnexpectedType {
        /// What the caller required.
        expected: &'static str,
        /// What was actually present.
        found: &'static str,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create an invalid timestamp error.
    pub fn invalid_timestamp(value: impl Into<String>) -> Self {
        Self::InvalidTimestamp {
            value: value.into(),
        }
    }

    /// Create an unexpected type error.
    pub fn unexpected_type(expected: &'static str, found: &'static str) -> Self {
        Self::UnexpectedType { expected, found }
    }
}
