//! Error types for the codec crate.

use crate::tag::Tag;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while reading or writing encoded values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A tag byte that is not part of the format.
    #[error("unknown value tag 0x{0:02x}")]
    UnknownTag(u8),

    /// Invalid UTF-8 in a string or dict key.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// A typed accessor was used on a value of another type.
    #[error("type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        /// What the caller asked for.
        expected: &'static str,
        /// The tag actually present.
        actual: Tag,
    },

    /// Structurally invalid buffer.
    #[error("invalid structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },

    /// A length field exceeds what the format or the reader accepts.
    #[error("size limit exceeded: {claimed} > {max_allowed}")]
    SizeLimitExceeded {
        /// Length claimed by the input.
        claimed: u64,
        /// Maximum accepted length.
        max_allowed: u64,
    },

    /// Bytes remain after the root value.
    #[error("{0} trailing bytes after root value")]
    TrailingData(usize),

    /// Containers nested deeper than the validator accepts.
    #[error("nesting deeper than {0} levels")]
    NestingTooDeep(usize),

    /// The encoder was driven incorrectly.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },
}

impl CodecError {
    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a type mismatch error.
    pub fn type_mismatch(expected: &'static str, actual: Tag) -> Self {
        Self::TypeMismatch { expected, actual }
    }
}
