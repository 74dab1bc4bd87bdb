//! Value tags.

use crate::error::CodecError;
use std::fmt;

/// The type tag carried by every encoded value.
///
/// The tag alone decides the representation: a value tagged [`Tag::Double`]
/// is a double even if it holds `1.0`, and an [`Tag::Unsigned`] never turns
/// into a signed integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// JSON-style `null`.
    Null,
    /// No value at all. Distinct from `Null` on the wire.
    Undefined,
    /// `true` or `false`.
    Bool,
    /// Signed 64-bit integer.
    Int,
    /// Unsigned 64-bit integer.
    Unsigned,
    /// Double-precision float.
    Double,
    /// Single-precision float.
    Float,
    /// UTF-8 string.
    String,
    /// Opaque bytes.
    Binary,
    /// Ordered sequence of values.
    Array,
    /// String-keyed mapping in storage order.
    Dict,
}

pub(crate) const TAG_NULL: u8 = 0x00;
pub(crate) const TAG_UNDEFINED: u8 = 0x01;
pub(crate) const TAG_FALSE: u8 = 0x02;
pub(crate) const TAG_TRUE: u8 = 0x03;
pub(crate) const TAG_INT: u8 = 0x04;
pub(crate) const TAG_UNSIGNED: u8 = 0x05;
pub(crate) const TAG_DOUBLE: u8 = 0x06;
pub(crate) const TAG_FLOAT: u8 = 0x07;
pub(crate) const TAG_STRING: u8 = 0x08;
pub(crate) const TAG_BINARY: u8 = 0x09;
pub(crate) const TAG_ARRAY: u8 = 0x0a;
pub(crate) const TAG_DICT: u8 = 0x0b;

impl Tag {
    /// Returns true for arrays and dicts.
    pub fn is_composite(self) -> bool {
        matches!(self, Tag::Array | Tag::Dict)
    }

    /// Returns true for the numeric tags.
    pub fn is_number(self) -> bool {
        matches!(self, Tag::Int | Tag::Unsigned | Tag::Double | Tag::Float)
    }

    /// Lowercase name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            Tag::Null => "null",
            Tag::Undefined => "undefined",
            Tag::Bool => "bool",
            Tag::Int => "int",
            Tag::Unsigned => "unsigned",
            Tag::Double => "double",
            Tag::Float => "float",
            Tag::String => "string",
            Tag::Binary => "binary",
            Tag::Array => "array",
            Tag::Dict => "dict",
        }
    }
}

impl TryFrom<u8> for Tag {
    type Error = CodecError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            TAG_NULL => Ok(Tag::Null),
            TAG_UNDEFINED => Ok(Tag::Undefined),
            TAG_FALSE | TAG_TRUE => Ok(Tag::Bool),
            TAG_INT => Ok(Tag::Int),
            TAG_UNSIGNED => Ok(Tag::Unsigned),
            TAG_DOUBLE => Ok(Tag::Double),
            TAG_FLOAT => Ok(Tag::Float),
            TAG_STRING => Ok(Tag::String),
            TAG_BINARY => Ok(Tag::Binary),
            TAG_ARRAY => Ok(Tag::Array),
            TAG_DICT => Ok(Tag::Dict),
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
