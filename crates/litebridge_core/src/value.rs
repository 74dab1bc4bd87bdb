//! Host-side values.

use crate::blob::BlobRef;
use crate::error::BridgeResult;
use crate::lazy::{LazyArray, LazyDict};
use bytes::Bytes;
use indexmap::IndexMap;
use std::cmp::Ordering;

/// A decoded value.
///
/// Numeric variants follow the encoded tag exactly. `Null` and `Undefined`
/// both decode to [`HostValue::None`]; the distinction is still visible on
/// the [`ValueView`](litebridge_codec::ValueView) itself.
#[derive(Debug, Clone)]
pub enum HostValue {
    /// Null or undefined.
    None,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    Unsigned(u64),
    /// Double-precision float.
    Double(f64),
    /// Single-precision float.
    Float(f32),
    /// String.
    String(String),
    /// Opaque bytes.
    Binary(Bytes),
    /// Fully decoded array.
    Array(Vec<HostValue>),
    /// Fully decoded dict, in storage order.
    Dict(IndexMap<String, HostValue>),
    /// Array decoded on first access.
    LazyArray(LazyArray),
    /// Dict decoded on first access.
    LazyDict(LazyDict),
    /// Reference to blob content.
    Blob(BlobRef),
}

impl HostValue {
    /// Builds an array.
    pub fn array<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<HostValue>,
    {
        Self::Array(items.into_iter().map(Into::into).collect())
    }

    /// Builds a dict, keeping the given order.
    pub fn dict<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<HostValue>,
    {
        Self::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Name of the value's kind. Lazy containers report their content kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Unsigned(_) => "unsigned",
            Self::Double(_) => "double",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Binary(_) => "binary",
            Self::Array(_) | Self::LazyArray(_) => "array",
            Self::Dict(_) | Self::LazyDict(_) => "dict",
            Self::Blob(_) => "blob",
        }
    }

    /// True for [`HostValue::None`].
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// True for lazy containers not yet decoded.
    pub fn is_unresolved(&self) -> bool {
        match self {
            Self::LazyArray(lazy) => !lazy.is_resolved(),
            Self::LazyDict(lazy) => !lazy.is_resolved(),
            _ => false,
        }
    }

    /// The boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The signed integer, if this is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// The unsigned integer, if this is one.
    pub fn as_unsigned(&self) -> Option<u64> {
        match self {
            Self::Unsigned(n) => Some(*n),
            _ => None,
        }
    }

    /// Any numeric variant widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Unsigned(n) => Some(*n as f64),
            Self::Double(n) => Some(*n),
            Self::Float(n) => Some(f64::from(*n)),
            _ => None,
        }
    }

    /// The string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// The bytes, if this is binary.
    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Self::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// The blob, if this is one.
    pub fn as_blob(&self) -> Option<&BlobRef> {
        match self {
            Self::Blob(blob) => Some(blob),
            _ => None,
        }
    }

    /// The items of an array, resolving a lazy one.
    ///
    /// # Errors
    ///
    /// Returns the resolution error of a lazy array.
    pub fn as_array(&self) -> BridgeResult<Option<&[HostValue]>> {
        match self {
            Self::Array(items) => Ok(Some(items.as_slice())),
            Self::LazyArray(lazy) => lazy.resolved().map(Some),
            _ => Ok(None),
        }
    }

    /// The entries of a dict, resolving a lazy one.
    ///
    /// # Errors
    ///
    /// Returns the resolution error of a lazy dict.
    pub fn as_dict(&self) -> BridgeResult<Option<&IndexMap<String, HostValue>>> {
        match self {
            Self::Dict(entries) => Ok(Some(entries)),
            Self::LazyDict(lazy) => lazy.resolved().map(Some),
            _ => Ok(None),
        }
    }

    /// Looks up `key` in a dict. `Ok(None)` for missing keys and non-dicts.
    pub fn get(&self, key: &str) -> BridgeResult<Option<&HostValue>> {
        Ok(self.as_dict()?.and_then(|entries| entries.get(key)))
    }

    /// The item at `index` of an array. `Ok(None)` past the end and for non-arrays.
    pub fn item(&self, index: usize) -> BridgeResult<Option<&HostValue>> {
        Ok(self.as_array()?.and_then(|items| items.get(index)))
    }

    /// A copy with every lazy container resolved, recursively.
    ///
    /// # Errors
    ///
    /// Returns the first resolution error.
    pub fn resolve_all(&self) -> BridgeResult<HostValue> {
        Ok(match self {
            Self::Array(_) | Self::LazyArray(_) => {
                let items = self.as_array()?.unwrap_or_default();
                Self::Array(
                    items
                        .iter()
                        .map(Self::resolve_all)
                        .collect::<BridgeResult<_>>()?,
                )
            }
            Self::Dict(_) | Self::LazyDict(_) => {
                let mut entries = IndexMap::new();
                if let Some(map) = self.as_dict()? {
                    entries.reserve(map.len());
                    for (key, value) in map {
                        entries.insert(key.clone(), value.resolve_all()?);
                    }
                }
                Self::Dict(entries)
            }
            other => other.clone(),
        })
    }

    fn array_items(&self) -> Option<&[HostValue]> {
        self.as_array().ok().flatten()
    }

    fn dict_entries(&self) -> Option<&IndexMap<String, HostValue>> {
        self.as_dict().ok().flatten()
    }
}

/// Structural equality. Lazy containers are resolved to compare; one that
/// fails to resolve equals nothing.
impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Unsigned(a), Self::Unsigned(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Binary(a), Self::Binary(b)) => a == b,
            (Self::Blob(a), Self::Blob(b)) => a == b,
            (Self::Array(_) | Self::LazyArray(_), Self::Array(_) | Self::LazyArray(_)) => {
                match (self.array_items(), other.array_items()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            (Self::Dict(_) | Self::LazyDict(_), Self::Dict(_) | Self::LazyDict(_)) => {
                match (self.dict_entries(), other.dict_entries()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

/// Ordering within one kind. Arrays compare lexicographically; dicts and
/// blobs are only ordered when equal.
impl PartialOrd for HostValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::None, Self::None) => Some(Ordering::Equal),
            (Self::Bool(a), Self::Bool(b)) => a.partial_cmp(b),
            (Self::Int(a), Self::Int(b)) => a.partial_cmp(b),
            (Self::Unsigned(a), Self::Unsigned(b)) => a.partial_cmp(b),
            (Self::Double(a), Self::Double(b)) => a.partial_cmp(b),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::String(a), Self::String(b)) => a.partial_cmp(b),
            (Self::Binary(a), Self::Binary(b)) => a.partial_cmp(b),
            (Self::Array(_) | Self::LazyArray(_), Self::Array(_) | Self::LazyArray(_)) => {
                self.array_items()?.partial_cmp(other.array_items()?)
            }
            _ => (self == other).then_some(Ordering::Equal),
        }
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for HostValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u64> for HostValue {
    fn from(value: u64) -> Self {
        Self::Unsigned(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<f32> for HostValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<Bytes> for HostValue {
    fn from(value: Bytes) -> Self {
        Self::Binary(value)
    }
}

impl From<Vec<HostValue>> for HostValue {
    fn from(value: Vec<HostValue>) -> Self {
        Self::Array(value)
    }
}

impl From<IndexMap<String, HostValue>> for HostValue {
    fn from(value: IndexMap<String, HostValue>) -> Self {
        Self::Dict(value)
    }
}

impl From<LazyArray> for HostValue {
    fn from(value: LazyArray) -> Self {
        Self::LazyArray(value)
    }
}

impl From<LazyDict> for HostValue {
    fn from(value: LazyDict) -> Self {
        Self::LazyDict(value)
    }
}

impl From<BlobRef> for HostValue {
    fn from(value: BlobRef) -> Self {
        Self::Blob(value)
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::None, Into::into)
    }
}
