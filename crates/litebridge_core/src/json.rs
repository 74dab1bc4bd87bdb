//! JSON views of host values.

use crate::blob::{
    BlobRef, BLOB_TYPE, CONTENT_TYPE_PROPERTY, DIGEST_PROPERTY, LENGTH_PROPERTY, TYPE_PROPERTY,
};
use crate::error::BridgeResult;
use crate::value::HostValue;
use serde::ser::{Error as _, SerializeMap};
use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::fmt;

impl Serialize for HostValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            HostValue::None => serializer.serialize_unit(),
            HostValue::Bool(b) => serializer.serialize_bool(*b),
            HostValue::Int(n) => serializer.serialize_i64(*n),
            HostValue::Unsigned(n) => serializer.serialize_u64(*n),
            HostValue::Double(n) => serializer.serialize_f64(*n),
            HostValue::Float(n) => serializer.serialize_f32(*n),
            HostValue::String(s) => serializer.serialize_str(s),
            HostValue::Binary(b) => serializer.serialize_bytes(b),
            HostValue::Array(_) | HostValue::LazyArray(_) => {
                let items = self.as_array().map_err(S::Error::custom)?;
                serializer.collect_seq(items.unwrap_or_default())
            }
            HostValue::Dict(_) | HostValue::LazyDict(_) => match self.as_dict() {
                Ok(Some(entries)) => serializer.collect_map(entries),
                Ok(None) => serializer.serialize_unit(),
                Err(err) => Err(S::Error::custom(err)),
            },
            HostValue::Blob(blob) => blob.serialize(serializer),
        }
    }
}

impl Serialize for BlobRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = 2 + usize::from(self.length().is_some()) + usize::from(self.content_type().is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry(TYPE_PROPERTY, BLOB_TYPE)?;
        map.serialize_entry(DIGEST_PROPERTY, self.digest())?;
        if let Some(length) = self.length() {
            map.serialize_entry(LENGTH_PROPERTY, &length)?;
        }
        if let Some(content_type) = self.content_type() {
            map.serialize_entry(CONTENT_TYPE_PROPERTY, content_type)?;
        }
        map.end()
    }
}

fn blob_from_json(object: &Map<String, Value>) -> Option<BlobRef> {
    if object.get(TYPE_PROPERTY)?.as_str()? != BLOB_TYPE {
        return None;
    }
    let digest = object.get(DIGEST_PROPERTY)?.as_str()?;
    let length = object.get(LENGTH_PROPERTY).and_then(Value::as_u64);
    let content_type = object
        .get(CONTENT_TYPE_PROPERTY)
        .and_then(Value::as_str)
        .map(str::to_owned);
    Some(BlobRef::detached(digest, length, content_type))
}

impl HostValue {
    /// Converts to a JSON value, resolving lazy containers.
    ///
    /// Binary becomes an array of byte values, non-finite floats become
    /// `null`, and blobs become their marker object.
    ///
    /// # Errors
    ///
    /// Returns the first resolution error.
    pub fn to_json(&self) -> BridgeResult<Value> {
        Ok(match self {
            HostValue::None => Value::Null,
            HostValue::Bool(b) => Value::Bool(*b),
            HostValue::Int(n) => Value::from(*n),
            HostValue::Unsigned(n) => Value::from(*n),
            HostValue::Double(n) => Number::from_f64(*n).map_or(Value::Null, Value::Number),
            HostValue::Float(n) => Number::from_f64(f64::from(*n)).map_or(Value::Null, Value::Number),
            HostValue::String(s) => Value::String(s.clone()),
            HostValue::Binary(b) => Value::Array(b.iter().map(|byte| Value::from(*byte)).collect()),
            HostValue::Array(_) | HostValue::LazyArray(_) => Value::Array(
                self.as_array()?
                    .unwrap_or_default()
                    .iter()
                    .map(HostValue::to_json)
                    .collect::<BridgeResult<_>>()?,
            ),
            HostValue::Dict(_) | HostValue::LazyDict(_) => {
                let mut object = Map::new();
                if let Some(entries) = self.as_dict()? {
                    for (key, value) in entries {
                        object.insert(key.clone(), value.to_json()?);
                    }
                }
                Value::Object(object)
            }
            HostValue::Blob(blob) => {
                let mut object = Map::new();
                object.insert(TYPE_PROPERTY.into(), Value::from(BLOB_TYPE));
                object.insert(DIGEST_PROPERTY.into(), Value::from(blob.digest()));
                if let Some(length) = blob.length() {
                    object.insert(LENGTH_PROPERTY.into(), Value::from(length));
                }
                if let Some(content_type) = blob.content_type() {
                    object.insert(CONTENT_TYPE_PROPERTY.into(), Value::from(content_type));
                }
                Value::Object(object)
            }
        })
    }

    /// Converts from a JSON value.
    ///
    /// Integers become `Int` (or `Unsigned` above `i64::MAX`), other numbers
    /// `Double`. Objects with the blob marker shape become detached blobs.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => HostValue::None,
            Value::Bool(b) => HostValue::Bool(*b),
            Value::Number(n) => {
                if let Some(n) = n.as_i64() {
                    HostValue::Int(n)
                } else if let Some(n) = n.as_u64() {
                    HostValue::Unsigned(n)
                } else {
                    HostValue::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => HostValue::String(s.clone()),
            Value::Array(items) => HostValue::Array(items.iter().map(Self::from_json).collect()),
            Value::Object(object) => match blob_from_json(object) {
                Some(blob) => HostValue::Blob(blob),
                None => HostValue::Dict(
                    object
                        .iter()
                        .map(|(key, value)| (key.clone(), Self::from_json(value)))
                        .collect(),
                ),
            },
        }
    }
}

impl From<Value> for HostValue {
    fn from(value: Value) -> Self {
        Self::from_json(&value)
    }
}

/// Renders as compact JSON in storage order. A container that fails to
/// resolve makes formatting fail.
impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}
