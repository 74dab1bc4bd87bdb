//! Decoding encoded values into [`HostValue`]s.
//!
//! The caller chooses how much to decode up front with a depth budget. Each
//! nested array or dict spends one unit; when the budget reaches zero the
//! container is returned lazy and decoded only when touched. Scalars are
//! always decoded in full.
//!
//! Dicts shaped like a blob marker decode to [`HostValue::Blob`] regardless of
//! the remaining budget.

use crate::blob::{is_blob, BlobRef, BlobStore};
use crate::buffer::ValueBuffer;
use crate::error::{BridgeError, BridgeResult};
use crate::lazy::{LazyArray, LazyDict, LazySource};
use crate::value::HostValue;
use bytes::Bytes;
use indexmap::IndexMap;
use litebridge_codec::{ArrayView, CodecError, DictView, Tag, ValueView, MAX_NESTING};
use std::sync::Weak;
use tracing::trace;

/// Depth budget that never runs out.
pub const UNBOUNDED_DEPTH: u32 = u32::MAX;

/// What nested lazy containers need to find their way back.
#[derive(Clone)]
pub(crate) struct DecodeContext {
    pub(crate) buffer: Weak<Bytes>,
    pub(crate) store: Option<BlobStore>,
    pub(crate) mutable: bool,
}

impl DecodeContext {
    fn source(&self, offset: usize) -> LazySource {
        LazySource {
            cx: self.clone(),
            offset,
        }
    }
}

/// Decodes values out of one [`ValueBuffer`].
#[derive(Debug)]
pub struct Decoder<'b> {
    buffer: &'b ValueBuffer,
    mutable: bool,
}

impl<'b> Decoder<'b> {
    /// Creates a decoder producing immutable lazy containers.
    pub fn new(buffer: &'b ValueBuffer) -> Self {
        Self {
            buffer,
            mutable: false,
        }
    }

    /// Sets whether lazy containers accept mutation.
    #[must_use]
    pub fn mutable(mut self, mutable: bool) -> Self {
        self.mutable = mutable;
        self
    }

    /// Decodes `view`, which must point into this decoder's buffer.
    ///
    /// # Errors
    ///
    /// Returns a decode error for malformed input or a view from elsewhere,
    /// and `UseAfterRelease` if the buffer was released.
    pub fn decode(&self, view: ValueView<'_>, depth: u32) -> BridgeResult<HostValue> {
        self.buffer.bytes()?;
        if !self.buffer.contains(&view) {
            return Err(CodecError::invalid_structure("view does not belong to this buffer").into());
        }
        trace!(offset = view.offset(), tag = %view.tag(), depth, "decoding value");
        let cx = DecodeContext {
            buffer: self.buffer.downgrade(),
            store: self.buffer.store().cloned(),
            mutable: self.mutable,
        };
        decode_value(&cx, view, depth, 0)
    }

    /// Decodes the buffer's root value.
    pub fn decode_root(&self, depth: u32) -> BridgeResult<HostValue> {
        self.decode(self.buffer.root()?, depth)
    }
}

/// Decodes the root value of `buffer`.
///
/// # Errors
///
/// See [`Decoder::decode`].
pub fn decode(buffer: &ValueBuffer, depth: u32, mutable: bool) -> BridgeResult<HostValue> {
    Decoder::new(buffer).mutable(mutable).decode_root(depth)
}

fn child_depth(depth: u32) -> u32 {
    if depth == UNBOUNDED_DEPTH {
        depth
    } else {
        depth.saturating_sub(1)
    }
}

fn check_nesting(level: usize) -> BridgeResult<()> {
    if level >= MAX_NESTING {
        return Err(BridgeError::Decode(CodecError::NestingTooDeep(MAX_NESTING)));
    }
    Ok(())
}

pub(crate) fn decode_value(
    cx: &DecodeContext,
    view: ValueView<'_>,
    depth: u32,
    level: usize,
) -> BridgeResult<HostValue> {
    let value = match view.tag() {
        Tag::Null | Tag::Undefined => HostValue::None,
        Tag::Bool => HostValue::Bool(view.as_bool()?),
        Tag::Int => HostValue::Int(view.as_int()?),
        Tag::Unsigned => HostValue::Unsigned(view.as_unsigned()?),
        Tag::Double => HostValue::Double(view.as_double()?),
        Tag::Float => HostValue::Float(view.as_float()?),
        Tag::String => HostValue::String(view.as_str()?.to_owned()),
        Tag::Binary => HostValue::Binary(Bytes::copy_from_slice(view.as_binary()?)),
        Tag::Array => {
            if depth == 0 {
                HostValue::LazyArray(LazyArray::unresolved(cx.source(view.offset())))
            } else {
                let items = decode_array(cx, view.as_array()?, child_depth(depth), level + 1)?;
                HostValue::Array(items)
            }
        }
        Tag::Dict => {
            let dict = view.as_dict()?;
            if is_blob(&dict)? {
                HostValue::Blob(BlobRef::from_marker(&dict, cx.store.clone())?)
            } else if depth == 0 {
                HostValue::LazyDict(LazyDict::unresolved(cx.source(view.offset())))
            } else {
                HostValue::Dict(decode_dict(cx, dict, child_depth(depth), level + 1)?)
            }
        }
    };
    Ok(value)
}

/// Decodes an array's items, each with budget `depth`.
pub(crate) fn decode_array(
    cx: &DecodeContext,
    array: ArrayView<'_>,
    depth: u32,
    level: usize,
) -> BridgeResult<Vec<HostValue>> {
    check_nesting(level)?;
    let mut items = Vec::with_capacity(array.count());
    let mut iter = array.iter();
    for item in iter.by_ref() {
        items.push(decode_value(cx, item?, depth, level)?);
    }
    iter.check_exhausted()?;
    Ok(items)
}

/// Decodes a dict's entries in storage order, each with budget `depth`.
pub(crate) fn decode_dict(
    cx: &DecodeContext,
    dict: DictView<'_>,
    depth: u32,
    level: usize,
) -> BridgeResult<IndexMap<String, HostValue>> {
    check_nesting(level)?;
    let mut entries = IndexMap::with_capacity(dict.count());
    let mut iter = dict.iter();
    for entry in iter.by_ref() {
        let (key, value) = entry?;
        let value = decode_value(cx, value, depth, level)?;
        if entries.insert(key.to_owned(), value).is_some() {
            let err = CodecError::invalid_structure(format!("duplicate dict key {key:?}"));
            return Err(err.into());
        }
    }
    iter.check_exhausted()?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode;
    use litebridge_codec::{Encoder, Trust};

    fn parse(bytes: bytes::Bytes) -> ValueBuffer {
        ValueBuffer::parse(bytes, Trust::Untrusted).unwrap()
    }

    fn sample() -> ValueBuffer {
        let mut enc = Encoder::new();
        enc.begin_dict().unwrap();
        enc.write_key("n").unwrap();
        enc.write_unsigned(7).unwrap();
        enc.write_key("d").unwrap();
        enc.write_double(1.0).unwrap();
        enc.write_key("f").unwrap();
        enc.write_float(0.5).unwrap();
        enc.write_key("u").unwrap();
        enc.write_undefined().unwrap();
        enc.write_key("list").unwrap();
        enc.begin_array().unwrap();
        enc.begin_array().unwrap();
        enc.write_int(-1).unwrap();
        enc.end_array().unwrap();
        enc.end_array().unwrap();
        enc.end_dict().unwrap();
        parse(enc.finish().unwrap())
    }

    #[test]
    fn scalars_keep_their_tag() {
        let buffer = sample();
        let value = decode(&buffer, UNBOUNDED_DEPTH, false).unwrap();
        let dict = value.as_dict().unwrap().unwrap();
        assert_eq!(dict["n"], HostValue::Unsigned(7));
        assert_eq!(dict["d"], HostValue::Double(1.0));
        assert_eq!(dict["f"], HostValue::Float(0.5));
        assert_eq!(dict["u"], HostValue::None);
    }

    #[test]
    fn depth_zero_is_lazy() {
        let buffer = sample();
        assert!(matches!(
            decode(&buffer, 0, false).unwrap(),
            HostValue::LazyDict(_)
        ));
    }

    #[test]
    fn depth_one_stops_below_root() {
        let buffer = sample();
        let value = decode(&buffer, 1, false).unwrap();
        let dict = value.as_dict().unwrap().unwrap();
        assert!(matches!(dict["list"], HostValue::LazyArray(_)));
    }

    #[test]
    fn depth_two_goes_one_deeper() {
        let buffer = sample();
        let value = decode(&buffer, 2, false).unwrap();
        let dict = value.as_dict().unwrap().unwrap();
        match &dict["list"] {
            HostValue::Array(items) => assert!(matches!(items[0], HostValue::LazyArray(_))),
            other => panic!("expected eager array, got {other:?}"),
        }
    }

    #[test]
    fn unbounded_decodes_everything() {
        let buffer = sample();
        let value = decode(&buffer, UNBOUNDED_DEPTH, false).unwrap();
        let dict = value.as_dict().unwrap().unwrap();
        assert_eq!(
            dict["list"],
            HostValue::Array(vec![HostValue::Array(vec![HostValue::Int(-1)])])
        );
    }

    #[test]
    fn blob_marker_wins_at_depth_zero() {
        let mut enc = Encoder::new();
        enc.begin_dict().unwrap();
        enc.write_key("@type").unwrap();
        enc.write_string("blob").unwrap();
        enc.write_key("digest").unwrap();
        enc.write_string("sha256-abc").unwrap();
        enc.write_key("length").unwrap();
        enc.write_int(3).unwrap();
        enc.end_dict().unwrap();
        let buffer = parse(enc.finish().unwrap());

        match decode(&buffer, 0, false).unwrap() {
            HostValue::Blob(blob) => {
                assert_eq!(blob.digest(), "sha256-abc");
                assert_eq!(blob.length(), Some(3));
            }
            other => panic!("expected blob, got {other:?}"),
        }
    }

    #[test]
    fn marker_without_string_digest_is_a_dict() {
        let mut enc = Encoder::new();
        enc.begin_dict().unwrap();
        enc.write_key("@type").unwrap();
        enc.write_string("blob").unwrap();
        enc.write_key("digest").unwrap();
        enc.write_int(1).unwrap();
        enc.end_dict().unwrap();
        let buffer = parse(enc.finish().unwrap());
        assert!(matches!(
            decode(&buffer, 1, false).unwrap(),
            HostValue::Dict(_)
        ));
    }

    #[test]
    fn foreign_view_is_rejected() {
        let a = sample();
        let b = parse(encode(&HostValue::from(true)).unwrap());
        let err = Decoder::new(&a).decode(b.root().unwrap(), 1).unwrap_err();
        assert!(matches!(err, BridgeError::Decode(CodecError::InvalidStructure { .. })));
    }

    #[test]
    fn trusted_truncation_is_an_error_not_a_default() {
        // Array claims two elements but only one is present.
        let data = vec![0x0a, 2, 0, 0, 0, 1, 0, 0, 0, 0x00];
        let buffer = ValueBuffer::parse(data, Trust::Trusted).unwrap();
        assert!(matches!(
            decode(&buffer, UNBOUNDED_DEPTH, false),
            Err(BridgeError::Decode(_))
        ));
    }

    #[test]
    fn trusted_body_mismatch_is_an_error() {
        // Array claims one element but its body holds two.
        let data = vec![0x0a, 1, 0, 0, 0, 2, 0, 0, 0, 0x00, 0x00];
        let buffer = ValueBuffer::parse(data, Trust::Trusted).unwrap();
        assert!(decode(&buffer, UNBOUNDED_DEPTH, false).is_err());
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let mut enc = Encoder::new();
        enc.begin_dict().unwrap();
        enc.write_key("a").unwrap();
        enc.write_int(1).unwrap();
        enc.write_key("a").unwrap();
        enc.write_int(2).unwrap();
        enc.end_dict().unwrap();
        let bytes = enc.finish().unwrap();

        assert!(matches!(
            ValueBuffer::parse(bytes.clone(), Trust::Untrusted),
            Err(BridgeError::Decode(CodecError::InvalidStructure { .. }))
        ));

        let buffer = ValueBuffer::parse(bytes, Trust::Trusted).unwrap();
        assert!(matches!(
            decode(&buffer, UNBOUNDED_DEPTH, false),
            Err(BridgeError::Decode(CodecError::InvalidStructure { .. }))
        ));
        // A lazy root fails the same way once touched.
        let HostValue::LazyDict(lazy) = decode(&buffer, 0, false).unwrap() else {
            panic!("depth 0 dict must be lazy");
        };
        assert!(matches!(lazy.len(), Err(BridgeError::Decode(_))));
    }

    #[test]
    fn decoding_a_released_buffer_fails() {
        let mut buffer = sample();
        buffer.release();
        assert!(matches!(
            decode(&buffer, 1, false),
            Err(BridgeError::UseAfterRelease { .. })
        ));
    }
}
