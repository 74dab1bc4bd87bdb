//! Zero-copy views over encoded values.

use crate::error::{CodecError, CodecResult};
use crate::tag::{Tag, TAG_FALSE, TAG_TRUE};
use std::collections::HashSet;
use std::fmt;

/// Maximum container nesting accepted by [`validate`].
/// Keeps validation of hostile input from exhausting the stack.
pub const MAX_NESTING: usize = 512;

/// Whether a buffer has to be validated before its views are handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Trust {
    /// Validate the whole buffer up front.
    #[default]
    Untrusted,
    /// Skip up-front validation. Reads are still bounds checked.
    Trusted,
}

/// Parses a buffer and returns a view of its root value.
///
/// # Errors
///
/// Returns an error if the buffer is empty, or (for untrusted input) if any
/// part of it is malformed.
pub fn parse(data: &[u8], trust: Trust) -> CodecResult<ValueView<'_>> {
    if trust == Trust::Untrusted {
        validate(data)?;
    }
    ValueView::root(data)
}

/// Walks the whole buffer and checks every tag, length, key and string.
///
/// A dict may not repeat a key.
///
/// # Errors
///
/// Returns the first structural problem found.
pub fn validate(data: &[u8]) -> CodecResult<()> {
    let root = ValueView::root(data)?;
    validate_value(&root, 0)?;
    let trailing = data.len() - root.end;
    if trailing > 0 {
        return Err(CodecError::TrailingData(trailing));
    }
    Ok(())
}

fn validate_value(view: &ValueView<'_>, depth: usize) -> CodecResult<()> {
    match view.tag() {
        Tag::String => view.as_str().map(|_| ()),
        Tag::Array => {
            if depth >= MAX_NESTING {
                return Err(CodecError::NestingTooDeep(MAX_NESTING));
            }
            let array = view.as_array()?;
            let mut iter = array.iter();
            for item in iter.by_ref() {
                validate_value(&item?, depth + 1)?;
            }
            iter.check_exhausted()
        }
        Tag::Dict => {
            if depth >= MAX_NESTING {
                return Err(CodecError::NestingTooDeep(MAX_NESTING));
            }
            let dict = view.as_dict()?;
            let mut keys = HashSet::new();
            let mut iter = dict.iter();
            for entry in iter.by_ref() {
                let (key, value) = entry?;
                if !keys.insert(key) {
                    return Err(CodecError::invalid_structure(format!(
                        "duplicate dict key {key:?}"
                    )));
                }
                validate_value(&value, depth + 1)?;
            }
            iter.check_exhausted()
        }
        _ => Ok(()),
    }
}

#[inline]
fn read_array<const N: usize>(data: &[u8], pos: usize) -> CodecResult<[u8; N]> {
    let end = pos.checked_add(N).ok_or(CodecError::UnexpectedEof)?;
    let bytes = data.get(pos..end).ok_or(CodecError::UnexpectedEof)?;
    bytes.try_into().map_err(|_| CodecError::UnexpectedEof)
}

#[inline]
fn read_u32(data: &[u8], pos: usize) -> CodecResult<u32> {
    read_array::<4>(data, pos).map(u32::from_le_bytes)
}

#[inline]
fn read_slice(data: &[u8], pos: usize, len: usize, limit: usize) -> CodecResult<&[u8]> {
    let end = pos.checked_add(len).ok_or(CodecError::UnexpectedEof)?;
    if end > limit {
        return Err(CodecError::UnexpectedEof);
    }
    data.get(pos..end).ok_or(CodecError::UnexpectedEof)
}

/// A typed reference to one encoded value inside a borrowed buffer.
///
/// Creating a view checks that the value's whole extent lies inside the
/// buffer; nested values are checked again when they are reached.
#[derive(Clone, Copy)]
pub struct ValueView<'a> {
    data: &'a [u8],
    pos: usize,
    end: usize,
    tag: Tag,
    raw_tag: u8,
}

impl<'a> ValueView<'a> {
    /// Returns a view of the value at the start of `data`.
    pub fn root(data: &'a [u8]) -> CodecResult<Self> {
        Self::at(data, 0)
    }

    /// Returns a view of the value starting at `offset`.
    pub fn at(data: &'a [u8], offset: usize) -> CodecResult<Self> {
        Self::at_within(data, offset, data.len())
    }

    fn at_within(data: &'a [u8], pos: usize, limit: usize) -> CodecResult<Self> {
        if pos >= limit {
            return Err(CodecError::UnexpectedEof);
        }
        let raw_tag = *data.get(pos).ok_or(CodecError::UnexpectedEof)?;
        let tag = Tag::try_from(raw_tag)?;
        let payload = match tag {
            Tag::Null | Tag::Undefined | Tag::Bool => 0,
            Tag::Int | Tag::Unsigned | Tag::Double => 8,
            Tag::Float => 4,
            Tag::String | Tag::Binary => 4 + read_u32(data, pos + 1)? as usize,
            Tag::Array | Tag::Dict => 8 + read_u32(data, pos + 5)? as usize,
        };
        let end = (pos + 1)
            .checked_add(payload)
            .ok_or(CodecError::UnexpectedEof)?;
        if end > limit {
            return Err(CodecError::UnexpectedEof);
        }
        Ok(Self {
            data,
            pos,
            end,
            tag,
            raw_tag,
        })
    }

    /// The value's tag.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Byte offset of this value inside its buffer.
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Total encoded size, header included.
    pub fn encoded_len(&self) -> usize {
        self.end - self.pos
    }

    /// The raw encoded bytes of this value.
    pub fn as_bytes(&self) -> &'a [u8] {
        &self.data[self.pos..self.end]
    }

    /// True for both `Null` and `Undefined`.
    pub fn is_nullish(&self) -> bool {
        matches!(self.tag, Tag::Null | Tag::Undefined)
    }

    fn expect(&self, tag: Tag) -> CodecResult<()> {
        if self.tag == tag {
            Ok(())
        } else {
            Err(CodecError::type_mismatch(tag.name(), self.tag))
        }
    }

    /// Reads a boolean.
    pub fn as_bool(&self) -> CodecResult<bool> {
        self.expect(Tag::Bool)?;
        match self.raw_tag {
            TAG_TRUE => Ok(true),
            TAG_FALSE => Ok(false),
            other => Err(CodecError::UnknownTag(other)),
        }
    }

    /// Reads a signed integer.
    pub fn as_int(&self) -> CodecResult<i64> {
        self.expect(Tag::Int)?;
        read_array::<8>(self.data, self.pos + 1).map(i64::from_le_bytes)
    }

    /// Reads an unsigned integer.
    pub fn as_unsigned(&self) -> CodecResult<u64> {
        self.expect(Tag::Unsigned)?;
        read_array::<8>(self.data, self.pos + 1).map(u64::from_le_bytes)
    }

    /// Reads a double.
    pub fn as_double(&self) -> CodecResult<f64> {
        self.expect(Tag::Double)?;
        read_array::<8>(self.data, self.pos + 1).map(f64::from_le_bytes)
    }

    /// Reads a single-precision float.
    pub fn as_float(&self) -> CodecResult<f32> {
        self.expect(Tag::Float)?;
        read_array::<4>(self.data, self.pos + 1).map(f32::from_le_bytes)
    }

    /// Borrows a string.
    pub fn as_str(&self) -> CodecResult<&'a str> {
        self.expect(Tag::String)?;
        let bytes = &self.data[self.pos + 5..self.end];
        std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Borrows binary data.
    pub fn as_binary(&self) -> CodecResult<&'a [u8]> {
        self.expect(Tag::Binary)?;
        Ok(&self.data[self.pos + 5..self.end])
    }

    /// Views this value as an array.
    pub fn as_array(&self) -> CodecResult<ArrayView<'a>> {
        self.expect(Tag::Array)?;
        Ok(ArrayView {
            data: self.data,
            count: read_u32(self.data, self.pos + 1)?,
            body_start: self.pos + 9,
            body_end: self.end,
        })
    }

    /// Views this value as a dict.
    pub fn as_dict(&self) -> CodecResult<DictView<'a>> {
        self.expect(Tag::Dict)?;
        Ok(DictView {
            data: self.data,
            count: read_u32(self.data, self.pos + 1)?,
            body_start: self.pos + 9,
            body_end: self.end,
        })
    }
}

impl fmt::Debug for ValueView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueView")
            .field("tag", &self.tag)
            .field("offset", &self.pos)
            .field("len", &self.encoded_len())
            .finish()
    }
}

/// A view of an encoded array.
#[derive(Clone, Copy)]
pub struct ArrayView<'a> {
    data: &'a [u8],
    count: u32,
    body_start: usize,
    body_end: usize,
}

impl<'a> ArrayView<'a> {
    /// Number of elements, as declared in the header.
    pub fn count(&self) -> usize {
        self.count as usize
    }

    /// True if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the element at `index`, or `None` past the end.
    pub fn get(&self, index: usize) -> CodecResult<Option<ValueView<'a>>> {
        if index >= self.count() {
            return Ok(None);
        }
        self.iter().nth(index).transpose()
    }

    /// Iterates elements in stream order.
    pub fn iter(&self) -> ArrayIter<'a> {
        ArrayIter {
            data: self.data,
            next: self.body_start,
            end: self.body_end,
            remaining: self.count,
        }
    }
}

impl fmt::Debug for ArrayView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayView")
            .field("count", &self.count)
            .finish()
    }
}

impl<'a> IntoIterator for ArrayView<'a> {
    type Item = CodecResult<ValueView<'a>>;
    type IntoIter = ArrayIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over array elements.
///
/// Yields an error if the body runs out before `count` elements were read,
/// then stops.
pub struct ArrayIter<'a> {
    data: &'a [u8],
    next: usize,
    end: usize,
    remaining: u32,
}

impl ArrayIter<'_> {
    /// Checks that the elements read so far exactly fill the body.
    pub fn check_exhausted(&self) -> CodecResult<()> {
        if self.remaining == 0 && self.next == self.end {
            Ok(())
        } else {
            Err(CodecError::invalid_structure(
                "array body length does not match its elements",
            ))
        }
    }
}

impl<'a> Iterator for ArrayIter<'a> {
    type Item = CodecResult<ValueView<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match ValueView::at_within(self.data, self.next, self.end) {
            Ok(view) => {
                self.next = view.end;
                self.remaining -= 1;
                Some(Ok(view))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining as usize))
    }
}

/// A view of an encoded dict.
#[derive(Clone, Copy)]
pub struct DictView<'a> {
    data: &'a [u8],
    count: u32,
    body_start: usize,
    body_end: usize,
}

impl<'a> DictView<'a> {
    /// Number of entries, as declared in the header.
    pub fn count(&self) -> usize {
        self.count as usize
    }

    /// True if the dict has no entries.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Looks up `key` by scanning entries in storage order.
    pub fn get(&self, key: &str) -> CodecResult<Option<ValueView<'a>>> {
        for entry in self.iter() {
            let (k, v) = entry?;
            if k == key {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    /// Iterates `(key, value)` pairs in storage order.
    pub fn iter(&self) -> DictIter<'a> {
        DictIter {
            data: self.data,
            next: self.body_start,
            end: self.body_end,
            remaining: self.count,
        }
    }
}

impl fmt::Debug for DictView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DictView")
            .field("count", &self.count)
            .finish()
    }
}

impl<'a> IntoIterator for DictView<'a> {
    type Item = CodecResult<(&'a str, ValueView<'a>)>;
    type IntoIter = DictIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over dict entries.
pub struct DictIter<'a> {
    data: &'a [u8],
    next: usize,
    end: usize,
    remaining: u32,
}

impl<'a> DictIter<'a> {
    /// Checks that the entries read so far exactly fill the body.
    pub fn check_exhausted(&self) -> CodecResult<()> {
        if self.remaining == 0 && self.next == self.end {
            Ok(())
        } else {
            Err(CodecError::invalid_structure(
                "dict body length does not match its entries",
            ))
        }
    }

    fn read_entry(&mut self) -> CodecResult<(&'a str, ValueView<'a>)> {
        let key_len = read_u32(self.data, self.next)? as usize;
        let key_bytes = read_slice(self.data, self.next + 4, key_len, self.end)?;
        let key = std::str::from_utf8(key_bytes).map_err(|_| CodecError::InvalidUtf8)?;
        let value = ValueView::at_within(self.data, self.next + 4 + key_len, self.end)?;
        self.next = value.end;
        Ok((key, value))
    }
}

impl<'a> Iterator for DictIter<'a> {
    type Item = CodecResult<(&'a str, ValueView<'a>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match self.read_entry() {
            Ok(entry) => {
                self.remaining -= 1;
                Some(Ok(entry))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining as usize))
    }
}
