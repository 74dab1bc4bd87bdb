//! Streaming encoder.

use crate::error::{CodecError, CodecResult};
use crate::tag::{
    Tag, TAG_ARRAY, TAG_BINARY, TAG_DICT, TAG_DOUBLE, TAG_FALSE, TAG_FLOAT, TAG_INT, TAG_NULL,
    TAG_STRING, TAG_TRUE, TAG_UNDEFINED, TAG_UNSIGNED,
};
use crate::view::ValueView;
use bytes::{BufMut, Bytes, BytesMut};

struct Frame {
    kind: Tag,
    header_pos: usize,
    count: u32,
    key_pending: bool,
}

/// Writes exactly one root value into a buffer.
///
/// Composite headers are written as placeholders and patched with the
/// final count and body length when the container is closed.
///
/// ```
/// use litebridge_codec::{Encoder, ValueView};
///
/// let mut enc = Encoder::new();
/// enc.begin_dict().unwrap();
/// enc.write_key("n").unwrap();
/// enc.write_int(7).unwrap();
/// enc.end_dict().unwrap();
/// let bytes = enc.finish().unwrap();
///
/// let dict = ValueView::root(&bytes).unwrap().as_dict().unwrap();
/// assert_eq!(dict.get("n").unwrap().unwrap().as_int().unwrap(), 7);
/// ```
pub struct Encoder {
    buffer: BytesMut,
    stack: Vec<Frame>,
    root_started: bool,
}

impl Encoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            stack: Vec::new(),
            root_started: false,
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn begin_value(&mut self) -> CodecResult<()> {
        match self.stack.last_mut() {
            None => {
                if self.root_started {
                    return Err(CodecError::encoding_failed("more than one root value"));
                }
                self.root_started = true;
            }
            Some(frame) if frame.kind == Tag::Dict => {
                if !frame.key_pending {
                    return Err(CodecError::encoding_failed("dict value written without a key"));
                }
                frame.key_pending = false;
                frame.count = bump(frame.count)?;
            }
            Some(frame) => frame.count = bump(frame.count)?,
        }
        Ok(())
    }

    /// Writes `null`.
    pub fn write_null(&mut self) -> CodecResult<()> {
        self.begin_value()?;
        self.buffer.put_u8(TAG_NULL);
        Ok(())
    }

    /// Writes `undefined`.
    pub fn write_undefined(&mut self) -> CodecResult<()> {
        self.begin_value()?;
        self.buffer.put_u8(TAG_UNDEFINED);
        Ok(())
    }

    /// Writes a boolean.
    pub fn write_bool(&mut self, value: bool) -> CodecResult<()> {
        self.begin_value()?;
        self.buffer.put_u8(if value { TAG_TRUE } else { TAG_FALSE });
        Ok(())
    }

    /// Writes a signed integer.
    pub fn write_int(&mut self, value: i64) -> CodecResult<()> {
        self.begin_value()?;
        self.buffer.put_u8(TAG_INT);
        self.buffer.put_i64_le(value);
        Ok(())
    }

    /// Writes an unsigned integer.
    pub fn write_unsigned(&mut self, value: u64) -> CodecResult<()> {
        self.begin_value()?;
        self.buffer.put_u8(TAG_UNSIGNED);
        self.buffer.put_u64_le(value);
        Ok(())
    }

    /// Writes a double.
    pub fn write_double(&mut self, value: f64) -> CodecResult<()> {
        self.begin_value()?;
        self.buffer.put_u8(TAG_DOUBLE);
        self.buffer.put_f64_le(value);
        Ok(())
    }

    /// Writes a single-precision float.
    pub fn write_float(&mut self, value: f32) -> CodecResult<()> {
        self.begin_value()?;
        self.buffer.put_u8(TAG_FLOAT);
        self.buffer.put_f32_le(value);
        Ok(())
    }

    /// Writes a string.
    pub fn write_string(&mut self, value: &str) -> CodecResult<()> {
        let len = length_u32(value.len())?;
        self.begin_value()?;
        self.buffer.put_u8(TAG_STRING);
        self.buffer.put_u32_le(len);
        self.buffer.put_slice(value.as_bytes());
        Ok(())
    }

    /// Writes binary data.
    pub fn write_binary(&mut self, value: &[u8]) -> CodecResult<()> {
        let len = length_u32(value.len())?;
        self.begin_value()?;
        self.buffer.put_u8(TAG_BINARY);
        self.buffer.put_u32_le(len);
        self.buffer.put_slice(value);
        Ok(())
    }

    /// Copies an already encoded value verbatim.
    pub fn write_raw(&mut self, value: &ValueView<'_>) -> CodecResult<()> {
        self.begin_value()?;
        self.buffer.put_slice(value.as_bytes());
        Ok(())
    }

    fn begin_composite(&mut self, kind: Tag, tag: u8) -> CodecResult<()> {
        self.begin_value()?;
        let header_pos = self.buffer.len();
        self.buffer.put_u8(tag);
        self.buffer.put_u32_le(0);
        self.buffer.put_u32_le(0);
        self.stack.push(Frame {
            kind,
            header_pos,
            count: 0,
            key_pending: false,
        });
        Ok(())
    }

    fn end_composite(&mut self, kind: Tag) -> CodecResult<()> {
        match self.stack.last() {
            Some(frame) if frame.kind == kind => {}
            Some(frame) => {
                return Err(CodecError::encoding_failed(format!(
                    "cannot end {kind} while a {} is open",
                    frame.kind
                )))
            }
            None => {
                return Err(CodecError::encoding_failed(format!(
                    "end of {kind} without a matching begin"
                )))
            }
        }
        let frame = self.stack.pop().ok_or_else(|| {
            CodecError::encoding_failed("container stack unexpectedly empty")
        })?;
        if frame.key_pending {
            return Err(CodecError::encoding_failed("dict key written without a value"));
        }
        let body_start = frame.header_pos + 9;
        let body_len = length_u32(self.buffer.len() - body_start)?;
        let pos = frame.header_pos;
        self.buffer[pos + 1..pos + 5].copy_from_slice(&frame.count.to_le_bytes());
        self.buffer[pos + 5..pos + 9].copy_from_slice(&body_len.to_le_bytes());
        Ok(())
    }

    /// Opens an array.
    pub fn begin_array(&mut self) -> CodecResult<()> {
        self.begin_composite(Tag::Array, TAG_ARRAY)
    }

    /// Closes the innermost array.
    pub fn end_array(&mut self) -> CodecResult<()> {
        self.end_composite(Tag::Array)
    }

    /// Opens a dict.
    pub fn begin_dict(&mut self) -> CodecResult<()> {
        self.begin_composite(Tag::Dict, TAG_DICT)
    }

    /// Writes the key for the next dict value.
    pub fn write_key(&mut self, key: &str) -> CodecResult<()> {
        let len = length_u32(key.len())?;
        match self.stack.last_mut() {
            Some(frame) if frame.kind == Tag::Dict && !frame.key_pending => {
                frame.key_pending = true;
            }
            Some(frame) if frame.kind == Tag::Dict => {
                return Err(CodecError::encoding_failed("two keys in a row"));
            }
            _ => return Err(CodecError::encoding_failed("key written outside a dict")),
        }
        self.buffer.put_u32_le(len);
        self.buffer.put_slice(key.as_bytes());
        Ok(())
    }

    /// Closes the innermost dict.
    pub fn end_dict(&mut self) -> CodecResult<()> {
        self.end_composite(Tag::Dict)
    }

    /// Consumes the encoder and returns the encoded buffer.
    ///
    /// # Errors
    ///
    /// Fails if no root value was written or a container is still open.
    pub fn finish(self) -> CodecResult<Bytes> {
        if !self.stack.is_empty() {
            return Err(CodecError::encoding_failed(format!(
                "{} unclosed container(s)",
                self.stack.len()
            )));
        }
        if !self.root_started {
            return Err(CodecError::encoding_failed("no value written"));
        }
        Ok(self.buffer.freeze())
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

fn length_u32(len: usize) -> CodecResult<u32> {
    u32::try_from(len).map_err(|_| CodecError::SizeLimitExceeded {
        claimed: len as u64,
        max_allowed: u64::from(u32::MAX),
    })
}

fn bump(count: u32) -> CodecResult<u32> {
    count.checked_add(1).ok_or(CodecError::SizeLimitExceeded {
        claimed: u64::from(u32::MAX) + 1,
        max_allowed: u64::from(u32::MAX),
    })
}
