//! Encoding [`HostValue`]s back into the binary format.

use crate::error::BridgeResult;
use crate::lazy::Snapshot;
use crate::value::HostValue;
use bytes::Bytes;
use litebridge_codec::{Encoder, ValueView};

/// Encodes `value` as a standalone buffer.
///
/// Unresolved lazy containers are copied from their buffer byte for byte;
/// blobs are written in marker form.
///
/// # Errors
///
/// Returns `UseAfterRelease` for an unresolved lazy container whose buffer is
/// gone, and an encoding error for oversized values.
pub fn encode(value: &HostValue) -> BridgeResult<Bytes> {
    let mut enc = Encoder::new();
    write_value(&mut enc, value)?;
    Ok(enc.finish()?)
}

/// Writes `value` into an encoder in progress.
pub fn write_value(enc: &mut Encoder, value: &HostValue) -> BridgeResult<()> {
    match value {
        HostValue::None => enc.write_null()?,
        HostValue::Bool(b) => enc.write_bool(*b)?,
        HostValue::Int(n) => enc.write_int(*n)?,
        HostValue::Unsigned(n) => enc.write_unsigned(*n)?,
        HostValue::Double(n) => enc.write_double(*n)?,
        HostValue::Float(n) => enc.write_float(*n)?,
        HostValue::String(s) => enc.write_string(s)?,
        HostValue::Binary(b) => enc.write_binary(b)?,
        HostValue::Array(items) => write_array(enc, items)?,
        HostValue::Dict(entries) => write_dict(enc, entries)?,
        HostValue::LazyArray(lazy) => match lazy.snapshot()? {
            Snapshot::Encoded { bytes, offset } => enc.write_raw(&ValueView::at(&bytes, offset)?)?,
            Snapshot::Resolved(items) => write_array(enc, items)?,
        },
        HostValue::LazyDict(lazy) => match lazy.snapshot()? {
            Snapshot::Encoded { bytes, offset } => enc.write_raw(&ValueView::at(&bytes, offset)?)?,
            Snapshot::Resolved(entries) => write_dict(enc, entries)?,
        },
        HostValue::Blob(blob) => blob.encode_marker(enc)?,
    }
    Ok(())
}

fn write_array(enc: &mut Encoder, items: &[HostValue]) -> BridgeResult<()> {
    enc.begin_array()?;
    for item in items {
        write_value(enc, item)?;
    }
    Ok(enc.end_array()?)
}

fn write_dict<'a, I>(enc: &mut Encoder, entries: I) -> BridgeResult<()>
where
    I: IntoIterator<Item = (&'a String, &'a HostValue)>,
{
    enc.begin_dict()?;
    for (key, value) in entries {
        enc.write_key(key)?;
        write_value(enc, value)?;
    }
    Ok(enc.end_dict()?)
}
