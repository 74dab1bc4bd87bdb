//! Blob references and blob content access.
//!
//! Inside documents a blob is a dict of a fixed shape:
//!
//! ```text
//! { "@type": "blob", "digest": "sha256-…", "length": 1234, "content_type": "image/png" }
//! ```
//!
//! The decoder turns such dicts into [`BlobRef`]s. Content stays in the
//! engine until asked for, and is only ever read in bounded chunks when a
//! deadline or a cancel token is involved.

use crate::database::DatabaseInner;
use crate::error::{BridgeError, BridgeResult, ErrorDomain, NativeError};
use crate::handle::NativeHandle;
use crate::types::RawHandle;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use litebridge_codec::{CodecResult, DictView, Encoder, Tag, ValueView};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Code carried when a stream claims to have read more than it was given.
const READ_OVERRUN: i32 = -1;

/// Key holding the marker type.
pub const TYPE_PROPERTY: &str = "@type";
/// Marker type value.
pub const BLOB_TYPE: &str = "blob";
/// Key holding the content digest.
pub const DIGEST_PROPERTY: &str = "digest";
/// Key holding the content length.
pub const LENGTH_PROPERTY: &str = "length";
/// Key holding the MIME type.
pub const CONTENT_TYPE_PROPERTY: &str = "content_type";

/// True if `dict` has the blob marker shape: `"@type" == "blob"` and a string `"digest"`.
///
/// # Errors
///
/// Propagates decode errors hit while looking up the two keys.
pub fn is_blob(dict: &DictView<'_>) -> CodecResult<bool> {
    let Some(kind) = dict.get(TYPE_PROPERTY)? else {
        return Ok(false);
    };
    if kind.tag() != Tag::String || kind.as_str()? != BLOB_TYPE {
        return Ok(false);
    }
    Ok(dict
        .get(DIGEST_PROPERTY)?
        .is_some_and(|digest| digest.tag() == Tag::String))
}

/// Content digest in the engine's format: `sha256-` + base64 of the SHA-256 hash.
pub fn content_digest(content: &[u8]) -> String {
    format!("sha256-{}", STANDARD.encode(Sha256::digest(content)))
}

fn read_length(view: ValueView<'_>) -> CodecResult<Option<u64>> {
    Ok(match view.tag() {
        Tag::Unsigned => Some(view.as_unsigned()?),
        Tag::Int => u64::try_from(view.as_int()?).ok(),
        Tag::Double => {
            let length = view.as_double()?;
            (length.is_finite() && length >= 0.0 && length.fract() == 0.0).then_some(length as u64)
        }
        _ => None,
    })
}

#[derive(Clone)]
enum BlobContent {
    Cached(Bytes),
    Deferred(BlobStore),
    Detached,
}

/// A reference to blob content, by digest.
#[derive(Clone)]
pub struct BlobRef {
    digest: String,
    content_type: Option<String>,
    length: Option<u64>,
    content: BlobContent,
}

impl BlobRef {
    /// Creates a new blob from in-memory content.
    pub fn from_data(content: impl Into<Bytes>, content_type: Option<String>) -> Self {
        let content = content.into();
        Self {
            digest: content_digest(&content),
            content_type,
            length: Some(content.len() as u64),
            content: BlobContent::Cached(content),
        }
    }

    /// A reference with no way to reach its content.
    pub fn detached(digest: impl Into<String>, length: Option<u64>, content_type: Option<String>) -> Self {
        Self {
            digest: digest.into(),
            content_type,
            length,
            content: BlobContent::Detached,
        }
    }

    /// Reads a marker dict. Content is deferred to `store` when there is one.
    ///
    /// # Errors
    ///
    /// Returns a decode error if `dict` lacks a string digest or is malformed.
    pub fn from_marker(dict: &DictView<'_>, store: Option<BlobStore>) -> CodecResult<Self> {
        let digest = dict
            .get(DIGEST_PROPERTY)?
            .ok_or_else(|| litebridge_codec::CodecError::invalid_structure("blob has no digest"))?
            .as_str()?
            .to_owned();
        let length = match dict.get(LENGTH_PROPERTY)? {
            Some(view) => read_length(view)?,
            None => None,
        };
        let content_type = match dict.get(CONTENT_TYPE_PROPERTY)? {
            Some(view) if view.tag() == Tag::String => Some(view.as_str()?.to_owned()),
            _ => None,
        };
        Ok(Self {
            digest,
            content_type,
            length,
            content: store.map_or(BlobContent::Detached, BlobContent::Deferred),
        })
    }

    /// The content digest.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// The MIME type, if known.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The content length in bytes, if known.
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// True if the content is held in memory.
    pub fn is_cached(&self) -> bool {
        matches!(self.content, BlobContent::Cached(_))
    }

    /// The store this blob loads from, if any.
    pub fn store(&self) -> Option<&BlobStore> {
        match &self.content {
            BlobContent::Deferred(store) => Some(store),
            _ => None,
        }
    }

    /// The content, loading it from the store with its default options.
    ///
    /// Returns `Ok(None)` if there is no store or the store has no content for
    /// this digest. Loaded content is not kept.
    ///
    /// # Errors
    ///
    /// `UseAfterRelease` if the store's database was closed; `Operation` for
    /// native I/O failures; `TimedOut` past the configured deadline.
    pub fn data(&self) -> BridgeResult<Option<Bytes>> {
        match &self.content {
            BlobContent::Cached(content) => Ok(Some(content.clone())),
            BlobContent::Deferred(store) => store.load(&self.digest, &store.default_load_options()?),
            BlobContent::Detached => Ok(None),
        }
    }

    /// The content, loaded under explicit limits.
    ///
    /// # Errors
    ///
    /// As [`data`](BlobRef::data), plus `Cancelled` if `options.cancel` fires.
    pub fn load(&self, options: &LoadOptions) -> BridgeResult<Option<Bytes>> {
        match &self.content {
            BlobContent::Cached(content) => {
                options.check(None)?;
                Ok(Some(content.clone()))
            }
            BlobContent::Deferred(store) => store.load(&self.digest, options),
            BlobContent::Detached => Ok(None),
        }
    }

    /// Opens a reader over the content.
    ///
    /// # Errors
    ///
    /// As [`data`](BlobRef::data).
    pub fn open_reader(&self) -> BridgeResult<Option<BlobReader>> {
        match &self.content {
            BlobContent::Cached(content) => Ok(Some(BlobReader::memory(content.clone()))),
            BlobContent::Deferred(store) => store.open_reader(&self.digest),
            BlobContent::Detached => Ok(None),
        }
    }

    /// Writes the marker dict.
    pub(crate) fn encode_marker(&self, enc: &mut Encoder) -> CodecResult<()> {
        enc.begin_dict()?;
        enc.write_key(TYPE_PROPERTY)?;
        enc.write_string(BLOB_TYPE)?;
        enc.write_key(DIGEST_PROPERTY)?;
        enc.write_string(&self.digest)?;
        if let Some(length) = self.length {
            enc.write_key(LENGTH_PROPERTY)?;
            enc.write_unsigned(length)?;
        }
        if let Some(content_type) = &self.content_type {
            enc.write_key(CONTENT_TYPE_PROPERTY)?;
            enc.write_string(content_type)?;
        }
        enc.end_dict()
    }

    fn cached(&self) -> Option<&Bytes> {
        match &self.content {
            BlobContent::Cached(content) => Some(content),
            _ => None,
        }
    }
}

impl PartialEq for BlobRef {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
            && self.length == other.length
            && self.content_type == other.content_type
    }
}

impl fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let content = match &self.content {
            BlobContent::Cached(_) => "cached",
            BlobContent::Deferred(_) => "deferred",
            BlobContent::Detached => "detached",
        };
        f.debug_struct("BlobRef")
            .field("digest", &self.digest)
            .field("content_type", &self.content_type)
            .field("length", &self.length)
            .field("content", &content)
            .finish()
    }
}

/// Cooperative cancellation for blob loads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the token. Every clone observes it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once fired.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Limits for a blob load.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Give up after this long.
    pub timeout: Option<Duration>,
    /// Give up when this fires.
    pub cancel: Option<CancelToken>,
}

impl LoadOptions {
    /// No limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the deadline.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the cancel token.
    #[must_use]
    pub fn cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_unbounded(&self) -> bool {
        self.timeout.is_none() && self.cancel.is_none()
    }

    fn deadline(&self) -> Option<Instant> {
        self.timeout.and_then(|t| Instant::now().checked_add(t))
    }

    fn check(&self, deadline: Option<Instant>) -> BridgeResult<()> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(BridgeError::Cancelled);
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(BridgeError::TimedOut);
        }
        Ok(())
    }
}

/// A database's blob storage, as seen from values decoded out of it.
///
/// Holds the database weakly; once it is closed or dropped, every access
/// fails with `UseAfterRelease`.
#[derive(Clone)]
pub struct BlobStore {
    owner: Weak<DatabaseInner>,
}

impl BlobStore {
    pub(crate) fn new(owner: Weak<DatabaseInner>) -> Self {
        Self { owner }
    }

    fn owner(&self) -> BridgeResult<(Arc<DatabaseInner>, RawHandle)> {
        let owner = self
            .owner
            .upgrade()
            .ok_or(BridgeError::use_after_release("database"))?;
        let raw = owner.handle.raw()?;
        Ok((owner, raw))
    }

    /// True while the owning database is open.
    pub fn is_open(&self) -> bool {
        self.owner().is_ok()
    }

    /// Limits used by [`BlobRef::data`].
    ///
    /// # Errors
    ///
    /// `UseAfterRelease` if the database is gone.
    pub fn default_load_options(&self) -> BridgeResult<LoadOptions> {
        let (owner, _) = self.owner()?;
        Ok(LoadOptions {
            timeout: owner.config.blob_load_timeout,
            cancel: None,
        })
    }

    /// Loads the content stored under `digest`.
    ///
    /// With no limits this is a single native call; otherwise content is
    /// streamed in chunks of at most `blob_chunk_size` bytes, checking the
    /// limits before each chunk.
    ///
    /// # Errors
    ///
    /// `UseAfterRelease`, `Operation`, `TimedOut` or `Cancelled`.
    pub fn load(&self, digest: &str, options: &LoadOptions) -> BridgeResult<Option<Bytes>> {
        let (owner, raw) = self.owner()?;
        if options.is_unbounded() {
            debug!(digest, "loading blob");
            return owner
                .engine
                .load_blob_content(raw, digest)
                .map(|content| content.map(Bytes::from))
                .map_err(|err| BridgeError::operation(format!("Couldn't load blob {digest}"), err));
        }

        let deadline = options.deadline();
        options.check(deadline)?;
        let Some(mut reader) = Self::open_stream(&owner, raw, digest)? else {
            return Ok(None);
        };
        debug!(digest, timeout = ?options.timeout, "streaming blob");
        let mut content = Vec::new();
        let mut chunk = vec![0u8; owner.config.chunk_size()];
        loop {
            options.check(deadline)?;
            let n = reader.read_chunk(&mut chunk)?;
            if n == 0 {
                break;
            }
            content.extend_from_slice(&chunk[..n]);
        }
        trace!(digest, len = content.len(), "blob streamed");
        Ok(Some(Bytes::from(content)))
    }

    /// Opens a reader over the content stored under `digest`.
    ///
    /// # Errors
    ///
    /// `UseAfterRelease` or `Operation`.
    pub fn open_reader(&self, digest: &str) -> BridgeResult<Option<BlobReader>> {
        let (owner, raw) = self.owner()?;
        Self::open_stream(&owner, raw, digest)
    }

    fn open_stream(
        owner: &DatabaseInner,
        raw: RawHandle,
        digest: &str,
    ) -> BridgeResult<Option<BlobReader>> {
        let stream = owner
            .engine
            .open_blob_stream(raw, digest)
            .map_err(|err| BridgeError::operation(format!("Couldn't open blob {digest}"), err))?;
        Ok(stream.filter(|s| !s.is_null()).map(|stream| {
            BlobReader::native(
                NativeHandle::adopt(Arc::clone(&owner.engine), stream),
                owner.config.chunk_size(),
            )
        }))
    }

    /// Writes a new blob's content into this store.
    ///
    /// Blobs already deferred to a store have nothing to write.
    ///
    /// # Errors
    ///
    /// `NotFound` if the blob carries no content, plus the errors of the
    /// native write.
    pub fn install(&self, blob: &BlobRef) -> BridgeResult<()> {
        let (owner, raw) = self.owner()?;
        let content = match (blob.cached(), blob.store()) {
            (Some(content), _) => content,
            (None, Some(_)) => return Ok(()),
            (None, None) => {
                return Err(BridgeError::not_found(format!(
                    "content for blob {}",
                    blob.digest
                )))
            }
        };
        owner
            .engine
            .write_blob(raw, &blob.digest, content)
            .map_err(|err| BridgeError::operation("Couldn't save blob", err))?;
        debug!(digest = %blob.digest, len = content.len(), "blob installed");
        Ok(())
    }
}

impl fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStore")
            .field("open", &self.is_open())
            .finish()
    }
}

enum ReaderSource {
    Native { stream: NativeHandle, chunk_size: usize },
    Memory(Cursor<Bytes>),
}

/// Streaming access to blob content.
///
/// Reads never return more than the store's chunk size. The native stream is
/// released at end of stream or on drop, whichever comes first.
pub struct BlobReader {
    source: ReaderSource,
}

impl BlobReader {
    fn native(stream: NativeHandle, chunk_size: usize) -> Self {
        Self {
            source: ReaderSource::Native { stream, chunk_size },
        }
    }

    fn memory(content: Bytes) -> Self {
        Self {
            source: ReaderSource::Memory(Cursor::new(content)),
        }
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> BridgeResult<usize> {
        match &mut self.source {
            ReaderSource::Memory(cursor) => Ok(cursor.read(buf)?),
            ReaderSource::Native { stream, chunk_size } => {
                if buf.is_empty() || stream.is_released() {
                    return Ok(0);
                }
                let limit = buf.len().min(*chunk_size);
                let raw = stream.raw()?;
                let n = stream
                    .engine()
                    .read_blob_stream(raw, &mut buf[..limit])
                    .map_err(|err| BridgeError::operation("Couldn't read blob", err))?;
                if n > limit {
                    stream.release();
                    return Err(BridgeError::operation(
                        "Couldn't read blob",
                        NativeError::new(
                            ErrorDomain::Engine,
                            READ_OVERRUN,
                            format!("stream reported {n} bytes for a {limit} byte buffer"),
                        ),
                    ));
                }
                if n == 0 {
                    stream.release();
                }
                Ok(n)
            }
        }
    }

    /// Releases the underlying stream early.
    pub fn close(&mut self) {
        if let ReaderSource::Native { stream, .. } = &self.source {
            stream.release();
        }
    }
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_chunk(buf).map_err(io::Error::from)
    }
}

impl fmt::Debug for BlobReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.source {
            ReaderSource::Native { .. } => "native",
            ReaderSource::Memory(_) => "memory",
        };
        f.debug_struct("BlobReader").field("source", &kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use litebridge_codec::parse;
    use litebridge_codec::Trust;

    fn marker(entries: &[(&str, &str)]) -> Bytes {
        let mut enc = Encoder::new();
        enc.begin_dict().unwrap();
        for (key, value) in entries {
            enc.write_key(key).unwrap();
            enc.write_string(value).unwrap();
        }
        enc.end_dict().unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn detects_marker_shape() {
        let yes = marker(&[("@type", "blob"), ("digest", "sha256-x")]);
        let no_digest = marker(&[("@type", "blob")]);
        let other_type = marker(&[("@type", "attachment"), ("digest", "sha256-x")]);

        let check = |bytes: &Bytes| {
            let dict = parse(bytes, Trust::Untrusted).unwrap().as_dict().unwrap();
            is_blob(&dict).unwrap()
        };
        assert!(check(&yes));
        assert!(!check(&no_digest));
        assert!(!check(&other_type));
    }

    #[test]
    fn digest_format() {
        // SHA-256 of the empty string.
        assert_eq!(
            content_digest(b""),
            "sha256-47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn from_data_caches_content() {
        let blob = BlobRef::from_data(&b"hello"[..], Some("text/plain".into()));
        assert!(blob.is_cached());
        assert_eq!(blob.length(), Some(5));
        assert_eq!(blob.content_type(), Some("text/plain"));
        assert_eq!(blob.data().unwrap().unwrap(), &b"hello"[..]);
        assert_eq!(blob.digest(), content_digest(b"hello"));
    }

    #[test]
    fn marker_round_trip_drops_content() {
        let blob = BlobRef::from_data(&b"abc"[..], None);
        let mut enc = Encoder::new();
        blob.encode_marker(&mut enc).unwrap();
        let bytes = enc.finish().unwrap();

        let dict = parse(&bytes, Trust::Untrusted).unwrap().as_dict().unwrap();
        assert!(dict.get("content").unwrap().is_none());
        let decoded = BlobRef::from_marker(&dict, None).unwrap();
        assert_eq!(decoded, blob);
        assert!(!decoded.is_cached());
        assert_eq!(decoded.data().unwrap(), None);
    }

    #[test]
    fn cached_load_honours_cancel() {
        let blob = BlobRef::from_data(&b"abc"[..], None);
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(
            blob.load(&LoadOptions::new().cancel(token)),
            Err(BridgeError::Cancelled)
        ));
    }

    #[test]
    fn memory_reader() {
        let blob = BlobRef::from_data(&b"stream me"[..], None);
        let mut out = String::new();
        blob.open_reader()
            .unwrap()
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "stream me");
    }

    #[test]
    fn negative_length_is_ignored() {
        let mut enc = Encoder::new();
        enc.begin_dict().unwrap();
        enc.write_key("@type").unwrap();
        enc.write_string("blob").unwrap();
        enc.write_key("digest").unwrap();
        enc.write_string("d").unwrap();
        enc.write_key("length").unwrap();
        enc.write_int(-4).unwrap();
        enc.end_dict().unwrap();
        let bytes = enc.finish().unwrap();
        let dict = parse(&bytes, Trust::Untrusted).unwrap().as_dict().unwrap();
        assert_eq!(BlobRef::from_marker(&dict, None).unwrap().length(), None);
    }
}
