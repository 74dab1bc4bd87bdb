//! Owners of native value buffers.

use crate::blob::BlobStore;
use crate::error::{BridgeError, BridgeResult};
use bytes::Bytes;
use litebridge_codec::{Trust, ValueView};
use std::fmt;
use std::sync::{Arc, Weak};

/// An encoded value buffer received from the engine.
///
/// The buffer holds the only strong reference to its bytes. Lazy containers
/// decoded from it keep a weak one, so after [`release`](ValueBuffer::release)
/// (or drop) they fail with `UseAfterRelease` instead of reading freed memory.
pub struct ValueBuffer {
    bytes: Option<Arc<Bytes>>,
    weak: Weak<Bytes>,
    store: Option<BlobStore>,
    trust: Trust,
}

impl ValueBuffer {
    /// Takes ownership of `bytes`, validating them unless `trust` is `Trusted`.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Decode` if the buffer is empty or malformed.
    pub fn parse(bytes: impl Into<Bytes>, trust: Trust) -> BridgeResult<Self> {
        let bytes = bytes.into();
        litebridge_codec::parse(&bytes, trust)?;
        let bytes = Arc::new(bytes);
        Ok(Self {
            weak: Arc::downgrade(&bytes),
            bytes: Some(bytes),
            store: None,
            trust,
        })
    }

    /// Attaches the store that blobs in this buffer load from.
    #[must_use]
    pub fn with_store(mut self, store: BlobStore) -> Self {
        self.store = Some(store);
        self
    }

    /// A view of the root value.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterRelease` once released.
    pub fn root(&self) -> BridgeResult<ValueView<'_>> {
        Ok(ValueView::root(self.bytes()?)?)
    }

    /// The encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterRelease` once released.
    pub fn bytes(&self) -> BridgeResult<&Bytes> {
        self.bytes
            .as_deref()
            .ok_or(BridgeError::use_after_release("value buffer"))
    }

    /// True if `view` points into this buffer.
    pub fn contains(&self, view: &ValueView<'_>) -> bool {
        let Some(bytes) = self.bytes.as_deref() else {
            return false;
        };
        bytes
            .get(view.offset()..view.offset() + view.encoded_len())
            .is_some_and(|own| std::ptr::eq(own.as_ptr(), view.as_bytes().as_ptr()))
    }

    /// Drops the bytes. Outstanding lazy values stop resolving.
    pub fn release(&mut self) {
        self.bytes = None;
    }

    /// True once released.
    pub fn is_released(&self) -> bool {
        self.bytes.is_none()
    }

    /// A weak reference to the bytes, as held by lazy values.
    pub fn downgrade(&self) -> Weak<Bytes> {
        self.weak.clone()
    }

    /// The blob store attached to this buffer.
    pub fn store(&self) -> Option<&BlobStore> {
        self.store.as_ref()
    }

    /// How this buffer was parsed.
    pub fn trust(&self) -> Trust {
        self.trust
    }
}

impl fmt::Debug for ValueBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueBuffer")
            .field("len", &self.bytes.as_ref().map(|b| b.len()))
            .field("trust", &self.trust)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_invalidates_weak_ref() {
        let mut buffer = ValueBuffer::parse(vec![0x03], Trust::Untrusted).unwrap();
        let weak = buffer.downgrade();
        assert!(weak.upgrade().is_some());
        assert!(buffer.root().unwrap().as_bool().unwrap());

        buffer.release();
        assert!(buffer.is_released());
        assert!(weak.upgrade().is_none());
        assert!(matches!(
            buffer.root(),
            Err(BridgeError::UseAfterRelease { .. })
        ));
    }

    #[test]
    fn untrusted_input_is_validated() {
        assert!(ValueBuffer::parse(vec![0x00, 0x00], Trust::Untrusted).is_err());
        assert!(ValueBuffer::parse(vec![0x00, 0x00], Trust::Trusted).is_ok());
        assert!(ValueBuffer::parse(Vec::new(), Trust::Trusted).is_err());
    }

    #[test]
    fn contains_only_own_views() {
        let a = ValueBuffer::parse(vec![0x00], Trust::Untrusted).unwrap();
        let b = ValueBuffer::parse(vec![0x00], Trust::Untrusted).unwrap();
        let view = a.root().unwrap();
        assert!(a.contains(&view));
        assert!(!b.contains(&view));
    }
}
