//! The database owner.
//!
//! A [`Database`] owns one native handle, the listeners registered on it and
//! the blob store that values decoded from it load content from. Closing
//! removes every outstanding listener before the handle is released.

use crate::blob::{BlobRef, BlobStore};
use crate::buffer::ValueBuffer;
use crate::config::BridgeConfig;
use crate::decoder::Decoder;
use crate::engine::NativeEngine;
use crate::error::{BridgeError, BridgeResult, NativeError};
use crate::handle::NativeHandle;
use crate::listener::{ChangeEvent, ListenerSet, ListenerToken};
use crate::types::RawHandle;
use crate::value::HostValue;
use bytes::Bytes;
use litebridge_codec::Trust;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Message carried by a failed [`Database::open`].
pub const OPEN_FAILED: &str = "Couldn't open database";

pub(crate) struct DatabaseInner {
    pub(crate) name: String,
    pub(crate) engine: Arc<dyn NativeEngine>,
    pub(crate) handle: NativeHandle,
    pub(crate) listeners: ListenerSet,
    pub(crate) config: BridgeConfig,
    is_open: RwLock<bool>,
}

/// An open database.
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Opens a database through `open`, a native open call.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Open` with the message
    /// `"Couldn't open database: <native message>"` if `open` returns null.
    pub fn open<F>(
        engine: Arc<dyn NativeEngine>,
        name: impl Into<String>,
        config: BridgeConfig,
        open: F,
    ) -> BridgeResult<Self>
    where
        F: FnOnce(&mut NativeError) -> RawHandle,
    {
        let name = name.into();
        let handle = NativeHandle::open(Arc::clone(&engine), OPEN_FAILED, open)?;
        info!(%name, "database opened");
        Ok(Self {
            inner: Arc::new(DatabaseInner {
                listeners: ListenerSet::new(Arc::clone(&engine)),
                name,
                engine,
                handle,
                config,
                is_open: RwLock::new(true),
            }),
        })
    }

    /// The database name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The configuration the database was opened with.
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// The native handle.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterRelease` once closed.
    pub fn raw_handle(&self) -> BridgeResult<RawHandle> {
        self.inner.handle.raw()
    }

    /// True once [`close`](Database::close) has started.
    pub fn is_closed(&self) -> bool {
        !*self.inner.is_open.read()
    }

    /// Registers a change listener.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterRelease` once closed, or `Operation` if the engine
    /// refuses the listener.
    pub fn add_change_listener<F>(&self, handler: F) -> BridgeResult<ListenerToken>
    where
        F: FnMut(&ChangeEvent) + Send + 'static,
    {
        // Held across the native call so close cannot drain in between.
        let is_open = self.inner.is_open.read();
        if !*is_open {
            return Err(BridgeError::use_after_release("database"));
        }
        let raw = self.raw_handle()?;
        self.inner.listeners.subscribe(raw, handler)
    }

    /// Number of listeners not yet removed.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.outstanding()
    }

    /// This database's blob store.
    pub fn blob_store(&self) -> BlobStore {
        BlobStore::new(Arc::downgrade(&self.inner))
    }

    /// Takes ownership of an encoded buffer whose blobs load from this database.
    ///
    /// # Errors
    ///
    /// Returns a decode error for malformed untrusted input.
    pub fn buffer(&self, bytes: impl Into<Bytes>, trust: Trust) -> BridgeResult<ValueBuffer> {
        Ok(ValueBuffer::parse(bytes, trust)?.with_store(self.blob_store()))
    }

    /// Like [`buffer`](Database::buffer), trusting per the configuration.
    pub fn document_buffer(&self, bytes: impl Into<Bytes>) -> BridgeResult<ValueBuffer> {
        self.buffer(bytes, self.inner.config.trust)
    }

    /// Decodes a document's properties.
    ///
    /// # Errors
    ///
    /// See [`Decoder::decode`].
    pub fn properties(
        &self,
        buffer: &ValueBuffer,
        depth: u32,
        mutable: bool,
    ) -> BridgeResult<HostValue> {
        Decoder::new(buffer).mutable(mutable).decode_root(depth)
    }

    /// Like [`properties`](Database::properties), with the configured default depth.
    ///
    /// # Errors
    ///
    /// See [`Decoder::decode`].
    pub fn document_properties(
        &self,
        buffer: &ValueBuffer,
        mutable: bool,
    ) -> BridgeResult<HostValue> {
        self.properties(buffer, self.inner.config.default_depth, mutable)
    }

    /// Writes a new blob's content into this database.
    ///
    /// # Errors
    ///
    /// See [`BlobStore::install`].
    pub fn save_blob(&self, blob: &BlobRef) -> BridgeResult<()> {
        self.blob_store().install(blob)
    }

    /// Removes all listeners, then releases the native handle.
    ///
    /// Waits for listener registrations already in flight. Later calls do
    /// nothing.
    pub fn close(&self) {
        {
            let mut is_open = self.inner.is_open.write();
            if !*is_open {
                return;
            }
            *is_open = false;
        }
        // Drained outside the lock; handlers running now may still subscribe.
        let drained = self.inner.listeners.drain();
        self.inner.handle.release();
        debug!(name = %self.inner.name, drained, "database closed");
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.inner.name)
            .field("closed", &self.is_closed())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
