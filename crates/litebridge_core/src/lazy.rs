//! Containers that decode on first access.
//!
//! A lazy container starts out holding a weak reference to its buffer and the
//! offset of its encoded value. The first access of any kind decodes one
//! level (nested containers become lazy in turn), caches the result and drops
//! the source. Concurrent first accesses resolve once.

use crate::decoder::{decode_array, decode_dict, DecodeContext};
use crate::error::{BridgeError, BridgeResult};
use crate::value::HostValue;
use bytes::Bytes;
use indexmap::IndexMap;
use litebridge_codec::ValueView;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::trace;

/// Where an unresolved container reads from.
#[derive(Clone)]
pub(crate) struct LazySource {
    pub(crate) cx: DecodeContext,
    pub(crate) offset: usize,
}

impl LazySource {
    pub(crate) fn bytes(&self) -> BridgeResult<Arc<Bytes>> {
        self.cx
            .buffer
            .upgrade()
            .ok_or(BridgeError::use_after_release("value buffer"))
    }
}

/// An unresolved container's encoded form, or its resolved content.
pub(crate) enum Snapshot<'a, T> {
    Encoded { bytes: Arc<Bytes>, offset: usize },
    Resolved(&'a T),
}

struct LazyCell<T> {
    pending: Mutex<Option<LazySource>>,
    resolved: OnceLock<T>,
    mutable: bool,
}

impl<T> LazyCell<T> {
    fn unresolved(source: LazySource) -> Self {
        Self {
            mutable: source.cx.mutable,
            pending: Mutex::new(Some(source)),
            resolved: OnceLock::new(),
        }
    }

    fn resolved(value: T, mutable: bool) -> Self {
        Self {
            pending: Mutex::new(None),
            resolved: OnceLock::from(value),
            mutable,
        }
    }

    fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    /// On failure the source is kept, so a later access fails the same way.
    fn get_or_resolve<F>(&self, resolve: F) -> BridgeResult<&T>
    where
        F: FnOnce(&LazySource) -> BridgeResult<T>,
    {
        if let Some(value) = self.resolved.get() {
            return Ok(value);
        }
        let mut pending = self.pending.lock();
        if let Some(value) = self.resolved.get() {
            return Ok(value);
        }
        let source = pending
            .as_ref()
            .ok_or(BridgeError::use_after_release("lazy container"))?;
        let value = resolve(source)?;
        *pending = None;
        Ok(self.resolved.get_or_init(|| value))
    }

    fn get_mut_or_resolve<F>(&mut self, resolve: F) -> BridgeResult<&mut T>
    where
        F: FnOnce(&LazySource) -> BridgeResult<T>,
    {
        if !self.mutable {
            return Err(BridgeError::Immutable);
        }
        self.get_or_resolve(resolve)?;
        self.resolved
            .get_mut()
            .ok_or(BridgeError::use_after_release("lazy container"))
    }

    fn snapshot(&self) -> BridgeResult<Snapshot<'_, T>> {
        if let Some(value) = self.resolved.get() {
            return Ok(Snapshot::Resolved(value));
        }
        let pending = self.pending.lock();
        if let Some(value) = self.resolved.get() {
            return Ok(Snapshot::Resolved(value));
        }
        let source = pending
            .as_ref()
            .ok_or(BridgeError::use_after_release("lazy container"))?;
        Ok(Snapshot::Encoded {
            bytes: source.bytes()?,
            offset: source.offset,
        })
    }

    fn offset(&self) -> Option<usize> {
        self.pending.lock().as_ref().map(|source| source.offset)
    }

    fn into_inner<F>(self, resolve: F) -> BridgeResult<T>
    where
        F: FnOnce(&LazySource) -> BridgeResult<T>,
    {
        self.get_or_resolve(resolve)?;
        self.resolved
            .into_inner()
            .ok_or(BridgeError::use_after_release("lazy container"))
    }
}

impl<T: Clone> Clone for LazyCell<T> {
    fn clone(&self) -> Self {
        // Holding the lock keeps a resolution from landing halfway through.
        let pending = self.pending.lock();
        match self.resolved.get() {
            Some(value) => Self::resolved(value.clone(), self.mutable),
            None => Self {
                pending: Mutex::new(pending.clone()),
                resolved: OnceLock::new(),
                mutable: self.mutable,
            },
        }
    }
}

fn resolve_array(source: &LazySource) -> BridgeResult<Vec<HostValue>> {
    let bytes = source.bytes()?;
    let array = ValueView::at(&bytes, source.offset)?.as_array()?;
    trace!(offset = source.offset, count = array.count(), "resolving lazy array");
    decode_array(&source.cx, array, 0, 0)
}

fn resolve_dict(source: &LazySource) -> BridgeResult<IndexMap<String, HostValue>> {
    let bytes = source.bytes()?;
    let dict = ValueView::at(&bytes, source.offset)?.as_dict()?;
    trace!(offset = source.offset, count = dict.count(), "resolving lazy dict");
    decode_dict(&source.cx, dict, 0, 0)
}

fn out_of_bounds(index: usize, len: usize) -> BridgeError {
    BridgeError::not_found(format!("index {index} in array of length {len}"))
}

/// An array decoded on first access.
#[derive(Clone)]
pub struct LazyArray {
    cell: LazyCell<Vec<HostValue>>,
}

impl LazyArray {
    pub(crate) fn unresolved(source: LazySource) -> Self {
        Self {
            cell: LazyCell::unresolved(source),
        }
    }

    /// Wraps owned items. The result is already resolved.
    pub fn from_vec(items: Vec<HostValue>, mutable: bool) -> Self {
        Self {
            cell: LazyCell::resolved(items, mutable),
        }
    }

    /// True once the items have been decoded. Never triggers decoding.
    pub fn is_resolved(&self) -> bool {
        self.cell.is_resolved()
    }

    /// True if this array accepts mutation.
    pub fn is_mutable(&self) -> bool {
        self.cell.mutable
    }

    /// The items, decoding them on first call.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterRelease` if the buffer is gone, or a decode error.
    pub fn resolved(&self) -> BridgeResult<&[HostValue]> {
        self.cell.get_or_resolve(resolve_array).map(Vec::as_slice)
    }

    /// Number of items.
    pub fn len(&self) -> BridgeResult<usize> {
        Ok(self.resolved()?.len())
    }

    /// True if there are no items.
    pub fn is_empty(&self) -> BridgeResult<bool> {
        Ok(self.resolved()?.is_empty())
    }

    /// The item at `index`.
    pub fn get(&self, index: usize) -> BridgeResult<Option<&HostValue>> {
        Ok(self.resolved()?.get(index))
    }

    /// Iterates the items.
    pub fn iter(&self) -> BridgeResult<std::slice::Iter<'_, HostValue>> {
        Ok(self.resolved()?.iter())
    }

    /// Mutable access to the items.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Immutable` unless decoded as mutable.
    pub fn resolved_mut(&mut self) -> BridgeResult<&mut Vec<HostValue>> {
        self.cell.get_mut_or_resolve(resolve_array)
    }

    /// Appends an item.
    pub fn push(&mut self, value: impl Into<HostValue>) -> BridgeResult<()> {
        self.resolved_mut()?.push(value.into());
        Ok(())
    }

    /// Inserts an item at `index`, shifting later items.
    pub fn insert(&mut self, index: usize, value: impl Into<HostValue>) -> BridgeResult<()> {
        let items = self.resolved_mut()?;
        if index > items.len() {
            return Err(out_of_bounds(index, items.len()));
        }
        items.insert(index, value.into());
        Ok(())
    }

    /// Removes and returns the item at `index`.
    pub fn remove(&mut self, index: usize) -> BridgeResult<HostValue> {
        let items = self.resolved_mut()?;
        if index >= items.len() {
            return Err(out_of_bounds(index, items.len()));
        }
        Ok(items.remove(index))
    }

    /// Replaces the item at `index`, returning the old one.
    pub fn set(&mut self, index: usize, value: impl Into<HostValue>) -> BridgeResult<HostValue> {
        let items = self.resolved_mut()?;
        let len = items.len();
        let slot = items.get_mut(index).ok_or_else(|| out_of_bounds(index, len))?;
        Ok(std::mem::replace(slot, value.into()))
    }

    /// Consumes the wrapper, returning the items.
    pub fn into_vec(self) -> BridgeResult<Vec<HostValue>> {
        self.cell.into_inner(resolve_array)
    }

    pub(crate) fn snapshot(&self) -> BridgeResult<Snapshot<'_, Vec<HostValue>>> {
        self.cell.snapshot()
    }
}

impl fmt::Debug for LazyArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.resolved.get() {
            Some(items) => f.debug_tuple("LazyArray").field(items).finish(),
            None => f
                .debug_struct("LazyArray")
                .field("offset", &self.cell.offset())
                .finish_non_exhaustive(),
        }
    }
}

/// A dict decoded on first access. Keys keep native storage order.
#[derive(Clone)]
pub struct LazyDict {
    cell: LazyCell<IndexMap<String, HostValue>>,
}

impl LazyDict {
    pub(crate) fn unresolved(source: LazySource) -> Self {
        Self {
            cell: LazyCell::unresolved(source),
        }
    }

    /// Wraps an owned map. The result is already resolved.
    pub fn from_map(entries: IndexMap<String, HostValue>, mutable: bool) -> Self {
        Self {
            cell: LazyCell::resolved(entries, mutable),
        }
    }

    /// True once the entries have been decoded. Never triggers decoding.
    pub fn is_resolved(&self) -> bool {
        self.cell.is_resolved()
    }

    /// True if this dict accepts mutation.
    pub fn is_mutable(&self) -> bool {
        self.cell.mutable
    }

    /// The entries, decoding them on first call.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterRelease` if the buffer is gone, or a decode error.
    pub fn resolved(&self) -> BridgeResult<&IndexMap<String, HostValue>> {
        self.cell.get_or_resolve(resolve_dict)
    }

    /// Number of entries.
    pub fn len(&self) -> BridgeResult<usize> {
        Ok(self.resolved()?.len())
    }

    /// True if there are no entries.
    pub fn is_empty(&self) -> BridgeResult<bool> {
        Ok(self.resolved()?.is_empty())
    }

    /// Looks up `key`.
    pub fn get(&self, key: &str) -> BridgeResult<Option<&HostValue>> {
        Ok(self.resolved()?.get(key))
    }

    /// True if `key` is present.
    pub fn contains_key(&self, key: &str) -> BridgeResult<bool> {
        Ok(self.resolved()?.contains_key(key))
    }

    /// Iterates keys in storage order.
    pub fn keys(&self) -> BridgeResult<indexmap::map::Keys<'_, String, HostValue>> {
        Ok(self.resolved()?.keys())
    }

    /// Iterates entries in storage order.
    pub fn iter(&self) -> BridgeResult<indexmap::map::Iter<'_, String, HostValue>> {
        Ok(self.resolved()?.iter())
    }

    /// Mutable access to the entries.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Immutable` unless decoded as mutable.
    pub fn resolved_mut(&mut self) -> BridgeResult<&mut IndexMap<String, HostValue>> {
        self.cell.get_mut_or_resolve(resolve_dict)
    }

    /// Sets `key`, returning the previous value.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<HostValue>,
    ) -> BridgeResult<Option<HostValue>> {
        Ok(self.resolved_mut()?.insert(key.into(), value.into()))
    }

    /// Removes `key`, keeping the order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> BridgeResult<Option<HostValue>> {
        Ok(self.resolved_mut()?.shift_remove(key))
    }

    /// Consumes the wrapper, returning the entries.
    pub fn into_map(self) -> BridgeResult<IndexMap<String, HostValue>> {
        self.cell.into_inner(resolve_dict)
    }

    pub(crate) fn snapshot(&self) -> BridgeResult<Snapshot<'_, IndexMap<String, HostValue>>> {
        self.cell.snapshot()
    }
}

impl fmt::Debug for LazyDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.resolved.get() {
            Some(entries) => f.debug_tuple("LazyDict").field(entries).finish(),
            None => f
                .debug_struct("LazyDict")
                .field("offset", &self.cell.offset())
                .finish_non_exhaustive(),
        }
    }
}
