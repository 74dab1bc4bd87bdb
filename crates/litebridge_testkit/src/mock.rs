//! An in-memory native engine.
//!
//! [`MockEngine`] keeps a refcount ledger for every handle it hands out, a
//! listener table the test drives by hand, and a blob store. Faults can be
//! injected per operation.

use bytes::Bytes;
use litebridge_core::{
    content_digest, ChangeEvent, Dispatcher, ErrorDomain, NativeEngine, NativeError, RawHandle,
    RawToken, RouteId,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::trace;

/// Error code the mock reports for a handle used after its last release.
pub const STALE_HANDLE: i32 = 13;

#[derive(Clone)]
struct Listener {
    owner: RawHandle,
    route: RouteId,
    dispatcher: Dispatcher,
    active: bool,
}

#[derive(Default)]
struct Faults {
    add_listener: Option<NativeError>,
    load: Option<NativeError>,
    read: Option<NativeError>,
    overreport: Option<usize>,
    write: Option<NativeError>,
}

/// Counters for calls the bridge made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `load_blob_content` calls.
    pub loads: usize,
    /// `open_blob_stream` calls that returned a stream.
    pub stream_opens: usize,
    /// `read_blob_stream` calls.
    pub reads: usize,
    /// `write_blob` calls.
    pub writes: usize,
}

/// An in-memory [`NativeEngine`].
#[derive(Default)]
pub struct MockEngine {
    next: AtomicU64,
    refcounts: Mutex<HashMap<RawHandle, i64>>,
    over_released: AtomicUsize,
    listeners: Mutex<HashMap<RawToken, Listener>>,
    removed: Mutex<Vec<(RawToken, bool)>>,
    blobs: Mutex<HashMap<String, Bytes>>,
    streams: Mutex<HashMap<RawHandle, Cursor<Bytes>>>,
    faults: Mutex<Faults>,
    read_delay: Mutex<Option<Duration>>,
    calls: Mutex<CallCounts>,
}

impl MockEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty engine behind an `Arc`.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Allocates a handle with a refcount of one, as a native open would.
    pub fn open_handle(&self) -> RawHandle {
        let handle = RawHandle::new(self.next_id());
        self.refcounts.lock().insert(handle, 1);
        handle
    }

    /// Current refcount of `handle`; zero for unknown handles.
    pub fn refcount(&self, handle: RawHandle) -> i64 {
        self.refcounts.lock().get(&handle).copied().unwrap_or(0)
    }

    /// Handles whose refcount is above zero.
    pub fn live_handles(&self) -> Vec<RawHandle> {
        let mut live: Vec<_> = self
            .refcounts
            .lock()
            .iter()
            .filter(|(_, &count)| count > 0)
            .map(|(&handle, _)| handle)
            .collect();
        live.sort();
        live
    }

    /// Number of releases that took a refcount below zero.
    pub fn over_released(&self) -> usize {
        self.over_released.load(Ordering::SeqCst)
    }

    fn is_live(&self, handle: RawHandle) -> bool {
        self.refcount(handle) > 0
    }

    fn stale(handle: RawHandle) -> NativeError {
        NativeError::new(
            ErrorDomain::Engine,
            STALE_HANDLE,
            format!("{handle} used after release"),
        )
    }

    /// Listeners registered and not yet removed.
    pub fn active_listeners(&self) -> usize {
        self.listeners.lock().values().filter(|l| l.active).count()
    }

    /// Tokens of registered listeners still active, in issue order.
    pub fn active_tokens(&self) -> Vec<RawToken> {
        let mut tokens: Vec<_> = self
            .listeners
            .lock()
            .iter()
            .filter(|(_, l)| l.active)
            .map(|(&token, _)| token)
            .collect();
        tokens.sort_by_key(|t| t.as_u64());
        tokens
    }

    /// Tokens passed to `remove_listener`, in call order.
    pub fn removed_tokens(&self) -> Vec<RawToken> {
        self.removed.lock().iter().map(|&(token, _)| token).collect()
    }

    /// Listener removals that arrived after their owner's last release.
    pub fn removals_after_release(&self) -> usize {
        self.removed.lock().iter().filter(|&&(_, live)| !live).count()
    }

    /// The owner a listener was registered on.
    pub fn listener_owner(&self, token: RawToken) -> Option<RawHandle> {
        self.listeners.lock().get(&token).map(|l| l.owner)
    }

    /// Delivers `event` to the listener registered under `token`, whether or
    /// not it was removed since. Returns true if the host ran a handler.
    ///
    /// The table lock is not held while the handler runs.
    pub fn fire(&self, token: RawToken, event: &ChangeEvent) -> bool {
        let entry = self.listeners.lock().get(&token).cloned();
        match entry {
            Some(listener) => listener.dispatcher.dispatch(listener.route, event),
            None => false,
        }
    }

    /// Delivers `event` to every active listener. Returns how many ran.
    pub fn fire_all(&self, event: &ChangeEvent) -> usize {
        self.active_tokens()
            .into_iter()
            .filter(|&token| self.fire(token, event))
            .count()
    }

    /// Stores blob content, returning its digest.
    pub fn put_blob(&self, content: impl Into<Bytes>) -> String {
        let content = content.into();
        let digest = content_digest(&content);
        self.blobs.lock().insert(digest.clone(), content);
        digest
    }

    /// The stored content for `digest`.
    pub fn blob(&self, digest: &str) -> Option<Bytes> {
        self.blobs.lock().get(digest).cloned()
    }

    /// Blob streams not yet released.
    pub fn open_streams(&self) -> usize {
        self.streams.lock().len()
    }

    /// Makes the next `add_listener` fail with `error`.
    pub fn fail_next_add_listener(&self, error: NativeError) {
        self.faults.lock().add_listener = Some(error);
    }

    /// Makes the next blob load or stream open fail with `error`.
    pub fn fail_next_load(&self, error: NativeError) {
        self.faults.lock().load = Some(error);
    }

    /// Makes the next stream read fail with `error`.
    pub fn fail_next_read(&self, error: NativeError) {
        self.faults.lock().read = Some(error);
    }

    /// Makes the next stream read claim `extra` more bytes than the buffer holds.
    pub fn overreport_next_read(&self, extra: usize) {
        self.faults.lock().overreport = Some(extra);
    }

    /// Makes the next blob write fail with `error`.
    pub fn fail_next_write(&self, error: NativeError) {
        self.faults.lock().write = Some(error);
    }

    /// Sleeps this long in every stream read.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.lock() = delay;
    }

    /// Calls made so far.
    pub fn calls(&self) -> CallCounts {
        *self.calls.lock()
    }
}

impl NativeEngine for MockEngine {
    fn retain(&self, handle: RawHandle) {
        *self.refcounts.lock().entry(handle).or_default() += 1;
    }

    fn release(&self, handle: RawHandle) {
        let remaining = {
            let mut refcounts = self.refcounts.lock();
            let count = refcounts.entry(handle).or_default();
            *count -= 1;
            *count
        };
        if remaining < 0 {
            self.over_released.fetch_add(1, Ordering::SeqCst);
        }
        if remaining <= 0 {
            self.streams.lock().remove(&handle);
        }
        trace!(%handle, remaining, "mock release");
    }

    fn add_listener(
        &self,
        owner: RawHandle,
        route: RouteId,
        dispatcher: Dispatcher,
    ) -> Result<RawToken, NativeError> {
        if let Some(error) = self.faults.lock().add_listener.take() {
            return Err(error);
        }
        if !self.is_live(owner) {
            return Err(Self::stale(owner));
        }
        let token = RawToken::new(self.next_id());
        self.listeners.lock().insert(
            token,
            Listener {
                owner,
                route,
                dispatcher,
                active: true,
            },
        );
        Ok(token)
    }

    fn remove_listener(&self, token: RawToken) -> Result<(), NativeError> {
        let owner = self.listeners.lock().get(&token).map(|l| l.owner);
        let owner_live = owner.is_some_and(|owner| self.is_live(owner));
        self.removed.lock().push((token, owner_live));
        match self.listeners.lock().get_mut(&token) {
            Some(listener) if listener.active => {
                listener.active = false;
                Ok(())
            }
            _ => Err(NativeError::new(
                ErrorDomain::Engine,
                STALE_HANDLE,
                format!("{token} is not registered"),
            )),
        }
    }

    fn load_blob_content(
        &self,
        store: RawHandle,
        digest: &str,
    ) -> Result<Option<Vec<u8>>, NativeError> {
        self.calls.lock().loads += 1;
        if let Some(error) = self.faults.lock().load.take() {
            return Err(error);
        }
        if !self.is_live(store) {
            return Err(Self::stale(store));
        }
        Ok(self.blob(digest).map(|content| content.to_vec()))
    }

    fn open_blob_stream(
        &self,
        store: RawHandle,
        digest: &str,
    ) -> Result<Option<RawHandle>, NativeError> {
        if let Some(error) = self.faults.lock().load.take() {
            return Err(error);
        }
        if !self.is_live(store) {
            return Err(Self::stale(store));
        }
        let Some(content) = self.blob(digest) else {
            return Ok(None);
        };
        let stream = self.open_handle();
        self.streams.lock().insert(stream, Cursor::new(content));
        self.calls.lock().stream_opens += 1;
        Ok(Some(stream))
    }

    fn read_blob_stream(&self, stream: RawHandle, buf: &mut [u8]) -> Result<usize, NativeError> {
        self.calls.lock().reads += 1;
        let delay = *self.read_delay.lock();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        if let Some(error) = self.faults.lock().read.take() {
            return Err(error);
        }
        if let Some(extra) = self.faults.lock().overreport.take() {
            return Ok(buf.len() + extra);
        }
        let mut streams = self.streams.lock();
        let cursor = streams.get_mut(&stream).ok_or_else(|| Self::stale(stream))?;
        cursor
            .read(buf)
            .map_err(|err| NativeError::new(ErrorDomain::Posix, 5, err.to_string()))
    }

    fn write_blob(&self, store: RawHandle, digest: &str, content: &[u8]) -> Result<(), NativeError> {
        self.calls.lock().writes += 1;
        if let Some(error) = self.faults.lock().write.take() {
            return Err(error);
        }
        if !self.is_live(store) {
            return Err(Self::stale(store));
        }
        self.blobs
            .lock()
            .insert(digest.to_owned(), Bytes::copy_from_slice(content));
        Ok(())
    }
}
