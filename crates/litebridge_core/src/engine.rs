//! The seam between this crate and the native engine.
//!
//! Everything the bridge needs from the engine goes through [`NativeEngine`].
//! Implementations wrap the real C API; tests use an in-memory mock.

use crate::error::NativeError;
use crate::listener::Dispatcher;
use crate::types::{RawHandle, RawToken, RouteId};

/// Operations the bridge performs on the native engine.
///
/// All methods may be called from any thread. Handles passed in are live
/// (retained) for the duration of the call.
pub trait NativeEngine: Send + Sync {
    /// Increments the refcount of `handle`.
    fn retain(&self, handle: RawHandle);

    /// Decrements the refcount of `handle`, freeing it at zero.
    fn release(&self, handle: RawHandle);

    /// Registers a change listener on `owner`.
    ///
    /// The engine later reports changes by calling
    /// [`Dispatcher::dispatch`] with `route`, possibly from its own threads
    /// and possibly after the listener was removed.
    fn add_listener(
        &self,
        owner: RawHandle,
        route: RouteId,
        dispatcher: Dispatcher,
    ) -> Result<RawToken, NativeError>;

    /// Unregisters a listener. The token is not used again afterwards.
    fn remove_listener(&self, token: RawToken) -> Result<(), NativeError>;

    /// Loads a blob's whole content in one call.
    ///
    /// Returns `Ok(None)` if the store holds no content for `digest`.
    fn load_blob_content(
        &self,
        store: RawHandle,
        digest: &str,
    ) -> Result<Option<Vec<u8>>, NativeError>;

    /// Opens a read stream over a blob's content.
    ///
    /// The returned handle is retained; the caller releases it.
    fn open_blob_stream(
        &self,
        store: RawHandle,
        digest: &str,
    ) -> Result<Option<RawHandle>, NativeError>;

    /// Reads up to `buf.len()` bytes from a blob stream. `Ok(0)` is end of stream.
    fn read_blob_stream(&self, stream: RawHandle, buf: &mut [u8]) -> Result<usize, NativeError>;

    /// Writes blob content under `digest`.
    fn write_blob(&self, store: RawHandle, digest: &str, content: &[u8])
        -> Result<(), NativeError>;
}
