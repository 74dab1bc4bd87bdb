//! Owned references to refcounted native resources.

use crate::engine::NativeEngine;
use crate::error::{BridgeError, BridgeResult, NativeError};
use crate::types::RawHandle;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// One reference to a native resource.
///
/// Holds at most one live pointer. [`release`](NativeHandle::release)
/// decrements the external refcount exactly once; dropping the handle
/// releases it if that has not happened yet.
pub struct NativeHandle {
    engine: Arc<dyn NativeEngine>,
    raw: Mutex<Option<RawHandle>>,
}

impl NativeHandle {
    /// Runs a native open/get/new call and wraps its result.
    ///
    /// `call` receives an error slot to fill on failure. A null result becomes
    /// [`BridgeError::Open`] whose message reads `"<failure_message>: <native message>"`.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Open` if `call` returns the null handle.
    pub fn open<F>(
        engine: Arc<dyn NativeEngine>,
        failure_message: impl Into<String>,
        call: F,
    ) -> BridgeResult<Self>
    where
        F: FnOnce(&mut NativeError) -> RawHandle,
    {
        let mut error = NativeError::default();
        let raw = call(&mut error);
        if raw.is_null() {
            let context = failure_message.into();
            debug!(%context, code = error.code, domain = %error.domain, "native open failed");
            return Err(BridgeError::open(context, error));
        }
        debug!(handle = %raw, "opened native handle");
        Ok(Self::adopt(engine, raw))
    }

    /// Wraps a handle the caller already holds a reference to.
    pub fn adopt(engine: Arc<dyn NativeEngine>, raw: RawHandle) -> Self {
        Self {
            engine,
            raw: Mutex::new((!raw.is_null()).then_some(raw)),
        }
    }

    /// Takes an additional reference, returned as an independent handle.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterRelease` if this handle was already released.
    pub fn retain(&self) -> BridgeResult<Self> {
        let raw = self.raw()?;
        self.engine.retain(raw);
        trace!(handle = %raw, "retained native handle");
        Ok(Self::adopt(Arc::clone(&self.engine), raw))
    }

    /// The live pointer.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterRelease` after [`release`](NativeHandle::release).
    pub fn raw(&self) -> BridgeResult<RawHandle> {
        (*self.raw.lock()).ok_or(BridgeError::use_after_release("native handle"))
    }

    /// True once released.
    pub fn is_released(&self) -> bool {
        self.raw.lock().is_none()
    }

    /// The engine this handle belongs to.
    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    /// Drops this reference. Later calls do nothing.
    pub fn release(&self) {
        let taken = self.raw.lock().take();
        if let Some(raw) = taken {
            self.engine.release(raw);
            trace!(handle = %raw, "released native handle");
        }
    }
}

impl Drop for NativeHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandle")
            .field("raw", &*self.raw.lock())
            .finish()
    }
}
