//! Change listeners and callback routing.
//!
//! The engine never sees a pointer to a handler. Each listener gets a
//! generation-tagged [`RouteId`] in a [`ListenerRegistry`]; the engine is
//! handed that id and a [`Dispatcher`], and calls back through them. A
//! callback that arrives after its listener was removed finds no route and is
//! dropped.
//!
//! # Usage
//!
//! ```rust,ignore
//! let token = db.add_change_listener(|event| println!("{:?}", event.doc_ids))?;
//! // ...
//! token.remove();
//! ```

use crate::engine::NativeEngine;
use crate::error::{BridgeError, BridgeResult};
use crate::types::{RawHandle, RawToken, RouteId};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// How long [`ListenerRegistry::remove`] waits on a running handler before
/// logging a warning. Two handlers removing each other's routes from
/// different threads never finish waiting.
pub const SLOW_REMOVAL_WARNING: Duration = Duration::from_millis(250);

/// A change notification delivered to listeners.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeEvent {
    /// Ids of the documents that changed.
    pub doc_ids: Vec<String>,
}

impl ChangeEvent {
    /// Creates an event for the given documents.
    pub fn new<I, S>(doc_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            doc_ids: doc_ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// A listener callback.
pub type Handler = Box<dyn FnMut(&ChangeEvent) + Send>;

struct EntryState {
    handler: RefCell<Option<Handler>>,
    removed: Cell<bool>,
}

struct Entry {
    state: ReentrantMutex<EntryState>,
}

struct Slot {
    generation: u32,
    entry: Option<Arc<Entry>>,
}

#[derive(Default)]
struct Slab {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

/// Concurrent routing table from [`RouteId`] to handler.
///
/// - Lookups and removals validate the generation under the table lock.
/// - A handler runs under its entry's reentrant lock, so [`remove`] from
///   another thread waits for an in-flight call while a handler can still
///   remove itself.
/// - Once `remove` returns, no new call for that route starts.
///
/// [`remove`]: ListenerRegistry::remove
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    slab: Arc<RwLock<Slab>>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler and returns its route.
    pub fn insert(&self, handler: Handler) -> RouteId {
        let entry = Arc::new(Entry {
            state: ReentrantMutex::new(EntryState {
                handler: RefCell::new(Some(handler)),
                removed: Cell::new(false),
            }),
        });
        let mut slab = self.slab.write();
        slab.len += 1;
        if let Some(index) = slab.free.pop() {
            let slot = &mut slab.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.entry = Some(entry);
            return RouteId::new(index, slot.generation);
        }
        let index = slab.slots.len() as u32;
        slab.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        RouteId::new(index, 0)
    }

    /// Removes a route. Returns false if it was not present.
    ///
    /// Blocks while another thread is running the route's handler.
    pub fn remove(&self, route: RouteId) -> bool {
        let entry = {
            let mut slab = self.slab.write();
            let Some(slot) = slab.slots.get_mut(route.slot() as usize) else {
                return false;
            };
            if slot.generation != route.generation() {
                return false;
            }
            let Some(entry) = slot.entry.take() else {
                return false;
            };
            slab.free.push(route.slot());
            slab.len -= 1;
            entry
        };

        let state = match entry.state.try_lock_for(SLOW_REMOVAL_WARNING) {
            Some(state) => state,
            None => {
                warn!(
                    %route,
                    waited_ms = SLOW_REMOVAL_WARNING.as_millis() as u64,
                    "listener removal is waiting on a running handler"
                );
                entry.state.lock()
            }
        };
        state.removed.set(true);
        // Inside the handler itself the cell is borrowed; dispatch drops it on return.
        if let Ok(mut handler) = state.handler.try_borrow_mut() {
            handler.take();
        }
        true
    }

    /// Calls the handler for `route`. Returns false for unknown or stale routes.
    pub fn dispatch(&self, route: RouteId, event: &ChangeEvent) -> bool {
        let entry = {
            let slab = self.slab.read();
            match slab.slots.get(route.slot() as usize) {
                Some(slot) if slot.generation == route.generation() => slot.entry.clone(),
                _ => None,
            }
        };
        let Some(entry) = entry else {
            return false;
        };

        let state = entry.state.lock();
        if state.removed.get() {
            return false;
        }
        let Ok(mut handler) = state.handler.try_borrow_mut() else {
            // Reentrant dispatch of the same route from inside its handler.
            return false;
        };
        let called = match handler.as_mut() {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        };
        if state.removed.get() {
            handler.take();
        }
        called
    }

    /// Number of live routes.
    pub fn len(&self) -> usize {
        self.slab.read().len
    }

    /// True if no routes are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A dispatcher for handing to the engine.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            slab: Arc::downgrade(&self.slab),
        }
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("len", &self.len())
            .finish()
    }
}

/// The engine's way back into a [`ListenerRegistry`].
///
/// Holds the registry weakly: callbacks arriving after the owner is gone are
/// dropped.
#[derive(Clone)]
pub struct Dispatcher {
    slab: Weak<RwLock<Slab>>,
}

impl Dispatcher {
    /// Routes `event` to the handler registered under `route`.
    ///
    /// Returns true if a handler ran.
    pub fn dispatch(&self, route: RouteId, event: &ChangeEvent) -> bool {
        let delivered = self
            .slab
            .upgrade()
            .map(|slab| ListenerRegistry { slab }.dispatch(route, event))
            .unwrap_or(false);
        if !delivered {
            trace!(%route, "dropped callback for stale route");
        }
        delivered
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("live", &(self.slab.strong_count() > 0))
            .finish()
    }
}

struct SetInner {
    engine: Arc<dyn NativeEngine>,
    registry: ListenerRegistry,
    tokens: Mutex<HashMap<RouteId, RawToken>>,
}

impl SetInner {
    fn unregister(&self, route: RouteId, raw: RawToken) {
        if let Err(err) = self.engine.remove_listener(raw) {
            warn!(%route, token = %raw, error = %err, "native listener removal failed");
        }
        self.registry.remove(route);
    }
}

/// The outstanding listeners of one resource owner.
pub struct ListenerSet {
    inner: Arc<SetInner>,
}

impl ListenerSet {
    /// Creates an empty set bound to `engine`.
    pub fn new(engine: Arc<dyn NativeEngine>) -> Self {
        Self {
            inner: Arc::new(SetInner {
                engine,
                registry: ListenerRegistry::new(),
                tokens: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Registers `handler` with the engine for changes on `owner`.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Operation` if the engine refuses the listener.
    pub fn subscribe<F>(&self, owner: RawHandle, handler: F) -> BridgeResult<ListenerToken>
    where
        F: FnMut(&ChangeEvent) + Send + 'static,
    {
        let route = self.inner.registry.insert(Box::new(handler));
        let raw = match self
            .inner
            .engine
            .add_listener(owner, route, self.inner.registry.dispatcher())
        {
            Ok(raw) => raw,
            Err(err) => {
                self.inner.registry.remove(route);
                return Err(BridgeError::operation("Couldn't add listener", err));
            }
        };
        self.inner.tokens.lock().insert(route, raw);
        debug!(%route, token = %raw, "listener added");
        Ok(ListenerToken {
            state: Mutex::new(Some((Arc::downgrade(&self.inner), route))),
        })
    }

    /// Number of tokens not yet removed.
    pub fn outstanding(&self) -> usize {
        self.inner.tokens.lock().len()
    }

    /// Removes every outstanding listener. Tokens held elsewhere become no-ops.
    pub fn drain(&self) -> usize {
        let drained: Vec<_> = self.inner.tokens.lock().drain().collect();
        for (route, raw) in &drained {
            self.inner.unregister(*route, *raw);
        }
        if !drained.is_empty() {
            debug!(count = drained.len(), "drained listeners");
        }
        drained.len()
    }

    /// The routing table behind this set.
    pub fn registry(&self) -> &ListenerRegistry {
        &self.inner.registry
    }
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// A registered listener. Removing it (or dropping it) unregisters.
pub struct ListenerToken {
    state: Mutex<Option<(Weak<SetInner>, RouteId)>>,
}

impl ListenerToken {
    /// Unregisters the listener.
    ///
    /// Safe to call any number of times, and after the owner is gone. Native
    /// failures are logged, never returned.
    pub fn remove(&self) {
        let Some((owner, route)) = self.state.lock().take() else {
            return;
        };
        let Some(inner) = owner.upgrade() else {
            trace!(%route, "listener owner already gone");
            return;
        };
        let raw = inner.tokens.lock().remove(&route);
        match raw {
            Some(raw) => {
                inner.unregister(route, raw);
                debug!(%route, token = %raw, "listener removed");
            }
            None => trace!(%route, "listener already drained"),
        }
    }

    /// True until [`remove`](ListenerToken::remove) has run.
    pub fn is_active(&self) -> bool {
        self.state
            .lock()
            .as_ref()
            .is_some_and(|(owner, route)| {
                owner
                    .upgrade()
                    .is_some_and(|inner| inner.tokens.lock().contains_key(route))
            })
    }

    /// The route this token was issued under.
    pub fn route(&self) -> Option<RouteId> {
        self.state.lock().as_ref().map(|(_, route)| *route)
    }
}

impl Drop for ListenerToken {
    fn drop(&mut self) {
        self.remove();
    }
}

impl fmt::Debug for ListenerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerToken")
            .field("route", &self.route())
            .finish()
    }
}
