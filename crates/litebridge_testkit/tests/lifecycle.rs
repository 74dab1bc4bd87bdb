//! Handle, listener and blob lifecycles against the mock engine.

use litebridge_core::{
    BlobRef, BridgeConfig, BridgeError, CancelToken, ChangeEvent, Database, Dispatcher,
    ErrorDomain, HostValue, ListenerToken, LoadOptions, NativeEngine, NativeError, NativeHandle,
    RawHandle, RawToken, RouteId,
};
use litebridge_testkit::prelude::*;
use parking_lot::Mutex;
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn counter() -> (Arc<AtomicUsize>, impl FnMut(&ChangeEvent) + Send + 'static) {
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&hits);
    (hits, move |_: &ChangeEvent| {
        seen.fetch_add(1, Ordering::SeqCst);
    })
}

fn event() -> ChangeEvent {
    ChangeEvent::new(["doc-1", "doc-2"])
}

/// A [`MockEngine`] whose first `add_listener` stops at two barriers:
/// `entered` once the call is in flight, `proceed` before it registers.
struct GatedEngine {
    inner: Arc<MockEngine>,
    gated: AtomicBool,
    entered: Barrier,
    proceed: Barrier,
}

impl GatedEngine {
    fn new(inner: Arc<MockEngine>) -> Self {
        Self {
            inner,
            gated: AtomicBool::new(true),
            entered: Barrier::new(2),
            proceed: Barrier::new(2),
        }
    }
}

impl NativeEngine for GatedEngine {
    fn retain(&self, handle: RawHandle) {
        self.inner.retain(handle);
    }

    fn release(&self, handle: RawHandle) {
        self.inner.release(handle);
    }

    fn add_listener(
        &self,
        owner: RawHandle,
        route: RouteId,
        dispatcher: Dispatcher,
    ) -> Result<RawToken, NativeError> {
        if self.gated.swap(false, Ordering::SeqCst) {
            self.entered.wait();
            self.proceed.wait();
        }
        self.inner.add_listener(owner, route, dispatcher)
    }

    fn remove_listener(&self, token: RawToken) -> Result<(), NativeError> {
        self.inner.remove_listener(token)
    }

    fn load_blob_content(
        &self,
        store: RawHandle,
        digest: &str,
    ) -> Result<Option<Vec<u8>>, NativeError> {
        self.inner.load_blob_content(store, digest)
    }

    fn open_blob_stream(
        &self,
        store: RawHandle,
        digest: &str,
    ) -> Result<Option<RawHandle>, NativeError> {
        self.inner.open_blob_stream(store, digest)
    }

    fn read_blob_stream(&self, stream: RawHandle, buf: &mut [u8]) -> Result<usize, NativeError> {
        self.inner.read_blob_stream(stream, buf)
    }

    fn write_blob(&self, store: RawHandle, digest: &str, content: &[u8]) -> Result<(), NativeError> {
        self.inner.write_blob(store, digest, content)
    }
}

// ---- handles ----

#[test]
fn handle_release_twice_decrements_once() {
    let engine = MockEngine::shared();
    let raw = engine.open_handle();
    let handle = NativeHandle::adopt(engine.clone(), raw);

    handle.release();
    handle.release();
    assert_eq!(engine.refcount(raw), 0);
    assert_eq!(engine.over_released(), 0);
    assert!(matches!(
        handle.raw(),
        Err(BridgeError::UseAfterRelease { .. })
    ));

    drop(handle);
    assert_eq!(engine.over_released(), 0);
}

#[test]
fn retained_handles_release_independently() {
    let engine = MockEngine::shared();
    let raw = engine.open_handle();
    let first = NativeHandle::adopt(engine.clone(), raw);
    let second = first.retain().unwrap();
    assert_eq!(engine.refcount(raw), 2);

    drop(first);
    assert_eq!(engine.refcount(raw), 1);
    assert_eq!(second.raw().unwrap(), raw);
    drop(second);
    assert_eq!(engine.refcount(raw), 0);
    assert_eq!(engine.over_released(), 0);
}

#[test]
fn concurrent_release_decrements_once() {
    let engine = MockEngine::shared();
    let raw = engine.open_handle();
    let handle = Arc::new(NativeHandle::adopt(engine.clone(), raw));
    let start = Arc::new(Barrier::new(8));

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let handle = Arc::clone(&handle);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                handle.release();
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    assert!(handle.is_released());
    assert_eq!(engine.refcount(raw), 0);
    assert_eq!(engine.over_released(), 0);
}

// ---- listeners ----

#[test]
fn token_remove_twice_shrinks_set_by_one() {
    let db = TestDatabase::open();
    let (_, a) = counter();
    let (_, b) = counter();
    let first = db.add_change_listener(a).unwrap();
    let _second = db.add_change_listener(b).unwrap();
    assert_eq!(db.listener_count(), 2);

    first.remove();
    first.remove();
    assert_eq!(db.listener_count(), 1);
    assert_eq!(db.engine.removed_tokens().len(), 1);
    assert!(!first.is_active());
}

#[test]
fn callbacks_route_to_their_own_handler() {
    let db = TestDatabase::open();
    let (hits_a, a) = counter();
    let (hits_b, b) = counter();
    let _ta = db.add_change_listener(a).unwrap();
    let tb = db.add_change_listener(b).unwrap();

    assert_eq!(db.engine.fire_all(&event()), 2);
    tb.remove();
    assert_eq!(db.engine.fire_all(&event()), 1);
    assert_eq!(hits_a.load(Ordering::SeqCst), 2);
    assert_eq!(hits_b.load(Ordering::SeqCst), 1);
}

#[test]
fn handler_receives_the_event() {
    let db = TestDatabase::open();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _token = db
        .add_change_listener(move |event: &ChangeEvent| {
            sink.lock().extend(event.doc_ids.iter().cloned());
        })
        .unwrap();
    db.engine.fire_all(&event());
    assert_eq!(*seen.lock(), vec!["doc-1".to_owned(), "doc-2".to_owned()]);
}

#[test]
fn late_callbacks_after_removal_are_dropped() {
    let db = TestDatabase::open();
    let (hits, handler) = counter();
    let token = db.add_change_listener(handler).unwrap();
    let raw = db.engine.active_tokens()[0];

    token.remove();
    assert!(!db.engine.fire(raw, &event()));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn reused_route_slots_do_not_receive_stale_callbacks() {
    let db = TestDatabase::open();
    let (old_hits, old) = counter();
    let token = db.add_change_listener(old).unwrap();
    let old_raw = db.engine.active_tokens()[0];
    let old_route = token.route().unwrap();
    token.remove();

    let (new_hits, new) = counter();
    let replacement = db.add_change_listener(new).unwrap();
    let new_route = replacement.route().unwrap();
    assert_eq!(new_route.slot(), old_route.slot());
    assert_ne!(new_route.generation(), old_route.generation());

    assert!(!db.engine.fire(old_raw, &event()));
    assert_eq!(db.engine.fire_all(&event()), 1);
    assert_eq!(old_hits.load(Ordering::SeqCst), 0);
    assert_eq!(new_hits.load(Ordering::SeqCst), 1);
}

#[test]
fn handler_can_remove_itself() {
    let db = TestDatabase::open();
    let slot: Arc<Mutex<Option<ListenerToken>>> = Arc::new(Mutex::new(None));
    let hits = Arc::new(AtomicUsize::new(0));

    let own = Arc::clone(&slot);
    let seen = Arc::clone(&hits);
    let token = db
        .add_change_listener(move |_: &ChangeEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
            let token = own.lock().take();
            if let Some(token) = token {
                token.remove();
            }
        })
        .unwrap();
    let raw = db.engine.active_tokens()[0];
    *slot.lock() = Some(token);

    assert!(db.engine.fire(raw, &event()));
    assert!(!db.engine.fire(raw, &event()));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(db.listener_count(), 0);
    assert_eq!(db.engine.active_listeners(), 0);
}

#[test]
fn no_callback_runs_after_remove_returns() {
    let db = TestDatabase::open();
    let (hits, handler) = counter();
    let token = db.add_change_listener(handler).unwrap();
    let raw = db.engine.active_tokens()[0];
    let stop = Arc::new(AtomicBool::new(false));

    let firers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&db.engine);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let event = event();
                while !stop.load(Ordering::SeqCst) {
                    engine.fire(raw, &event);
                }
            })
        })
        .collect();

    while hits.load(Ordering::SeqCst) < 100 {
        thread::yield_now();
    }
    token.remove();
    let after_remove = hits.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(hits.load(Ordering::SeqCst), after_remove);

    stop.store(true, Ordering::SeqCst);
    for firer in firers {
        firer.join().unwrap();
    }
}

#[test]
fn concurrent_subscribe_dispatch_and_remove() {
    let db = Arc::new(TestDatabase::open());
    let threads: Vec<_> = (0..8)
        .map(|_| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for _ in 0..50 {
                    let (hits, handler) = counter();
                    let token = db.add_change_listener(handler).unwrap();
                    db.engine.fire_all(&event());
                    token.remove();
                    let settled = hits.load(Ordering::SeqCst);
                    db.engine.fire_all(&event());
                    assert_eq!(hits.load(Ordering::SeqCst), settled);
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(db.listener_count(), 0);
    assert_eq!(db.engine.active_listeners(), 0);
}

#[test]
fn add_listener_failure_is_reported() {
    let db = TestDatabase::open();
    db.engine
        .fail_next_add_listener(NativeError::new(ErrorDomain::Engine, 9, "busy"));
    let (_, handler) = counter();
    let err = db.add_change_listener(handler).unwrap_err();
    assert_eq!(err.to_string(), "Couldn't add listener: busy");
    assert_eq!(db.listener_count(), 0);
}

// ---- database close ----

#[test]
fn close_removes_listeners_before_releasing_handle() {
    let db = TestDatabase::open();
    let tokens: Vec<_> = (0..3)
        .map(|_| db.add_change_listener(counter().1).unwrap())
        .collect();
    assert_eq!(db.engine.active_listeners(), 3);

    db.close();
    assert_eq!(db.engine.active_listeners(), 0);
    assert_eq!(db.engine.removals_after_release(), 0);
    assert_eq!(db.engine.refcount(db.raw), 0);

    // Tokens outliving the close are no-ops.
    for token in &tokens {
        assert!(!token.is_active());
        token.remove();
    }
    drop(tokens);
    assert_eq!(db.engine.removed_tokens().len(), 3);
    assert_eq!(db.engine.over_released(), 0);
}

#[test]
fn close_waits_for_in_flight_subscription() {
    let mock = MockEngine::shared();
    let raw = mock.open_handle();
    let gated = Arc::new(GatedEngine::new(Arc::clone(&mock)));
    let db = Arc::new(
        Database::open(gated.clone(), "gated", BridgeConfig::default(), |_| raw).unwrap(),
    );

    let (hits, handler) = counter();
    let subscriber = {
        let db = Arc::clone(&db);
        thread::spawn(move || db.add_change_listener(handler))
    };
    gated.entered.wait();

    let closer = {
        let db = Arc::clone(&db);
        thread::spawn(move || db.close())
    };
    thread::sleep(Duration::from_millis(20));
    // Close cannot release the handle while the registration is in flight.
    assert_eq!(mock.refcount(raw), 1);
    gated.proceed.wait();

    let token = subscriber.join().unwrap().unwrap();
    closer.join().unwrap();

    assert!(db.is_closed());
    assert_eq!(db.listener_count(), 0);
    assert_eq!(mock.active_listeners(), 0);
    assert_eq!(mock.removals_after_release(), 0);
    assert_eq!(mock.refcount(raw), 0);
    assert_eq!(mock.fire_all(&event()), 0);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(!token.is_active());
    assert!(matches!(
        db.add_change_listener(counter().1),
        Err(BridgeError::UseAfterRelease { .. })
    ));
}

#[test]
fn concurrent_close_releases_once() {
    let db = Arc::new(TestDatabase::open());
    let tokens: Vec<_> = (0..4)
        .map(|_| db.add_change_listener(counter().1).unwrap())
        .collect();
    let start = Arc::new(Barrier::new(8));

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let db = Arc::clone(&db);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                db.close();
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert!(db.is_closed());
    assert_eq!(db.engine.refcount(db.raw), 0);
    assert_eq!(db.engine.over_released(), 0);
    assert_eq!(db.engine.removed_tokens().len(), 4);
    assert_eq!(db.engine.removals_after_release(), 0);
    drop(tokens);
    assert_eq!(db.engine.removed_tokens().len(), 4);
}

#[test]
fn closed_database_refuses_work() {
    let db = TestDatabase::open();
    db.close();
    db.close();
    assert!(db.is_closed());
    assert!(matches!(
        db.add_change_listener(counter().1),
        Err(BridgeError::UseAfterRelease { .. })
    ));
    assert_eq!(db.engine.over_released(), 0);
}

// ---- blobs ----

#[test]
fn deferred_blob_loads_through_store() {
    let db = TestDatabase::with_config(BridgeConfig::new().blob_load_timeout(None));
    let content = sample_blob_content();
    let blob = db.stored_blob(content.clone(), Some("application/octet-stream"));
    let buffer = db.document_buffer(blob_document(&blob)).unwrap();

    let props = db.properties(&buffer, 1, false).unwrap();
    let decoded = props.get("attachment").unwrap().unwrap().as_blob().unwrap();
    assert!(!decoded.is_cached());
    assert_eq!(decoded.length(), Some(content.len() as u64));
    assert_eq!(decoded.content_type(), Some("application/octet-stream"));

    assert_eq!(decoded.data().unwrap(), Some(content));
    let calls = db.engine.calls();
    assert_eq!(calls.loads, 1);
    assert_eq!(calls.stream_opens, 0);
}

#[test]
fn bounded_blob_loads_stream_in_chunks() {
    let config = BridgeConfig::new()
        .blob_chunk_size(1024)
        .blob_load_timeout(Some(Duration::from_secs(30)));
    let db = TestDatabase::with_config(config);
    let content = sample_blob_content();
    let blob = db.stored_blob(content.clone(), None);
    let buffer = db.document_buffer(blob_document(&blob)).unwrap();
    let props = db.properties(&buffer, 2, false).unwrap();
    let decoded = props.get("attachment").unwrap().unwrap().as_blob().unwrap();

    assert_eq!(decoded.data().unwrap(), Some(content.clone()));
    let calls = db.engine.calls();
    assert_eq!(calls.loads, 0);
    assert_eq!(calls.stream_opens, 1);
    // nine full chunks, one partial, one end-of-stream read
    assert_eq!(calls.reads, content.len() / 1024 + 2);
    assert_eq!(db.engine.open_streams(), 0);
    assert_eq!(db.engine.live_handles(), vec![db.raw]);
}

#[test]
fn zero_chunk_size_streams_whole_blob() {
    let config = BridgeConfig {
        blob_chunk_size: 0,
        ..BridgeConfig::default()
    };
    let db = TestDatabase::with_config(config);
    let blob = db.stored_blob(&b"hello world"[..], None);
    let buffer = db.document_buffer(blob_document(&blob)).unwrap();
    let props = db.properties(&buffer, 1, false).unwrap();
    let decoded = props.get("attachment").unwrap().unwrap().as_blob().unwrap();

    assert_eq!(
        decoded.data().unwrap().map(|content| content.to_vec()),
        Some(b"hello world".to_vec())
    );
    let calls = db.engine.calls();
    assert_eq!(calls.stream_opens, 1);
    // one byte per read, then end of stream
    assert_eq!(calls.reads, 12);
    assert_eq!(db.engine.open_streams(), 0);
}

#[test]
fn oversized_stream_read_is_an_error() {
    let db = TestDatabase::with_config(BridgeConfig::new().blob_chunk_size(1024));
    let content = sample_blob_content();
    let blob = db.stored_blob(content.clone(), None);
    let buffer = db.document_buffer(blob_document(&blob)).unwrap();
    let props = db.properties(&buffer, 1, false).unwrap();
    let decoded = props.get("attachment").unwrap().unwrap().as_blob().unwrap();

    db.engine.overreport_next_read(1);
    let err = decoded.data().unwrap_err();
    assert!(matches!(err, BridgeError::Operation { .. }));
    assert!(err.to_string().starts_with("Couldn't read blob"), "{err}");
    assert_eq!(db.engine.open_streams(), 0);

    assert_eq!(decoded.data().unwrap(), Some(content));
}

#[test]
fn blob_loads_honor_cancellation_and_timeout() {
    let db = TestDatabase::with_config(BridgeConfig::new().blob_chunk_size(512));
    let blob = db.stored_blob(sample_blob_content(), None);
    let buffer = db.document_buffer(blob_document(&blob)).unwrap();
    let props = db.properties(&buffer, 1, false).unwrap();
    let decoded = props.get("attachment").unwrap().unwrap().as_blob().unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    assert!(matches!(
        decoded.load(&LoadOptions::new().cancel(cancel)),
        Err(BridgeError::Cancelled)
    ));

    db.engine.set_read_delay(Some(Duration::from_millis(5)));
    let err = decoded
        .load(&LoadOptions::new().timeout(Duration::from_millis(20)))
        .unwrap_err();
    assert!(matches!(err, BridgeError::TimedOut));
    // The abandoned stream was released.
    assert_eq!(db.engine.open_streams(), 0);
    assert_eq!(db.engine.live_handles(), vec![db.raw]);
}

#[test]
fn blob_reader_releases_stream_at_end_and_on_drop() {
    let db = TestDatabase::with_config(BridgeConfig::new().blob_chunk_size(100));
    let content = sample_blob_content();
    let blob = db.stored_blob(content.clone(), None);
    let buffer = db.document_buffer(blob_document(&blob)).unwrap();
    let props = db.properties(&buffer, 1, false).unwrap();
    let decoded = props.get("attachment").unwrap().unwrap().as_blob().unwrap();

    let mut reader = decoded.open_reader().unwrap().unwrap();
    let mut buf = vec![0u8; 4096];
    let n = reader.read(&mut buf).unwrap();
    assert_eq!(n, 100);
    assert_eq!(&buf[..n], &content[..100]);
    assert_eq!(db.engine.open_streams(), 1);

    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).unwrap();
    assert_eq!(rest.len(), content.len() - 100);
    assert_eq!(db.engine.open_streams(), 0);
    assert_eq!(reader.read(&mut buf).unwrap(), 0);

    let early = decoded.open_reader().unwrap().unwrap();
    assert_eq!(db.engine.open_streams(), 1);
    drop(early);
    assert_eq!(db.engine.open_streams(), 0);
    assert_eq!(db.engine.over_released(), 0);
}

#[test]
fn blob_read_failure_carries_context() {
    let db = TestDatabase::open();
    let blob = db.stored_blob(sample_blob_content(), None);
    let buffer = db.document_buffer(blob_document(&blob)).unwrap();
    let props = db.properties(&buffer, 1, false).unwrap();
    let decoded = props.get("attachment").unwrap().unwrap().as_blob().unwrap();

    db.engine
        .fail_next_read(NativeError::new(ErrorDomain::Posix, 5, "I/O error"));
    let err = decoded.data().unwrap_err();
    assert_eq!(err.to_string(), "Couldn't read blob: I/O error");
    assert_eq!(db.engine.open_streams(), 0);
}

#[test]
fn missing_blob_content_is_absent() {
    let db = TestDatabase::open();
    let blob = BlobRef::detached("sha256-missing", Some(4), None);
    let buffer = db.document_buffer(blob_document(&blob)).unwrap();
    let props = db.properties(&buffer, 1, false).unwrap();
    let decoded = props.get("attachment").unwrap().unwrap().as_blob().unwrap();
    assert_eq!(decoded.data().unwrap(), None);
    assert!(decoded.open_reader().unwrap().is_none());
}

#[test]
fn blobs_fail_after_database_closes() {
    let db = TestDatabase::open();
    let blob = db.stored_blob(&b"abc"[..], None);
    let buffer = db.document_buffer(blob_document(&blob)).unwrap();
    let props = db.properties(&buffer, 1, false).unwrap();

    db.close();
    let decoded = props.get("attachment").unwrap().unwrap().as_blob().unwrap();
    assert!(matches!(
        decoded.data(),
        Err(BridgeError::UseAfterRelease { .. })
    ));
}

#[test]
fn new_blobs_install_into_the_store() {
    let db = TestDatabase::open();
    let content = sample_blob_content();
    let blob = BlobRef::from_data(content.clone(), Some("image/png".into()));
    db.save_blob(&blob).unwrap();
    assert_eq!(db.engine.blob(blob.digest()), Some(content.clone()));

    // Round trip through a document: only the marker is stored.
    let buffer = db
        .document_buffer(litebridge_core::encode(&HostValue::Blob(blob.clone())).unwrap())
        .unwrap();
    let decoded = db.properties(&buffer, 0, false).unwrap();
    assert_eq!(decoded.as_blob().unwrap().data().unwrap(), Some(content));

    let detached = BlobRef::detached("sha256-nothing", None, None);
    assert!(matches!(
        db.save_blob(&detached),
        Err(BridgeError::NotFound { .. })
    ));

    db.engine
        .fail_next_write(NativeError::new(ErrorDomain::Sqlite, 13, "database or disk is full"));
    let err = db.save_blob(&BlobRef::from_data(&b"x"[..], None)).unwrap_err();
    assert_eq!(err.to_string(), "Couldn't save blob: database or disk is full");
}
