//! Test fixtures and database helpers.
//!
//! Provides a database opened on a [`MockEngine`], canned documents, and
//! logging setup for tests.

use crate::mock::MockEngine;
use bytes::Bytes;
use indexmap::IndexMap;
use litebridge_core::{encode, BlobRef, BridgeConfig, Database, HostValue, RawHandle};
use std::ops::Deref;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// JSON form of the nested scenario document.
pub const SCENARIO_JSON: &str = r#"{"flat":"flat","empty_obj":{},"nested":{"nested":"nested"},"empty_array":[],"array":["a"]}"#;

/// The nested scenario document, in storage order.
pub fn scenario_value() -> HostValue {
    HostValue::dict([
        ("flat", HostValue::from("flat")),
        ("empty_obj", HostValue::Dict(IndexMap::new())),
        ("nested", HostValue::dict([("nested", "nested")])),
        ("empty_array", HostValue::Array(Vec::new())),
        ("array", HostValue::array(["a"])),
    ])
}

/// The scenario document encoded.
pub fn scenario_bytes() -> Bytes {
    encode(&scenario_value()).expect("scenario encodes")
}

/// A document with one attachment pointing at `blob`.
pub fn blob_document(blob: &BlobRef) -> Bytes {
    encode(&HostValue::dict([
        ("title", HostValue::from("with attachment")),
        ("attachment", HostValue::Blob(blob.clone())),
    ]))
    .expect("blob document encodes")
}

/// Content used by blob tests: long enough to need several chunks.
pub fn sample_blob_content() -> Bytes {
    Bytes::from(
        (0..10_000u32)
            .map(|i| (i % 251) as u8)
            .collect::<Vec<u8>>(),
    )
}

/// A database over a [`MockEngine`], closed on drop.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The engine behind it.
    pub engine: Arc<MockEngine>,
    /// The native handle it was opened with.
    pub raw: RawHandle,
}

impl TestDatabase {
    /// Opens with the default configuration.
    pub fn open() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    /// Opens with `config`.
    pub fn with_config(config: BridgeConfig) -> Self {
        let engine = MockEngine::shared();
        let raw = engine.open_handle();
        let db = Database::open(engine.clone(), "test", config, |_| raw)
            .expect("Failed to open test database");
        Self { db, engine, raw }
    }

    /// Stores `content` in the engine and returns a blob that points at it.
    pub fn stored_blob(&self, content: impl Into<Bytes>, content_type: Option<&str>) -> BlobRef {
        let content = content.into();
        let length = content.len() as u64;
        let digest = self.engine.put_blob(content);
        BlobRef::detached(digest, Some(length), content_type.map(str::to_owned))
    }
}

impl Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs `f` with a fresh test database.
pub fn with_test_db<F, R>(f: F) -> R
where
    F: FnOnce(&TestDatabase) -> R,
{
    let db = TestDatabase::open();
    f(&db)
}

/// Routes `tracing` output to the test harness, filtered by `RUST_LOG`.
///
/// Safe to call from every test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_matches_json() {
        let json: serde_json::Value = serde_json::from_str(SCENARIO_JSON).unwrap();
        assert_eq!(scenario_value().to_json().unwrap(), json);
        assert_eq!(scenario_value().to_string(), SCENARIO_JSON);
    }

    #[test]
    fn test_database_closes_on_drop() {
        let engine = with_test_db(|db| {
            assert_eq!(db.engine.refcount(db.raw), 1);
            Arc::clone(&db.engine)
        });
        assert!(engine.live_handles().is_empty());
    }

    #[test]
    fn stored_blob_is_in_engine() {
        with_test_db(|db| {
            let blob = db.stored_blob(&b"abc"[..], Some("text/plain"));
            assert_eq!(db.engine.blob(blob.digest()).unwrap(), &b"abc"[..]);
            assert_eq!(blob.length(), Some(3));
        });
    }
}
