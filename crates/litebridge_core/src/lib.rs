//! # litebridge core
//!
//! The host side of a binding to a native document engine.
//!
//! This crate provides:
//! - [`Decoder`] turning encoded buffers into [`HostValue`]s, with a depth
//!   budget controlling how much is decoded up front
//! - [`LazyArray`] and [`LazyDict`], decoded on first access
//! - [`BlobRef`] and [`BlobStore`] for content referenced by digest
//! - [`encode`], the reverse path
//! - [`NativeHandle`] for refcounted native resources
//! - [`ListenerSet`] and [`ListenerToken`] for change callbacks
//! - [`Database`], which ties a handle, its listeners and its blobs together
//!
//! Everything the native side does goes through the [`NativeEngine`] trait.
//!
//! ## Usage
//!
//! ```
//! use litebridge_codec::Trust;
//! use litebridge_core::{decode, encode, HostValue, ValueBuffer};
//!
//! let value = HostValue::dict([("answer", 42i64)]);
//! let buffer = ValueBuffer::parse(encode(&value).unwrap(), Trust::Untrusted).unwrap();
//!
//! let lazy = decode(&buffer, 0, false).unwrap();
//! assert!(lazy.is_unresolved());
//! assert_eq!(lazy.get("answer").unwrap(), Some(&HostValue::Int(42)));
//! assert_eq!(lazy, value);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod blob;
mod buffer;
mod config;
mod database;
mod decoder;
mod encoder;
mod engine;
mod error;
mod handle;
mod json;
mod lazy;
pub mod listener;
mod types;
mod value;

pub use blob::{content_digest, is_blob, BlobReader, BlobRef, BlobStore, CancelToken, LoadOptions};
pub use buffer::ValueBuffer;
pub use config::BridgeConfig;
pub use database::{Database, OPEN_FAILED};
pub use decoder::{decode, Decoder, UNBOUNDED_DEPTH};
pub use encoder::{encode, write_value};
pub use engine::NativeEngine;
pub use error::{BridgeError, BridgeResult, ErrorDomain, NativeError};
pub use handle::NativeHandle;
pub use lazy::{LazyArray, LazyDict};
pub use listener::{
    ChangeEvent, Dispatcher, Handler, ListenerRegistry, ListenerSet, ListenerToken,
    SLOW_REMOVAL_WARNING,
};
pub use types::{RawHandle, RawToken, RouteId};
pub use value::HostValue;
