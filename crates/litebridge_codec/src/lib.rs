//! # litebridge codec
//!
//! The binary value format shared with the native engine.
//!
//! Every value starts with a one-byte tag. Scalars have fixed-size
//! little-endian payloads; strings and binary are length prefixed; arrays
//! and dicts carry an element count and a body length so that readers can
//! skip them without descending.
//!
//! This crate provides:
//! - [`Tag`], the closed set of value kinds
//! - [`ValueView`], [`ArrayView`] and [`DictView`]: zero-copy, bounds-checked
//!   views into a borrowed buffer
//! - [`validate`] and [`parse`] for untrusted input
//! - [`Encoder`], a streaming writer
//!
//! ## Usage
//!
//! ```
//! use litebridge_codec::{parse, Encoder, Tag, Trust};
//!
//! let mut enc = Encoder::new();
//! enc.begin_array().unwrap();
//! enc.write_string("a").unwrap();
//! enc.write_float(1.5).unwrap();
//! enc.end_array().unwrap();
//! let bytes = enc.finish().unwrap();
//!
//! let root = parse(&bytes, Trust::Untrusted).unwrap();
//! let tags: Vec<Tag> = root
//!     .as_array()
//!     .unwrap()
//!     .iter()
//!     .map(|v| v.unwrap().tag())
//!     .collect();
//! assert_eq!(tags, vec![Tag::String, Tag::Float]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod encoder;
mod error;
mod tag;
mod view;

pub use encoder::Encoder;
pub use error::{CodecError, CodecResult};
pub use tag::Tag;
pub use view::{
    parse, validate, ArrayIter, ArrayView, DictIter, DictView, Trust, ValueView, MAX_NESTING,
};
