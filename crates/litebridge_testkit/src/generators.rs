//! Property-based test generators using proptest.
//!
//! Provides strategies for host values that survive an encode/decode cycle
//! unchanged: floats are finite and blobs are left out.

use bytes::Bytes;
use indexmap::IndexMap;
use litebridge_core::HostValue;
use proptest::prelude::*;

/// Strategy for dict keys.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z_][a-z0-9_]{0,11}").expect("Invalid regex")
}

/// Strategy for scalar values.
pub fn scalar_strategy() -> impl Strategy<Value = HostValue> {
    prop_oneof![
        Just(HostValue::None),
        any::<bool>().prop_map(HostValue::Bool),
        any::<i64>().prop_map(HostValue::Int),
        (i64::MAX as u64 + 1..=u64::MAX).prop_map(HostValue::Unsigned),
        prop::num::f64::NORMAL.prop_map(HostValue::Double),
        prop::num::f32::NORMAL.prop_map(HostValue::Float),
        ".{0,24}".prop_map(HostValue::String),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(|b| HostValue::Binary(Bytes::from(b))),
    ]
}

/// Strategy for arbitrary nested values, up to four levels deep.
pub fn host_value_strategy() -> impl Strategy<Value = HostValue> {
    scalar_strategy().prop_recursive(4, 64, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(HostValue::Array),
            prop::collection::vec((key_strategy(), inner), 0..6).prop_map(|entries| {
                HostValue::Dict(entries.into_iter().collect::<IndexMap<_, _>>())
            }),
        ]
    })
}

/// Strategy for top-level documents (always a dict).
pub fn document_strategy() -> impl Strategy<Value = HostValue> {
    prop::collection::vec((key_strategy(), host_value_strategy()), 0..8)
        .prop_map(|entries| HostValue::Dict(entries.into_iter().collect()))
}

/// Strategy for decode depths, including the unbounded one.
pub fn depth_strategy() -> impl Strategy<Value = u32> {
    prop_oneof![0u32..6, Just(litebridge_core::UNBOUNDED_DEPTH)]
}
