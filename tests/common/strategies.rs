use conductor_core::{Payload, Priority};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for generating request priorities
pub fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::High),
        Just(Priority::Chained),
        Just(Priority::Normal),
    ]
}

/// Strategy for generating pipeline names
pub fn pipeline_name_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,8}(\\.[a-z]{1,8})?"
}

/// Strategy for generating a sequence of priorities to enqueue
pub fn priority_sequence_strategy() -> impl Strategy<Value = Vec<Priority>> {
    prop::collection::vec(priority_strategy(), 0..40)
}

/// Strategy for plain payload leaves
fn leaf_strategy() -> impl Strategy<Value = Payload> {
    prop_oneof![
        Just(Payload::Null),
        any::<bool>().prop_map(Payload::Bool),
        (-1000i64..1000).prop_map(Payload::from),
        "[a-z]{0,6}".prop_map(Payload::String),
        Just(Payload::callback(|_| Ok(serde_json::Value::Null))),
    ]
}

/// Strategy for nested payload graphs with callbacks sprinkled through them
pub fn payload_strategy() -> impl Strategy<Value = Payload> {
    leaf_strategy().prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..5).prop_map(Payload::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..5)
                .prop_map(|entries: BTreeMap<String, Payload>| Payload::Object(entries)),
        ]
    })
}

/// Count callbacks reachable in a payload graph
pub fn count_callbacks(payload: &Payload) -> usize {
    match payload {
        Payload::Callback(_) => 1,
        Payload::Array(items) => items.iter().map(count_callbacks).sum(),
        Payload::Object(entries) => entries.values().map(count_callbacks).sum(),
        _ => 0,
    }
}
