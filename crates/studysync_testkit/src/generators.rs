//! Property-based test generators using proptest.

use crate::fixtures::base_time;
use chrono::Duration;
use proptest::prelude::*;
use studysync_protocol::Event;

/// Strategy for valid study names.
pub fn study_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9]{0,10}(-[a-z0-9]{1,8}){0,2}").expect("Invalid regex")
}

/// Strategy for events drawn from a small id space, so batches overlap.
pub fn event_strategy(id_space: u64) -> impl Strategy<Value = Event> {
    (0..id_space, 0u64..4, 0i64..10_000, "[a-z_]{1,12}").prop_map(|(id, user, minutes, kind)| {
        Event::new(
            format!("evt-{id}"),
            format!("user-{user}"),
            kind,
            base_time() + Duration::minutes(minutes),
        )
    })
}

/// Strategy for batches of possibly overlapping events.
pub fn event_batches_strategy(
    id_space: u64,
    max_batches: usize,
    max_batch_len: usize,
) -> impl Strategy<Value = Vec<Vec<Event>>> {
    prop::collection::vec(
        prop::collection::vec(event_strategy(id_space), 0..=max_batch_len),
        1..=max_batches,
    )
}
