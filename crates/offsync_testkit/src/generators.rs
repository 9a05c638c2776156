//! Property-based test generators using proptest.
//!
//! Provides strategies for local write sequences and for remote failures
//! that cost a mutation an attempt.

use offsync_protocol::{MutationOperation, RemoteError};
use proptest::prelude::*;
use std::time::Duration;

/// Strategy for generating mutation operations.
pub fn operation_strategy() -> impl Strategy<Value = MutationOperation> {
    prop_oneof![
        Just(MutationOperation::Create),
        Just(MutationOperation::Update),
        Just(MutationOperation::Delete),
    ]
}

/// Strategy for a sequence of local writes over a small pool of entities.
///
/// Yields `(slot, operation)` pairs where `slot < pool` so the same entity
/// is hit repeatedly.
pub fn write_sequence_strategy(
    pool: usize,
    max_len: usize,
) -> impl Strategy<Value = Vec<(usize, MutationOperation)>> {
    prop::collection::vec((0..pool, operation_strategy()), 0..max_len)
}

/// Strategy for generating remote failures that cost a mutation an attempt.
pub fn attempt_error_strategy() -> impl Strategy<Value = RemoteError> {
    prop_oneof![
        Just(RemoteError::Network("connection reset".into())),
        Just(RemoteError::timeout(Duration::from_secs(30))),
        (500u16..600).prop_map(|status| RemoteError::Server {
            status,
            message: "unavailable".into(),
        }),
        (400u16..404).prop_map(|status| RemoteError::Validation {
            status,
            message: "invalid".into(),
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn attempt_errors_count(err in attempt_error_strategy()) {
            prop_assert!(err.counts_against_attempts());
            prop_assert!(!err.is_rate_limited());
        }

        #[test]
        fn write_slots_in_range(writes in write_sequence_strategy(3, 20)) {
            prop_assert!(writes.iter().all(|(slot, _)| *slot < 3));
        }
    }
}
