//! Proptest strategies shared by property tests

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use courier_core::cache::StoreError;
use courier_core::status::TaskStatus;
use courier_core::Priority;
use proptest::prelude::*;

pub fn any_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(TaskStatus::ALL.to_vec())
}

/// Statuses that go through the pending buffer
pub fn buffered_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(vec![TaskStatus::Queued, TaskStatus::Pending])
}

pub fn any_priority() -> impl Strategy<Value = Priority> {
    prop::sample::select(vec![
        Priority::Background,
        Priority::Normal,
        Priority::Interactive,
    ])
}

/// Timestamps within a ten minute window, with frequent collisions
pub fn timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..600).prop_map(|offset| {
        let epoch = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        epoch + ChronoDuration::seconds(offset)
    })
}

/// Out-of-order buffered updates for a single task
pub fn buffered_updates() -> impl Strategy<Value = Vec<(TaskStatus, DateTime<Utc>)>> {
    prop::collection::vec((buffered_status(), timestamp()), 1..20)
}

/// Store errors across all three failure classes
pub fn store_error() -> impl Strategy<Value = StoreError> {
    prop_oneof![
        Just(StoreError::QuotaExceeded("quota".to_string())),
        Just(StoreError::Connection("reset".to_string())),
        Just(StoreError::timeout("set", 500)),
        Just(StoreError::InvalidRequest("bad key".to_string())),
        Just(StoreError::Backend("WRONGTYPE".to_string())),
    ]
}

/// One call outcome for the primary provider: `None` succeeds
pub fn call_outcomes() -> impl Strategy<Value = Vec<Option<StoreError>>> {
    prop::collection::vec(prop::option::weighted(0.7, store_error()), 1..30)
}

/// Key segments as they arrive from callers (ids, phone numbers, message ids)
pub fn key_segment() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_.+-]{1,40}"
}
