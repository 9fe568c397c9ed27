//! Multi-instance coordination over one shared store

mod common;

use common::*;
use courier_core::cache::{MemoryKvStore, StoreBackend, TieredCache};
use courier_core::coordination::{EventOutcome, HeartbeatOutcome, InboundEvent};
use courier_core::keys;
use futures::future::join_all;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Delivery {
    id: String,
}

impl InboundEvent for Delivery {
    fn message_id(&self) -> &str {
        &self.id
    }
}

#[tokio::test]
async fn concurrent_lock_attempts_have_one_winner() {
    let fixture = CacheFixtureBuilder::new().build();
    let instances: Vec<_> = (0..8)
        .map(|i| coordinator(&format!("instance-{i}"), &fixture.cache))
        .collect();

    let results = join_all(
        instances
            .iter()
            .map(|c| c.acquire_lock("nightly-report", Duration::from_secs(30))),
    )
    .await;

    assert_eq!(results.iter().filter(|won| **won).count(), 1);
}

#[tokio::test]
async fn only_the_owner_releases_a_lock() {
    let fixture = CacheFixtureBuilder::new().build();
    let a = coordinator("a", &fixture.cache);
    let b = coordinator("b", &fixture.cache);

    assert!(a.acquire_task_lock("task-7").await);
    assert!(!b.acquire_task_lock("task-7").await);
    assert!(!b.release_task_lock("task-7").await);
    assert!(!b.acquire_task_lock("task-7").await);

    assert!(a.release_task_lock("task-7").await);
    assert!(b.acquire_task_lock("task-7").await);
}

#[tokio::test]
async fn lock_acquisition_fails_closed_on_store_outage() {
    let fixture = CacheFixtureBuilder::new().build();
    let a = coordinator("a", &fixture.cache);
    fixture.primary.fail_with(quota_error());

    assert!(!a.acquire_lock("job", Duration::from_secs(30)).await);
}

#[tokio::test]
async fn task_and_generic_scopes_are_independent() {
    let fixture = CacheFixtureBuilder::new().build();
    let a = coordinator("a", &fixture.cache);
    let b = coordinator("b", &fixture.cache);

    assert!(a.acquire_task_lock("42").await);
    assert!(b.acquire_lock("42", Duration::from_secs(30)).await);
    assert!(a.acquire_scoped_lock("export", "42", Duration::from_secs(30)).await);
}

#[tokio::test]
async fn exactly_one_leader_and_succession_on_stop() {
    let fixture = CacheFixtureBuilder::new().build();
    let instances: Vec<_> = ["alpha", "bravo", "charlie"]
        .iter()
        .map(|id| coordinator(id, &fixture.cache))
        .collect();
    for instance in &instances {
        instance.start().await.unwrap();
    }

    assert_eq!(instances[0].get_instance_count().await.unwrap(), 3);
    let mut leaders = Vec::new();
    for instance in &instances {
        if instance.is_leader().await {
            leaders.push(instance.instance_id().to_string());
        }
    }
    assert_eq!(leaders.len(), 1);

    let leader = instances
        .iter()
        .find(|c| c.instance_id() == leaders[0])
        .unwrap();
    leader.stop().await;
    assert!(!leader.is_leader_cached());

    let remaining: Vec<_> = instances
        .iter()
        .filter(|c| c.instance_id() != leaders[0])
        .collect();
    assert_eq!(remaining[0].get_instance_count().await.unwrap(), 2);
    let mut successors = 0;
    for instance in &remaining {
        if instance.is_leader().await {
            successors += 1;
        }
    }
    assert_eq!(successors, 1);

    for instance in remaining {
        instance.stop().await;
    }
}

#[tokio::test]
async fn heartbeat_reregisters_a_missing_record() {
    let fixture = CacheFixtureBuilder::new().build();
    let a = coordinator("a", &fixture.cache);
    a.register().await.unwrap();
    assert_eq!(a.heartbeat_tick().await, HeartbeatOutcome::Refreshed);

    fixture.cache.delete(&keys::instance_key("a")).await.unwrap();
    assert_eq!(a.heartbeat_tick().await, HeartbeatOutcome::Reregistered);
    assert_eq!(a.get_instance_count().await.unwrap(), 1);
}

#[tokio::test]
async fn heartbeat_survives_store_outage() {
    let fixture = CacheFixtureBuilder::new().build();
    let a = coordinator("a", &fixture.cache);
    a.register().await.unwrap();

    fixture.primary.fail_with(network_error());
    assert_eq!(a.heartbeat_tick().await, HeartbeatOutcome::Skipped);
}

#[tokio::test]
async fn duplicate_deliveries_are_processed_once() {
    let fixture = CacheFixtureBuilder::new().build();
    let instances = [
        coordinator("a", &fixture.cache),
        coordinator("b", &fixture.cache),
        coordinator("c", &fixture.cache),
    ];
    let handled = Arc::new(AtomicU32::new(0));
    let delivery = Delivery {
        id: "wamid.123".to_string(),
    };

    let outcomes = join_all(instances.iter().map(|c| {
        let handled = Arc::clone(&handled);
        c.handle_event(&delivery, move || async move {
            handled.fetch_add(1, Ordering::SeqCst);
            "sent"
        })
    }))
    .await;

    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert_eq!(
        outcomes.iter().filter(|o| matches!(o, EventOutcome::Processed("sent"))).count(),
        1
    );
    assert_eq!(
        outcomes.iter().filter(|o| **o == EventOutcome::Duplicate).count(),
        2
    );
}

#[tokio::test]
async fn unreadable_older_record_means_not_leader() {
    let shared = MemoryKvStore::new();
    let cache_for = |store: &MemoryKvStore| {
        Arc::new(TieredCache::new(
            StoreBackend::from(store.clone()),
            fast_cache_settings(),
        ))
    };
    let older = coordinator("a", &cache_for(&shared));
    older.register().await.unwrap();
    let newer = coordinator("b", &cache_for(&shared));
    newer.register().await.unwrap();

    shared.fail_reads_of(&keys::instance_key("a"), quota_error());
    assert!(newer.list_instances().await.is_err());
    assert!(!newer.is_leader().await);

    shared.recover();
    assert!(!newer.is_leader().await);
    assert!(older.is_leader().await);
}
