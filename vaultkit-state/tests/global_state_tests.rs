mod common;

use common::{settle, test_bed, GatedStorage};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use vaultkit_state::{KeyDefinition, StateDefinition, StateError, StateProvider, TierBackends};
use vaultkit_storage::{MemoryStorage, StorageBackend};
use vaultkit_types::{ClientKind, StorageTier};

fn theme_key() -> KeyDefinition<String> {
    let state = StateDefinition::new("settings", StorageTier::Disk);
    KeyDefinition::new(state, "theme").with_cleanup_delay(Duration::from_millis(100))
}

#[tokio::test]
async fn first_subscriber_sees_initial_null() {
    let bed = test_bed(ClientKind::Desktop);
    let state = bed.provider.global(&theme_key());

    let mut sub = state.subscribe();
    assert_eq!(sub.next().await.unwrap(), None);
}

#[tokio::test]
async fn replays_committed_value_to_late_subscribers() {
    let bed = test_bed(ClientKind::Desktop);
    let state = bed.provider.global(&theme_key());

    state.update(|_| Some("dark".to_string())).await.unwrap();

    let mut sub = state.subscribe();
    assert_eq!(sub.next().await.unwrap(), Some("dark".to_string()));
}

#[tokio::test]
async fn emits_once_per_update() {
    let bed = test_bed(ClientKind::Desktop);
    let state = bed.provider.global(&theme_key());

    let mut sub = state.subscribe();
    assert_eq!(sub.next().await.unwrap(), None);

    state.update(|_| Some("dark".to_string())).await.unwrap();
    assert_eq!(sub.next().await.unwrap(), Some("dark".to_string()));

    state.update(|_| Some("light".to_string())).await.unwrap();
    assert_eq!(sub.next().await.unwrap(), Some("light".to_string()));
}

#[tokio::test]
async fn all_subscribers_see_each_commit() {
    let bed = test_bed(ClientKind::Desktop);
    let state = bed.provider.global(&theme_key());

    let mut sub1 = state.subscribe();
    let mut sub2 = state.subscribe();
    assert_eq!(sub1.next().await.unwrap(), None);
    assert_eq!(sub2.next().await.unwrap(), None);

    state.update(|_| Some("dark".to_string())).await.unwrap();

    assert_eq!(sub1.next().await.unwrap(), Some("dark".to_string()));
    assert_eq!(sub2.next().await.unwrap(), Some("dark".to_string()));
}

#[tokio::test]
async fn external_saves_reach_subscribers() {
    let bed = test_bed(ClientKind::Desktop);
    let state = bed.provider.global(&theme_key());

    let mut sub = state.subscribe();
    assert_eq!(sub.next().await.unwrap(), None);

    // Another writer (e.g. a second surface) saves through the backend.
    bed.disk
        .save("global_settings_theme", Some(json!("dark")))
        .await
        .unwrap();

    assert_eq!(sub.next().await.unwrap(), Some("dark".to_string()));
}

#[tokio::test]
async fn unrelated_keys_do_not_emit() {
    let bed = test_bed(ClientKind::Desktop);
    let state = bed.provider.global(&theme_key());

    let mut sub = state.subscribe();
    assert_eq!(sub.next().await.unwrap(), None);

    bed.disk
        .save("global_settings_locale", Some(json!("de")))
        .await
        .unwrap();
    settle().await;

    state.update(|_| Some("dark".to_string())).await.unwrap();
    // The locale write never surfaced; the next emission is our own.
    assert_eq!(sub.next().await.unwrap(), Some("dark".to_string()));
}

#[tokio::test]
async fn resolved_update_is_already_on_the_stream() {
    let bed = test_bed(ClientKind::Desktop);
    let state = bed.provider.global(&theme_key());

    // Keep the shared reader alive so later reads replay its value.
    let mut sub = state.subscribe();
    assert_eq!(sub.next().await.unwrap(), None);

    state.update(|_| Some("dark".to_string())).await.unwrap();

    // The commit is visible the moment update resolves; a fresh
    // subscriber must never replay the pre-update value.
    assert_eq!(state.get().await.unwrap(), Some("dark".to_string()));
    assert_eq!(sub.next().await.unwrap(), Some("dark".to_string()));
}

#[tokio::test]
async fn saves_racing_reader_startup_settle_on_the_newest_value() {
    let gated = GatedStorage::new();
    let (accounts, accounts_rx) = tokio::sync::watch::channel(None);
    let backends = TierBackends::new(
        Arc::new(MemoryStorage::new()) as Arc<dyn StorageBackend>,
        Arc::clone(&gated) as Arc<dyn StorageBackend>,
    );
    let provider = StateProvider::new(ClientKind::Desktop, backends, accounts_rx);
    let state = provider.global(&theme_key());

    // Park the reader in its initial read, then land two writes.
    let mut sub = state.subscribe();
    settle().await;
    gated
        .save("global_settings_theme", Some(json!("stale")))
        .await
        .unwrap();
    gated
        .save("global_settings_theme", Some(json!("fresh")))
        .await
        .unwrap();
    gated.release_get();

    // The overwritten value never surfaces after the newer one.
    assert_eq!(sub.next().await.unwrap(), Some("fresh".to_string()));
    let follow_up = tokio::time::timeout(Duration::from_millis(50), sub.next()).await;
    if let Ok(value) = follow_up {
        assert_eq!(value.unwrap(), Some("fresh".to_string()));
    }

    drop(accounts);
}

#[tokio::test]
async fn get_reads_through_the_shared_stream() {
    let bed = test_bed(ClientKind::Desktop);
    let state = bed.provider.global(&theme_key());

    assert_eq!(state.get().await.unwrap(), None);
    state.update(|_| Some("dark".to_string())).await.unwrap();
    assert_eq!(state.get().await.unwrap(), Some("dark".to_string()));
}

#[tokio::test]
async fn deserialization_failure_surfaces_as_error() {
    let bed = test_bed(ClientKind::Desktop);
    bed.disk
        .seed([("global_settings_theme".to_string(), json!({"not": "a string"}))]);

    let state = bed.provider.global(&theme_key());
    let mut sub = state.subscribe();

    let err = sub.next().await.unwrap_err();
    match err {
        StateError::Shared(inner) => {
            assert!(matches!(*inner, StateError::Deserialize { .. }))
        }
        other => panic!("expected shared deserialize error, got {other:?}"),
    }
}

#[tokio::test]
async fn resubscribe_within_cleanup_delay_skips_backend_read() {
    let bed = test_bed(ClientKind::Desktop);
    let state = bed.provider.global(&theme_key());

    {
        let mut sub = state.subscribe();
        assert_eq!(sub.next().await.unwrap(), None);
    }
    assert_eq!(bed.disk.get_count(), 1);

    // Well inside the 100ms cleanup delay.
    tokio::time::sleep(Duration::from_millis(30)).await;

    let mut sub = state.subscribe();
    assert_eq!(sub.next().await.unwrap(), None);
    assert_eq!(bed.disk.get_count(), 1);
}

#[tokio::test]
async fn resubscribe_after_cleanup_delay_rereads_backend() {
    let bed = test_bed(ClientKind::Desktop);
    let state = bed.provider.global(&theme_key());

    {
        let mut sub = state.subscribe();
        assert_eq!(sub.next().await.unwrap(), None);
    }
    assert_eq!(bed.disk.get_count(), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut sub = state.subscribe();
    assert_eq!(sub.next().await.unwrap(), None);
    assert_eq!(bed.disk.get_count(), 2);
}

#[tokio::test]
async fn cleanup_waits_while_subscribers_remain() {
    let bed = test_bed(ClientKind::Desktop);
    let state = bed.provider.global(&theme_key());

    let sub1 = state.subscribe();
    let mut sub2 = state.subscribe();
    assert_eq!(sub2.next().await.unwrap(), None);

    drop(sub1);
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Still live: an external save must reach the remaining subscriber.
    bed.disk
        .save("global_settings_theme", Some(json!("dark")))
        .await
        .unwrap();
    assert_eq!(sub2.next().await.unwrap(), Some("dark".to_string()));
    assert_eq!(bed.disk.get_count(), 1);
}

#[tokio::test]
async fn provider_caches_one_core_per_key() {
    let bed = test_bed(ClientKind::Desktop);
    let a = bed.provider.global(&theme_key());
    let b = bed.provider.global(&theme_key());

    let mut sub = a.subscribe();
    assert_eq!(sub.next().await.unwrap(), None);

    b.update(|_| Some("dark".to_string())).await.unwrap();
    // The handles share one stream, so a's subscriber sees b's write.
    assert_eq!(sub.next().await.unwrap(), Some("dark".to_string()));
}

#[tokio::test]
async fn client_tier_override_routes_to_other_backend() {
    let bed = test_bed(ClientKind::Web);
    let state_def = StateDefinition::new("session", StorageTier::Memory)
        .with_client_tier(ClientKind::Web, StorageTier::Disk);
    let key: KeyDefinition<String> = KeyDefinition::new(state_def, "token");

    let state = bed.provider.global(&key);
    state.update(|_| Some("tok".to_string())).await.unwrap();

    assert_eq!(bed.disk.save_count(), 1);
    assert_eq!(bed.memory.save_count(), 0);
}
