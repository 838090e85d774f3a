use pretty_assertions::assert_eq;
use std::time::Duration;
use vaultkit_state::{
    global_storage_key, user_storage_key, DebugFlags, KeyDefinition, StateDefinition,
    UserKeyDefinition, DEFAULT_CLEANUP_DELAY,
};
use vaultkit_types::{ClearEvent, ClientKind, StorageTier, UserId};

#[test]
fn global_storage_key_format_is_stable() {
    let state = StateDefinition::new("settings", StorageTier::Disk);
    let key: KeyDefinition<String> = KeyDefinition::new(state, "theme");

    assert_eq!(key.storage_key(), "global_settings_theme");
    assert_eq!(global_storage_key("settings", "theme"), "global_settings_theme");
}

#[test]
fn user_storage_key_format_is_stable() {
    let user = UserId::parse("00000000-0000-1000-a000-000000000001").unwrap();
    let state = StateDefinition::new("fake", StorageTier::Disk);
    let key: UserKeyDefinition<String> = UserKeyDefinition::new(state, "fake");

    assert_eq!(
        key.storage_key(user),
        "user_00000000-0000-1000-a000-000000000001_fake_fake"
    );
    assert_eq!(
        user_storage_key(user, "fake", "fake"),
        "user_00000000-0000-1000-a000-000000000001_fake_fake"
    );
}

#[test]
fn distinct_identities_never_collide() {
    let u1 = UserId::new();
    let u2 = UserId::new();
    let keys = [
        global_storage_key("settings", "theme"),
        global_storage_key("settings", "locale"),
        global_storage_key("session", "theme"),
        user_storage_key(u1, "settings", "theme"),
        user_storage_key(u2, "settings", "theme"),
    ];

    for (i, a) in keys.iter().enumerate() {
        for b in keys.iter().skip(i + 1) {
            assert_ne!(a, b);
        }
    }
}

#[test]
fn cleanup_delay_defaults_to_one_second() {
    let state = StateDefinition::new("settings", StorageTier::Disk);
    let key: KeyDefinition<u32> = KeyDefinition::new(state.clone(), "slot");
    assert_eq!(key.cleanup_delay(), DEFAULT_CLEANUP_DELAY);

    let key = key.with_cleanup_delay(Duration::from_millis(10));
    assert_eq!(key.cleanup_delay(), Duration::from_millis(10));
}

#[test]
fn client_tier_overrides_resolve() {
    let state = StateDefinition::new("session", StorageTier::Memory)
        .with_client_tier(ClientKind::Web, StorageTier::Disk);

    assert_eq!(state.tier_for(ClientKind::Web), StorageTier::Disk);
    assert_eq!(state.tier_for(ClientKind::Desktop), StorageTier::Memory);
    assert_eq!(state.default_tier(), StorageTier::Memory);
}

#[test]
fn debug_flags_default_to_silent() {
    let state = StateDefinition::new("settings", StorageTier::Disk);
    let key: KeyDefinition<String> = KeyDefinition::new(state.clone(), "theme");
    assert_eq!(key.debug_flags(), DebugFlags::default());
    assert!(!key.debug_flags().log_retrievals);
    assert!(!key.debug_flags().log_updates);

    let key = key.with_debug_flags(DebugFlags {
        log_retrievals: true,
        log_updates: false,
    });
    assert!(key.debug_flags().log_retrievals);
    assert!(!key.debug_flags().log_updates);

    let user_key: UserKeyDefinition<String> = UserKeyDefinition::new(state, "token")
        .with_debug_flags(DebugFlags {
            log_retrievals: false,
            log_updates: true,
        });
    assert!(user_key.debug_flags().log_updates);
}

#[test]
fn user_key_records_clear_events() {
    let state = StateDefinition::new("session", StorageTier::Memory);
    let key: UserKeyDefinition<String> =
        UserKeyDefinition::new(state, "token").with_clear_on([ClearEvent::Lock, ClearEvent::Logout]);

    assert_eq!(key.clear_on(), &[ClearEvent::Lock, ClearEvent::Logout]);
}

#[test]
#[should_panic(expected = "longer than 3 characters")]
fn empty_domain_name_panics() {
    let _ = StateDefinition::new("", StorageTier::Disk);
}

#[test]
#[should_panic(expected = "spaces or underscores")]
fn spaced_domain_name_panics() {
    let _ = StateDefinition::new("bad name", StorageTier::Disk);
}

#[test]
#[should_panic(expected = "must not be empty")]
fn empty_slot_key_panics() {
    let state = StateDefinition::new("settings", StorageTier::Disk);
    let _: KeyDefinition<String> = KeyDefinition::new(state, "");
}
