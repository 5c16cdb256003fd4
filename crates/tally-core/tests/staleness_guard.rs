//! Fetch/push ordering guards: in-flight refreshes must never clobber
//! newer pushed state, and reconnect flaps must not stampede refreshes.

use std::rc::Rc;

use tally_core::config::SyncConfig;
use tally_core::model::{Item, ItemId, ScopeId};
use tally_core::orchestrator::Orchestrator;
use tally_core::realtime::Reconciler;
use tally_core::remote::memory::{MemoryRemote, TogglePresence};
use tally_core::remote::{ChannelStatus, Collection, PushChange, PushMessage};
use tally_core::store::LocalStore;

fn scope() -> ScopeId {
    ScopeId::new("acct-1")
}

fn item(id: &str, description: &str) -> Item {
    Item {
        id: ItemId::new_unchecked(id),
        description: description.into(),
        ..Item::default()
    }
}

#[test]
fn push_during_inflight_refresh_wins_over_fetched_copy() {
    let mut reconciler = Reconciler::new(scope(), &SyncConfig::default());

    // Refresh begins at t=1_000_000 having fetched the pre-push copy.
    let ticket = reconciler
        .begin_refresh(Collection::Items, true, 1_000_000)
        .expect("ticket");

    // A push lands mid-flight with the newer state.
    reconciler.apply_push(
        &PushMessage {
            status: ChannelStatus::Subscribed,
            change: Some(PushChange::UpsertItem(item("it-0000aaaa", "pushed v2"))),
            at_us: 1_200_000,
        },
        1_200_000,
    );

    assert!(reconciler.complete_items_refresh(
        &ticket,
        vec![item("it-0000aaaa", "fetched v1"), item("it-0000bbbb", "fetched")],
        1_500_000,
    ));

    let snapshot = reconciler.snapshot();
    assert_eq!(snapshot.items["it-0000aaaa"].description, "pushed v2");
    assert_eq!(snapshot.items["it-0000bbbb"].description, "fetched");
}

#[test]
fn superseded_refresh_is_discarded_wholesale() {
    let mut reconciler = Reconciler::new(scope(), &SyncConfig::default());

    let stale = reconciler
        .begin_refresh(Collection::Items, true, 1_000_000)
        .expect("ticket");
    let fresh = reconciler
        .begin_refresh(Collection::Items, true, 2_000_000)
        .expect("ticket");

    // The newer refresh completes first.
    assert!(reconciler.complete_items_refresh(&fresh, vec![item("it-0000aaaa", "current")], 2_100_000));
    // The older one straggles in afterwards and must be dropped.
    assert!(!reconciler.complete_items_refresh(&stale, vec![item("it-0000aaaa", "ancient")], 2_200_000));

    assert_eq!(reconciler.snapshot().items["it-0000aaaa"].description, "current");
}

#[test]
fn reconnect_flaps_respect_the_refresh_cooldown() {
    let presence = TogglePresence::shared(true);
    let store = LocalStore::open_in_memory().expect("open store");
    let mut remote = MemoryRemote::new();
    remote.seed_item(item("it-0000aaaa", "seeded"));

    let mut orch = Orchestrator::new(
        store,
        remote,
        Rc::clone(&presence),
        scope(),
        SyncConfig::default(),
    );
    orch.sign_in("flappy@test");

    // First reconnect refreshes.
    orch.handle_connectivity_regained(10_000_000).expect("reconnect");
    let first_refreshed =
        orch.snapshot().telemetry.last_refreshed_us[&Collection::Items];
    assert_eq!(first_refreshed, 10_000_000);

    // A flap 200ms later drains fine but must not re-fetch.
    orch.handle_connectivity_regained(10_200_000).expect("reconnect");
    assert_eq!(
        orch.snapshot().telemetry.last_refreshed_us[&Collection::Items],
        first_refreshed,
        "cooldown must suppress the second refresh"
    );

    // Past the window the refresh runs again.
    orch.handle_connectivity_regained(20_000_000).expect("reconnect");
    assert_eq!(
        orch.snapshot().telemetry.last_refreshed_us[&Collection::Items],
        20_000_000
    );

    // An explicit forced refresh always punches through.
    orch.refresh(true, 20_100_000).expect("refresh");
    assert_eq!(
        orch.snapshot().telemetry.last_refreshed_us[&Collection::Items],
        20_100_000
    );
}

#[test]
fn channel_drop_recovers_with_resubscribe_and_refresh() {
    let presence = TogglePresence::shared(true);
    let store = LocalStore::open_in_memory().expect("open store");
    let mut orch = Orchestrator::new(
        store,
        MemoryRemote::new(),
        Rc::clone(&presence),
        scope(),
        SyncConfig::default(),
    );
    orch.sign_in("channels@test");
    orch.handle_connectivity_regained(1_000_000).expect("reconnect");
    assert_eq!(orch.snapshot().telemetry.active_channels, 2);

    // The backend drops the items channel; only that channel goes.
    orch.remote_handle_mut()
        .emit_status(Collection::Items, ChannelStatus::ChannelError, 2_000_000);
    orch.pump(2_000_000);
    assert_eq!(orch.snapshot().telemetry.active_channels, 1);
    assert_eq!(orch.snapshot().telemetry.last_disconnect_us, Some(2_000_000));

    // Another device writes while channels are down; the recovery pass
    // re-subscribes and re-fetches it.
    orch.remote_handle_mut().seed_item(item("it-0000aaaa", "missed write"));
    orch.handle_connectivity_regained(5_000_000).expect("recover");
    assert_eq!(orch.snapshot().telemetry.active_channels, 2);
    assert_eq!(orch.snapshot().items["it-0000aaaa"].description, "missed write");
}
