//! Drain behavior under scripted remote faults: flaky reconnects,
//! the retry ceiling, and replay after a lost acknowledgment.

use std::rc::Rc;

use tally_core::config::SyncConfig;
use tally_core::model::{Item, ItemId, ScopeId};
use tally_core::orchestrator::{Orchestrator, SyncEvent};
use tally_core::queue::entry::Operation;
use tally_core::remote::memory::{MemoryRemote, TogglePresence};
use tally_core::remote::{RemoteError, RemoteStore};
use tally_core::store::LocalStore;

fn scope() -> ScopeId {
    ScopeId::new("acct-1")
}

fn harness(online: bool) -> (Orchestrator<MemoryRemote, Rc<TogglePresence>>, Rc<TogglePresence>) {
    let presence = TogglePresence::shared(online);
    let store = LocalStore::open_in_memory().expect("open store");
    let mut orch = Orchestrator::new(
        store,
        MemoryRemote::new(),
        Rc::clone(&presence),
        scope(),
        SyncConfig::default(),
    );
    orch.sign_in("faults@test");
    (orch, presence)
}

fn create(id: &str) -> Operation {
    Operation::CreateItem {
        item: Item {
            id: ItemId::new_unchecked(id),
            description: "Teak bookshelf".into(),
            ..Item::default()
        },
    }
}

#[test]
fn flaky_reconnect_drains_on_the_second_pass() {
    let (mut orch, presence) = harness(false);
    orch.submit(create("it-0000aaaa"), 10).expect("submit");

    presence.set_online(true);
    orch.remote_handle_mut()
        .fail_next(RemoteError::Unavailable("flap".into()));
    let report = orch.handle_connectivity_regained(2_000_000).expect("drain");
    assert_eq!(report.drained, 0);
    assert_eq!(report.still_pending, 1);
    assert_eq!(orch.pending_operations().expect("depth"), 1);

    let report = orch.handle_connectivity_regained(4_000_000).expect("drain");
    assert_eq!(report.drained, 1);
    assert_eq!(orch.pending_operations().expect("depth"), 0);
}

#[test]
fn retry_ceiling_is_exact_and_publishes_failure() {
    let (mut orch, presence) = harness(false);
    orch.submit(create("it-0000aaaa"), 10).expect("submit");
    presence.set_online(true);

    let ceiling = SyncConfig::default().retry_ceiling;
    for attempt in 0..ceiling {
        orch.remote_handle_mut()
            .fail_next(RemoteError::Timeout("backend slow".into()));
        orch.handle_connectivity_regained(u64::from(attempt) * 2_000_000 + 1_000_000)
            .expect("drain");
    }

    assert_eq!(
        orch.remote_handle().apply_calls(),
        u64::from(ceiling),
        "exactly {ceiling} attempts, never a {}th",
        ceiling + 1
    );
    assert_eq!(orch.pending_operations().expect("depth"), 0);
    assert_eq!(orch.store().failed_entries(&scope()).expect("failed").len(), 1);

    let mut saw_failure = false;
    while let Some(event) = orch.try_next_event() {
        if let SyncEvent::OperationFailed { entity_id, .. } = event {
            assert_eq!(entity_id, "it-0000aaaa");
            saw_failure = true;
        }
    }
    assert!(saw_failure, "retirement must surface on the event bus");

    // Nothing left to attempt.
    orch.handle_connectivity_regained(99_000_000).expect("drain");
    assert_eq!(orch.remote_handle().apply_calls(), u64::from(ceiling));
}

#[test]
fn lost_ack_replays_as_a_noop() {
    // The remote applied the entry but the local ack was lost (the
    // entry is still pending). The next drain must replay by
    // idempotency key without double-applying.
    let (mut orch, presence) = harness(false);
    orch.submit(create("it-0000aaaa"), 10).expect("submit");

    let pending = orch.store().pending_entries(&scope()).expect("pending");
    assert_eq!(pending.len(), 1);
    let entry = &pending[0];

    // Simulate the first delivery landing remotely.
    orch.remote_handle_mut()
        .apply(&entry.operation, &entry.idempotency_key, 15)
        .expect("remote apply");
    assert!(orch
        .remote_handle()
        .item(&ItemId::new_unchecked("it-0000aaaa"))
        .is_some());

    presence.set_online(true);
    let report = orch.handle_connectivity_regained(20).expect("drain");
    assert_eq!(report.drained, 1);
    assert_eq!(report.replayed, 1, "remote must dedupe by idempotency key");
    assert_eq!(orch.remote_handle().applied_key_count(), 1);

    // Local side effects still landed.
    assert!(orch
        .store()
        .get_item(&ItemId::new_unchecked("it-0000aaaa"))
        .expect("get")
        .is_some());
}

#[test]
fn failure_on_one_entity_does_not_starve_others() {
    let (mut orch, presence) = harness(false);
    orch.submit(create("it-0000aaaa"), 10).expect("submit");
    orch.submit(create("it-0000bbbb"), 11).expect("submit");
    orch.submit(create("it-0000cccc"), 12).expect("submit");

    presence.set_online(true);
    orch.remote_handle_mut()
        .fail_next(RemoteError::Unavailable("first call fails".into()));
    let report = orch.handle_connectivity_regained(2_000_000).expect("drain");

    assert_eq!(report.drained, 2, "unaffected entities keep draining");
    assert_eq!(report.still_pending, 1);
    assert!(orch
        .remote_handle()
        .item(&ItemId::new_unchecked("it-0000bbbb"))
        .is_some());
    assert!(orch
        .remote_handle()
        .item(&ItemId::new_unchecked("it-0000cccc"))
        .is_some());
}
