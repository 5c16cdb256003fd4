//! Conflict handling end to end: stale-base rejections, review
//! routing, policy overrides, and id stability for offline creates.

use std::rc::Rc;

use tally_core::config::SyncConfig;
use tally_core::error::{ConflictDetails, SyncError};
use tally_core::model::{Item, ItemId, ScopeId, TransactionId};
use tally_core::orchestrator::Orchestrator;
use tally_core::queue::entry::Operation;
use tally_core::remote::memory::{MemoryRemote, TogglePresence};
use tally_core::review::{ConflictPolicy, ConflictResolution, ReviewKind};
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
    orch.sign_in("conflicts@test");
    (orch, presence)
}

fn item_id() -> ItemId {
    ItemId::new_unchecked("it-0000aaaa")
}

/// Seed the same item on both sides, but with the remote copy already
/// moved to tx-3 by another device while local still believes tx-1.
fn seed_diverged(orch: &mut Orchestrator<MemoryRemote, Rc<TogglePresence>>) {
    let mut remote_copy = Item {
        id: item_id(),
        description: "Marble pedestal".into(),
        transaction_id: Some(TransactionId::new_unchecked("tx-00000003")),
        ..Item::default()
    };
    orch.remote_handle_mut().seed_item(remote_copy.clone());
    remote_copy.transaction_id = Some(TransactionId::new_unchecked("tx-00000001"));
    orch.store().put_item(&scope(), &remote_copy).expect("put");
}

fn stale_reassign() -> Operation {
    Operation::ReassignItem {
        item_id: item_id(),
        previous_transaction_id: Some(TransactionId::new_unchecked("tx-00000001")),
        to_transaction_id: TransactionId::new_unchecked("tx-00000002"),
    }
}

#[test]
fn online_stale_reassign_errors_without_side_effects() {
    let (mut orch, _presence) = harness(true);
    seed_diverged(&mut orch);

    let err = orch
        .submit(stale_reassign(), 100)
        .expect_err("stale base must be rejected");
    let SyncError::Conflict(details) = err else {
        panic!("expected a conflict error");
    };
    assert_eq!(details.entity_id, "it-0000aaaa");
    assert_eq!(details.expected.as_deref(), Some("tx-00000001"));
    assert_eq!(details.actual.as_deref(), Some("tx-00000003"));

    // No edge, no queue entry, item untouched on both sides.
    assert!(orch.store().edges_for_item(&item_id()).expect("edges").is_empty());
    assert_eq!(orch.pending_operations().expect("depth"), 0);
    assert_eq!(
        orch.store()
            .get_item(&item_id())
            .expect("get")
            .expect("item")
            .transaction_id,
        Some(TransactionId::new_unchecked("tx-00000001"))
    );
    assert_eq!(
        orch.remote_handle()
            .item(&item_id())
            .expect("item")
            .transaction_id,
        Some(TransactionId::new_unchecked("tx-00000003"))
    );
}

#[test]
fn offline_create_keeps_its_id_through_drain() {
    let (mut orch, presence) = harness(false);

    // The id is generated client-side at creation time.
    let id = ItemId::generate("conflicts@test", 1_000, 0);
    orch.submit(
        Operation::CreateItem {
            item: Item {
                id: id.clone(),
                description: "Cane chair".into(),
                ..Item::default()
            },
        },
        1_000,
    )
    .expect("submit");

    presence.set_online(true);
    let report = orch.handle_connectivity_regained(2_000_000).expect("drain");
    assert_eq!(report.drained, 1);
    assert_eq!(orch.pending_operations().expect("depth"), 0);

    // The remote holds the same id; no server-side renaming.
    assert!(orch.remote_handle().item(&id).is_some());
}

#[test]
fn drained_conflict_lands_in_review_under_default_policy() {
    let (mut orch, presence) = harness(false);
    seed_diverged(&mut orch);

    orch.submit(stale_reassign(), 100).expect("queues offline");
    presence.set_online(true);
    let report = orch.handle_connectivity_regained(2_000_000).expect("drain");
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.drained, 0);

    let reviews = orch.review_entries().expect("reviews");
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].kind, ReviewKind::Conflict);
    assert_eq!(reviews[0].detail["field"], "transaction_id");

    // The entry is retired, not silently retried forever.
    assert_eq!(orch.pending_operations().expect("depth"), 0);
    assert_eq!(orch.store().failed_entries(&scope()).expect("failed").len(), 1);
}

struct PreferServerPolicy;

impl ConflictPolicy for PreferServerPolicy {
    fn resolve(&self, _details: &ConflictDetails) -> ConflictResolution {
        ConflictResolution::PreferServer
    }
}

#[test]
fn prefer_server_adopts_the_remote_snapshot() {
    let (mut orch, presence) = harness(false);
    seed_diverged(&mut orch);
    orch.set_conflict_policy(Box::new(PreferServerPolicy));

    orch.submit(stale_reassign(), 100).expect("queues offline");
    presence.set_online(true);
    orch.handle_connectivity_regained(2_000_000).expect("drain");

    // Local converges to the server's tx-3; no review entry.
    assert_eq!(
        orch.store()
            .get_item(&item_id())
            .expect("get")
            .expect("item")
            .transaction_id,
        Some(TransactionId::new_unchecked("tx-00000003"))
    );
    assert!(orch.review_entries().expect("reviews").is_empty());
    assert_eq!(orch.pending_operations().expect("depth"), 0);
}

struct PreferLocalPolicy;

impl ConflictPolicy for PreferLocalPolicy {
    fn resolve(&self, _details: &ConflictDetails) -> ConflictResolution {
        ConflictResolution::PreferLocal
    }
}

#[test]
fn prefer_local_rebases_onto_the_server_value() {
    let (mut orch, presence) = harness(false);
    seed_diverged(&mut orch);
    orch.set_conflict_policy(Box::new(PreferLocalPolicy));

    orch.submit(stale_reassign(), 100).expect("queues offline");
    presence.set_online(true);
    let report = orch.handle_connectivity_regained(2_000_000).expect("drain");
    assert_eq!(report.drained, 1);

    // The move applied against the server's actual base: the item
    // ends up in tx-2 on both sides.
    assert_eq!(
        orch.remote_handle()
            .item(&item_id())
            .expect("item")
            .transaction_id,
        Some(TransactionId::new_unchecked("tx-00000002"))
    );
    assert_eq!(
        orch.store()
            .get_item(&item_id())
            .expect("get")
            .expect("item")
            .transaction_id,
        Some(TransactionId::new_unchecked("tx-00000002"))
    );
    assert_eq!(orch.pending_operations().expect("depth"), 0);
}
