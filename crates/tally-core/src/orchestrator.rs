//! Top-level sync orchestrator.
//!
//! Owns the local store, the remote handle, the operation queue, the
//! reconciler, and the review batcher, and sequences them through the
//! connectivity lifecycle: sign-in, submit, reconnect (drain then
//! refresh), scope switches, sign-out.
//!
//! Outcomes that consumers care about surface on a bounded event bus
//! rather than callbacks: the caller polls [`Orchestrator::try_next_event`]
//! at its own pace. A full bus drops the oldest-pending behavior in
//! favor of dropping the new event with a warning; events are
//! advisory, the durable state is always the store.

use std::sync::mpsc::{Receiver, SyncSender, sync_channel};

use crate::config::SyncConfig;
use crate::error::{ConflictDetails, SyncError};
use crate::model::ScopeId;
use crate::queue::entry::Operation;
use crate::queue::{DrainReport, EnqueueReceipt, OperationQueue};
use crate::realtime::{RealtimeSnapshot, Reconciler};
use crate::remote::{Collection, NetworkPresence, RemoteStore};
use crate::review::{AlwaysManual, ConflictPolicy, ReviewBatcher, ReviewEntry};
use crate::store::LocalStore;

/// Events published on the orchestrator's bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A drain pass finished. `pending_operations` is the queue depth
    /// afterwards; zero means fully caught up.
    SyncComplete { pending_operations: u64 },
    /// An entry was retired without applying.
    OperationFailed {
        entry_id: String,
        entity_id: String,
        error: String,
    },
    /// A conflict was routed to manual review.
    ConflictDetected(ConflictDetails),
}

/// The sync core's single entry point.
pub struct Orchestrator<R: RemoteStore, P: NetworkPresence> {
    store: LocalStore,
    remote: R,
    presence: P,
    config: SyncConfig,
    queue: OperationQueue,
    reconciler: Reconciler,
    batcher: ReviewBatcher,
    policy: Box<dyn ConflictPolicy>,
    identity: Option<String>,
    events_tx: SyncSender<SyncEvent>,
    events_rx: Receiver<SyncEvent>,
}

impl<R: RemoteStore, P: NetworkPresence> Orchestrator<R, P> {
    #[must_use]
    pub fn new(store: LocalStore, remote: R, presence: P, scope: ScopeId, config: SyncConfig) -> Self {
        let (events_tx, events_rx) = sync_channel(config.channel_capacity);
        Self {
            queue: OperationQueue::new(scope.clone(), &config),
            reconciler: Reconciler::new(scope.clone(), &config),
            batcher: ReviewBatcher::new(scope),
            policy: Box::new(AlwaysManual),
            identity: None,
            store,
            remote,
            presence,
            config,
            events_tx,
            events_rx,
        }
    }

    /// Swap the conflict policy. Defaults to routing everything to
    /// manual review.
    pub fn set_conflict_policy(&mut self, policy: Box<dyn ConflictPolicy>) {
        self.policy = policy;
    }

    // -----------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------

    /// Establish an identity context. Required before any write,
    /// including offline ones.
    pub fn sign_in(&mut self, identity: &str) {
        tracing::info!(identity, "signed in");
        self.identity = Some(identity.to_string());
        self.queue.set_authenticated(true);
    }

    /// Drop the identity context and tear down push channels. Pending
    /// queue entries stay durable for the next session.
    pub fn sign_out(&mut self) {
        tracing::info!("signed out");
        self.identity = None;
        self.queue.set_authenticated(false);
        self.reconciler.teardown_all();
    }

    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    // -----------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------

    /// Submit a mutation through the operation queue.
    pub fn submit(&mut self, op: Operation, now_us: u64) -> Result<EnqueueReceipt, SyncError> {
        self.queue
            .enqueue(&self.store, &mut self.remote, &self.presence, op, now_us)
    }

    /// Pending queue depth for the active scope.
    pub fn pending_operations(&self) -> Result<u64, SyncError> {
        self.store.queue_depth(self.queue.scope())
    }

    // -----------------------------------------------------------------
    // Connectivity lifecycle
    // -----------------------------------------------------------------

    /// Connectivity came back: drain the queue, then bring the
    /// realtime view current with a (cooldown-respecting) refresh and
    /// live channels.
    pub fn handle_connectivity_regained(&mut self, now_us: u64) -> Result<DrainReport, SyncError> {
        if !self.presence.is_online() {
            tracing::debug!("connectivity signal raced an offline transition; skipping drain");
            return Ok(DrainReport::default());
        }

        let report = self.queue.drain(
            &self.store,
            &mut self.remote,
            self.policy.as_ref(),
            &mut self.batcher,
            now_us,
        )?;
        self.publish_drain_events(&report);

        // The drain may have raced pushes that predate its writes; a
        // non-forced refresh reconverges without stampeding the
        // backend when reconnects flap.
        for collection in [Collection::Items, Collection::Transactions] {
            self.reconciler.ensure_subscribed(&mut self.remote, collection)?;
            self.reconciler
                .refresh(&self.remote, collection, false, now_us)?;
        }
        self.reconciler.pump(now_us);
        Ok(report)
    }

    /// Explicitly refresh both collections.
    pub fn refresh(&mut self, force: bool, now_us: u64) -> Result<(), SyncError> {
        for collection in [Collection::Items, Collection::Transactions] {
            self.reconciler.refresh(&self.remote, collection, force, now_us)?;
        }
        Ok(())
    }

    /// Drain queued push messages into the snapshot.
    pub fn pump(&mut self, now_us: u64) -> usize {
        self.reconciler.pump(now_us)
    }

    /// Switch the active scope: the realtime view resets and the queue
    /// and batcher re-anchor. Pending entries of the old scope stay
    /// durable and drain when that scope is active again.
    pub fn set_scope(&mut self, scope: ScopeId) {
        if &scope == self.queue.scope() {
            return;
        }
        self.reconciler.set_scope(scope.clone());
        self.queue = OperationQueue::new(scope.clone(), &self.config);
        self.queue.set_authenticated(self.identity.is_some());
        self.batcher = ReviewBatcher::new(scope);
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    #[must_use]
    pub const fn snapshot(&self) -> &RealtimeSnapshot {
        self.reconciler.snapshot()
    }

    #[must_use]
    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    /// The remote backend handle. Mostly for test harnesses that seed
    /// or inspect remote state directly.
    #[must_use]
    pub const fn remote_handle(&self) -> &R {
        &self.remote
    }

    /// Mutable remote handle; see [`Self::remote_handle`].
    pub const fn remote_handle_mut(&mut self) -> &mut R {
        &mut self.remote
    }

    /// Review entries awaiting user judgment in the active scope.
    pub fn review_entries(&self) -> Result<Vec<ReviewEntry>, SyncError> {
        self.store.list_review_entries(self.queue.scope())
    }

    /// Pull the next pending event, if any.
    pub fn try_next_event(&mut self) -> Option<SyncEvent> {
        self.events_rx.try_recv().ok()
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn publish_drain_events(&mut self, report: &DrainReport) {
        for failed in &report.failed {
            self.emit(SyncEvent::OperationFailed {
                entry_id: failed.entry_id.clone(),
                entity_id: failed.entity_id.clone(),
                error: failed.error.clone(),
            });
        }
        for conflict in &report.conflicts {
            self.emit(SyncEvent::ConflictDetected(conflict.clone()));
        }
        self.emit(SyncEvent::SyncComplete {
            pending_operations: report.remaining,
        });
    }

    fn emit(&self, event: SyncEvent) {
        if self.events_tx.try_send(event).is_err() {
            tracing::warn!("event bus full; dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Orchestrator, SyncEvent};
    use crate::config::SyncConfig;
    use crate::model::{Item, ItemId, ScopeId, TransactionId};
    use crate::queue::entry::Operation;
    use crate::queue::DeliveryMode;
    use crate::remote::memory::{MemoryRemote, TogglePresence};
    use crate::store::LocalStore;
    use std::rc::Rc;

    fn orchestrator(
        online: bool,
    ) -> (Orchestrator<MemoryRemote, Rc<TogglePresence>>, Rc<TogglePresence>) {
        let presence = TogglePresence::shared(online);
        let store = LocalStore::open_in_memory().expect("open");
        let mut orch = Orchestrator::new(
            store,
            MemoryRemote::new(),
            Rc::clone(&presence),
            ScopeId::new("acct-1"),
            SyncConfig::default(),
        );
        orch.sign_in("dev@local");
        (orch, presence)
    }

    fn create(id: &str) -> Operation {
        Operation::CreateItem {
            item: Item {
                id: ItemId::new_unchecked(id),
                description: "Walnut desk".into(),
                ..Item::default()
            },
        }
    }

    #[test]
    fn offline_submit_then_reconnect_catches_up() {
        let (mut orch, presence) = orchestrator(false);

        let receipt = orch.submit(create("it-0000aaaa"), 10).expect("submit");
        assert_eq!(receipt.mode, DeliveryMode::Offline);
        assert_eq!(orch.pending_operations().expect("depth"), 1);

        presence.set_online(true);
        let report = orch.handle_connectivity_regained(20).expect("reconnect");
        assert_eq!(report.drained, 1);
        assert_eq!(orch.pending_operations().expect("depth"), 0);

        // Refresh after drain populated the realtime view.
        assert_eq!(orch.snapshot().items.len(), 1);

        assert_eq!(
            orch.try_next_event(),
            Some(SyncEvent::SyncComplete {
                pending_operations: 0
            })
        );
    }

    #[test]
    fn conflict_during_drain_is_published() {
        let (mut orch, presence) = orchestrator(false);

        // Local believes the item sits in tx-1; another device moved
        // it to tx-3 remotely.
        let mut seeded = Item {
            id: ItemId::new_unchecked("it-0000aaaa"),
            transaction_id: Some(TransactionId::new_unchecked("tx-00000003")),
            ..Item::default()
        };
        orch.remote.seed_item(seeded.clone());
        seeded.transaction_id = Some(TransactionId::new_unchecked("tx-00000001"));
        orch.store
            .put_item(&ScopeId::new("acct-1"), &seeded)
            .expect("put");

        orch.submit(
            Operation::ReassignItem {
                item_id: ItemId::new_unchecked("it-0000aaaa"),
                previous_transaction_id: Some(TransactionId::new_unchecked("tx-00000001")),
                to_transaction_id: TransactionId::new_unchecked("tx-00000002"),
            },
            10,
        )
        .expect("submit queues offline");

        presence.set_online(true);
        let report = orch.handle_connectivity_regained(20).expect("reconnect");
        assert_eq!(report.conflicts.len(), 1);

        let mut saw_conflict = false;
        while let Some(event) = orch.try_next_event() {
            if let SyncEvent::ConflictDetected(details) = event {
                assert_eq!(details.entity_id, "it-0000aaaa");
                saw_conflict = true;
            }
        }
        assert!(saw_conflict);
        assert_eq!(orch.review_entries().expect("reviews").len(), 1);
    }

    #[test]
    fn unauthenticated_submit_is_rejected() {
        let (mut orch, _presence) = orchestrator(false);
        orch.sign_out();
        assert!(orch.submit(create("it-0000aaaa"), 10).is_err());
    }

    #[test]
    fn sign_out_tears_down_channels_but_keeps_queue() {
        let (mut orch, presence) = orchestrator(true);
        orch.refresh(true, 10).expect("refresh");

        presence.set_online(false);
        orch.submit(create("it-0000aaaa"), 20).expect("submit");
        assert_eq!(orch.pending_operations().expect("depth"), 1);

        orch.sign_out();
        assert_eq!(orch.snapshot().telemetry.active_channels, 0);
        assert_eq!(
            orch.pending_operations().expect("depth"),
            1,
            "durable entries survive sign-out"
        );
    }

    #[test]
    fn scope_switch_resets_view_and_reanchors_queue() {
        let (mut orch, _presence) = orchestrator(true);
        orch.submit(create("it-0000aaaa"), 10).expect("submit");
        orch.refresh(true, 20).expect("refresh");
        assert_eq!(orch.snapshot().items.len(), 1);

        orch.set_scope(ScopeId::new("acct-2"));
        assert!(orch.snapshot().items.is_empty());
        assert_eq!(orch.pending_operations().expect("depth"), 0);

        // Writes still work in the new scope without a fresh sign-in.
        orch.submit(create("it-0000bbbb"), 30).expect("submit");
    }
}
