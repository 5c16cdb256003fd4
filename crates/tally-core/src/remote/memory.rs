//! In-memory remote store double with scripted fault injection.
//!
//! Used by unit and integration tests to stand in for the real
//! backend. It honors the full [`RemoteStore`] contract: idempotency
//! keys dedupe replays, movement operations verify their asserted base
//! container server-side, and mutations fan out to open push channels.
//!
//! Faults are deterministic and scripted: `fail_next` queues an error
//! that the next `apply` call returns instead of mutating. Queueing N
//! faults fails exactly the next N attempts.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::sync::mpsc::{SyncSender, sync_channel};

use super::{
    Applied, ChannelStatus, Collection, NetworkPresence, PushChange, PushMessage, RemoteError,
    RemoteStore, Subscription,
};
use crate::error::ConflictDetails;
use crate::lineage::LineageEdge;
use crate::model::{Item, ItemId, ProjectId, ScopeId, Transaction, TransactionId};
use crate::queue::entry::Operation;

const PUSH_CHANNEL_CAPACITY: usize = 64;

/// Authoritative in-memory backend.
#[derive(Default)]
pub struct MemoryRemote {
    items: BTreeMap<String, Item>,
    transactions: BTreeMap<String, Transaction>,
    edges: BTreeMap<String, LineageEdge>,
    seen_keys: HashSet<String>,
    scripted_faults: VecDeque<RemoteError>,
    subscribers: HashMap<Collection, Vec<SyncSender<PushMessage>>>,
    next_subscription_id: u64,
    apply_calls: u64,
}

impl MemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fault for the next `apply` call. Faults consume in FIFO
    /// order, one per call.
    pub fn fail_next(&mut self, error: RemoteError) {
        self.scripted_faults.push_back(error);
    }

    /// Total `apply` calls observed, including failed ones.
    #[must_use]
    pub const fn apply_calls(&self) -> u64 {
        self.apply_calls
    }

    /// Number of distinct idempotency keys applied fresh.
    #[must_use]
    pub fn applied_key_count(&self) -> usize {
        self.seen_keys.len()
    }

    /// Count of ledger edges appended.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Direct read of a remote transaction, for test assertions.
    #[must_use]
    pub fn transaction(&self, id: &TransactionId) -> Option<&Transaction> {
        self.transactions.get(id.as_str())
    }

    /// Direct read of a remote item, for test assertions.
    #[must_use]
    pub fn item(&self, id: &ItemId) -> Option<&Item> {
        self.items.get(id.as_str())
    }

    /// Seed an entity directly, bypassing `apply` (models state written
    /// by another device).
    pub fn seed_item(&mut self, item: Item) {
        self.items.insert(item.id.to_string(), item);
    }

    /// Seed a transaction directly, bypassing `apply`.
    pub fn seed_transaction(&mut self, tx: Transaction) {
        self.transactions.insert(tx.id.to_string(), tx);
    }

    /// Broadcast a push change to open channels, as another device's
    /// mutation would.
    pub fn emit_push(&mut self, change: PushChange, at_us: u64) {
        self.broadcast(
            change.collection(),
            PushMessage {
                status: ChannelStatus::Subscribed,
                change: Some(change),
                at_us,
            },
        );
    }

    /// Broadcast a bare channel status (e.g. `CHANNEL_ERROR`).
    pub fn emit_status(&mut self, collection: Collection, status: ChannelStatus, at_us: u64) {
        self.broadcast(
            collection,
            PushMessage {
                status,
                change: None,
                at_us,
            },
        );
    }

    fn broadcast(&mut self, collection: Collection, message: PushMessage) {
        if let Some(senders) = self.subscribers.get_mut(&collection) {
            // Closed or full channels drop out silently.
            senders.retain(|sender| sender.try_send(message.clone()).is_ok());
        }
    }

    fn item_or_not_found(&self, id: &ItemId) -> Result<Item, RemoteError> {
        self.items
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    fn cache_in_transaction(&mut self, tx_id: &TransactionId, item_id: &ItemId) {
        if let Some(tx) = self.transactions.get_mut(tx_id.as_str()) {
            if !tx.item_ids.contains(item_id) {
                tx.item_ids.push(item_id.clone());
            }
        }
    }

    fn uncache_from_transaction(&mut self, tx_id: &TransactionId, item_id: &ItemId) {
        if let Some(tx) = self.transactions.get_mut(tx_id.as_str()) {
            tx.item_ids.retain(|id| id != item_id);
        }
    }

    fn store_item(&mut self, item: Item, now_us: u64) {
        self.items.insert(item.id.to_string(), item.clone());
        self.emit_push(PushChange::UpsertItem(item), now_us);
    }
}

fn base_mismatch(
    entity_id: &ItemId,
    field: &str,
    expected: Option<&str>,
    actual: Option<&str>,
) -> RemoteError {
    RemoteError::Conflict(ConflictDetails {
        entity_id: entity_id.to_string(),
        field: field.to_string(),
        expected: expected.map(str::to_string),
        actual: actual.map(str::to_string),
    })
}

impl RemoteStore for MemoryRemote {
    fn apply(
        &mut self,
        op: &Operation,
        idempotency_key: &str,
        now_us: u64,
    ) -> Result<Applied, RemoteError> {
        self.apply_calls += 1;

        if let Some(fault) = self.scripted_faults.pop_front() {
            return Err(fault);
        }
        if self.seen_keys.contains(idempotency_key) {
            return Ok(Applied::DuplicateReplay);
        }

        match op {
            Operation::CreateItem { item } | Operation::UpdateItem { item } => {
                if let Some(tx_id) = &item.transaction_id {
                    self.cache_in_transaction(tx_id, &item.id);
                }
                self.store_item(item.clone(), now_us);
            }
            Operation::DeleteItem { item_id } => {
                if let Some(removed) = self.items.remove(item_id.as_str()) {
                    if let Some(tx_id) = &removed.transaction_id {
                        self.uncache_from_transaction(&tx_id.clone(), item_id);
                    }
                }
                self.emit_push(PushChange::RemoveItem(item_id.clone()), now_us);
            }
            Operation::CreateTransaction { transaction }
            | Operation::UpdateTransaction { transaction } => {
                self.transactions
                    .insert(transaction.id.to_string(), transaction.clone());
                self.emit_push(PushChange::UpsertTransaction(transaction.clone()), now_us);
            }
            Operation::DeleteTransaction { transaction_id } => {
                self.transactions.remove(transaction_id.as_str());
                self.emit_push(PushChange::RemoveTransaction(transaction_id.clone()), now_us);
            }
            Operation::ReassignItem {
                item_id,
                previous_transaction_id,
                to_transaction_id,
            } => {
                let mut item = self.item_or_not_found(item_id)?;
                if item.transaction_id.as_ref() != previous_transaction_id.as_ref() {
                    return Err(base_mismatch(
                        item_id,
                        "transaction_id",
                        previous_transaction_id.as_ref().map(TransactionId::as_str),
                        item.transaction_id.as_ref().map(TransactionId::as_str),
                    ));
                }
                if let Some(old) = item.transaction_id.take() {
                    self.uncache_from_transaction(&old, item_id);
                }
                item.transaction_id = Some(to_transaction_id.clone());
                item.latest_transaction_id = Some(to_transaction_id.clone());
                item.last_updated_us = now_us;
                self.cache_in_transaction(to_transaction_id, item_id);
                self.store_item(item, now_us);
            }
            Operation::AllocateItem {
                item_id,
                to_project_id,
            } => {
                let mut item = self.item_or_not_found(item_id)?;
                if let Some(current) = &item.project_id {
                    return Err(base_mismatch(
                        item_id,
                        "project_id",
                        None,
                        Some(current.as_str()),
                    ));
                }
                item.project_id = Some(to_project_id.clone());
                item.last_updated_us = now_us;
                self.store_item(item, now_us);
            }
            Operation::DeallocateItem {
                item_id,
                previous_project_id,
            } => {
                let mut item = self.item_or_not_found(item_id)?;
                if item.project_id.as_ref() != previous_project_id.as_ref() {
                    return Err(base_mismatch(
                        item_id,
                        "project_id",
                        previous_project_id.as_ref().map(ProjectId::as_str),
                        item.project_id.as_ref().map(ProjectId::as_str),
                    ));
                }
                item.previous_project_id = item.project_id.take();
                item.last_updated_us = now_us;
                self.store_item(item, now_us);
            }
            Operation::SellItem {
                item_id,
                previous_project_id,
                sale_transaction_id,
            } => {
                let mut item = self.item_or_not_found(item_id)?;
                if item.project_id.as_ref() != previous_project_id.as_ref() {
                    return Err(base_mismatch(
                        item_id,
                        "project_id",
                        previous_project_id.as_ref().map(ProjectId::as_str),
                        item.project_id.as_ref().map(ProjectId::as_str),
                    ));
                }
                item.previous_project_transaction_id = item.transaction_id.clone();
                item.previous_project_id = item.project_id.take();
                if let Some(old_tx) = item.transaction_id.take() {
                    self.uncache_from_transaction(&old_tx, item_id);
                }
                item.transaction_id = Some(sale_transaction_id.clone());
                item.latest_transaction_id = Some(sale_transaction_id.clone());
                item.last_updated_us = now_us;
                self.cache_in_transaction(sale_transaction_id, item_id);
                self.store_item(item, now_us);
            }
        }

        self.seen_keys.insert(idempotency_key.to_string());
        Ok(Applied::Fresh)
    }

    fn fetch_items(&self, _scope: &ScopeId) -> Result<Vec<Item>, RemoteError> {
        Ok(self.items.values().cloned().collect())
    }

    fn fetch_transactions(&self, _scope: &ScopeId) -> Result<Vec<Transaction>, RemoteError> {
        Ok(self.transactions.values().cloned().collect())
    }

    fn get_item(&self, id: &ItemId) -> Result<Option<Item>, RemoteError> {
        Ok(self.items.get(id.as_str()).cloned())
    }

    fn append_edge(&mut self, edge: &LineageEdge) -> Result<(), RemoteError> {
        if let Some(fault) = self.scripted_faults.pop_front() {
            return Err(fault);
        }
        self.edges
            .entry(edge.edge_hash.clone())
            .or_insert_with(|| edge.clone());
        Ok(())
    }

    fn subscribe(
        &mut self,
        collection: Collection,
        _scope: &ScopeId,
    ) -> Result<Subscription, RemoteError> {
        let (sender, receiver) = sync_channel(PUSH_CHANNEL_CAPACITY);
        self.next_subscription_id += 1;
        let id = self.next_subscription_id;
        self.subscribers.entry(collection).or_default().push(sender);
        Ok(Subscription::new(id, collection, receiver))
    }
}

// ---------------------------------------------------------------------------
// TogglePresence
// ---------------------------------------------------------------------------

/// Scriptable network presence: tests flip it between online and
/// offline mid-scenario.
#[derive(Debug)]
pub struct TogglePresence {
    online: Cell<bool>,
}

impl TogglePresence {
    #[must_use]
    pub const fn new(online: bool) -> Self {
        Self {
            online: Cell::new(online),
        }
    }

    /// Shared handle usable from both the test and the component under
    /// test.
    #[must_use]
    pub fn shared(online: bool) -> Rc<Self> {
        Rc::new(Self::new(online))
    }

    pub fn set_online(&self, online: bool) {
        self.online.set(online);
    }
}

impl NetworkPresence for TogglePresence {
    fn is_online(&self) -> bool {
        self.online.get()
    }
}
