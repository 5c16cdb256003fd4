//! Durable operation queue: online fast path, offline persistence,
//! and the reconnect drain loop.
//!
//! Every mutation flows through [`OperationQueue::enqueue`]. Online,
//! the operation applies to the remote immediately and its local side
//! effects land in the same call; offline (or behind older pending
//! work for the same entity), the entry persists durably and waits for
//! [`OperationQueue::drain`].
//!
//! Drain preserves global FIFO order, with one relaxation: a failing
//! entity blocks only its own later entries, never the whole queue.
//! Operations on unrelated entities keep draining past it.

pub mod entry;

use std::collections::HashSet;

use crate::config::SyncConfig;
use crate::error::{ConflictDetails, SyncError};
use crate::lineage::{edge_for, record_edge};
use crate::model::{Item, ItemId, ProjectId, ScopeId, TransactionId};
use crate::remote::{Applied, NetworkPresence, RemoteError, RemoteStore};
use crate::review::{ConflictPolicy, ConflictResolution, ReviewBatcher};
use crate::store::LocalStore;

use entry::{Operation, QueueEntry};

// ---------------------------------------------------------------------------
// Receipts and reports
// ---------------------------------------------------------------------------

/// How an enqueued operation was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Applied to the remote within the enqueue call.
    Online,
    /// Persisted durably; will apply on the next drain.
    Offline,
}

/// Receipt returned by a successful enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueReceipt {
    pub entry_id: String,
    pub mode: DeliveryMode,
}

/// An entry retired from the active queue without succeeding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub entry_id: String,
    pub entity_id: String,
    pub error: String,
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries confirmed applied (including duplicate replays).
    pub drained: u32,
    /// Subset of `drained` the remote deduped by idempotency key.
    pub replayed: u32,
    /// Entries skipped because an earlier entry for the same entity
    /// failed in this pass.
    pub skipped_blocked: u32,
    /// Entries that hit a transient failure and stay pending.
    pub still_pending: u32,
    /// Entries retired at the retry ceiling or on non-retryable errors.
    pub failed: Vec<FailedEntry>,
    /// Conflicts routed to manual review in this pass.
    pub conflicts: Vec<ConflictDetails>,
    /// Pending depth after the pass.
    pub remaining: u64,
}

// ---------------------------------------------------------------------------
// OperationQueue
// ---------------------------------------------------------------------------

/// The durable operation queue for one scope.
pub struct OperationQueue {
    scope: ScopeId,
    retry_ceiling: u32,
    authenticated: bool,
    nonce: u64,
}

impl OperationQueue {
    #[must_use]
    pub const fn new(scope: ScopeId, config: &SyncConfig) -> Self {
        Self {
            scope,
            retry_ceiling: config.retry_ceiling,
            authenticated: false,
            nonce: 0,
        }
    }

    /// Record whether an identity context exists. Offline writes are
    /// rejected up front without one — queueing work that can never
    /// drain would be silent data loss.
    pub fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }

    #[must_use]
    pub const fn scope(&self) -> &ScopeId {
        &self.scope
    }

    /// Submit a mutation.
    ///
    /// Online, the remote apply and local side effects happen here and
    /// the receipt says `Online`. Offline — or when older pending work
    /// targets the same entity — the entry persists and the receipt
    /// says `Offline`. Conflicts and rejections from the online path
    /// propagate to the caller and are never queued.
    pub fn enqueue<R: RemoteStore, P: NetworkPresence>(
        &mut self,
        store: &LocalStore,
        remote: &mut R,
        presence: &P,
        op: Operation,
        now_us: u64,
    ) -> Result<EnqueueReceipt, SyncError> {
        if !self.authenticated {
            return Err(SyncError::NotAuthenticated);
        }

        self.nonce += 1;
        let queue_entry = QueueEntry::new(&self.scope, op, now_us, self.nonce)?;

        let must_queue_behind =
            store.has_pending_for_entity(&self.scope, &queue_entry.entity_id)?;
        if !presence.is_online() || must_queue_behind {
            store.insert_queue_entry(&queue_entry)?;
            tracing::info!(
                entry_id = %queue_entry.entry_id,
                entity_id = %queue_entry.entity_id,
                kind = queue_entry.operation.kind(),
                behind_pending = must_queue_behind,
                "operation queued for later drain"
            );
            return Ok(EnqueueReceipt {
                entry_id: queue_entry.entry_id,
                mode: DeliveryMode::Offline,
            });
        }

        match remote.apply(&queue_entry.operation, &queue_entry.idempotency_key, now_us) {
            Ok(_) => {
                apply_local_effects(store, remote, &self.scope, &queue_entry.operation, now_us)?;
                tracing::debug!(
                    entry_id = %queue_entry.entry_id,
                    kind = queue_entry.operation.kind(),
                    "operation applied online"
                );
                Ok(EnqueueReceipt {
                    entry_id: queue_entry.entry_id,
                    mode: DeliveryMode::Online,
                })
            }
            Err(err) if err.is_retryable() => {
                store.insert_queue_entry(&queue_entry)?;
                tracing::info!(
                    entry_id = %queue_entry.entry_id,
                    error = %err,
                    "online apply failed transiently; queued"
                );
                Ok(EnqueueReceipt {
                    entry_id: queue_entry.entry_id,
                    mode: DeliveryMode::Offline,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Drain pending entries in FIFO order.
    ///
    /// A failed entity blocks its own later entries for the rest of
    /// the pass; other entities keep draining. Transient failures bump
    /// the retry count until the ceiling retires the entry. Conflicts
    /// route through `policy`.
    pub fn drain<R: RemoteStore>(
        &mut self,
        store: &LocalStore,
        remote: &mut R,
        policy: &dyn ConflictPolicy,
        batcher: &mut ReviewBatcher,
        now_us: u64,
    ) -> Result<DrainReport, SyncError> {
        let pending = store.pending_entries(&self.scope)?;
        let mut report = DrainReport::default();
        let mut blocked: HashSet<String> = HashSet::new();

        for queue_entry in pending {
            if blocked.contains(&queue_entry.entity_id) {
                report.skipped_blocked += 1;
                continue;
            }

            match remote.apply(&queue_entry.operation, &queue_entry.idempotency_key, now_us) {
                Ok(applied) => {
                    apply_local_effects(
                        store,
                        remote,
                        &self.scope,
                        &queue_entry.operation,
                        now_us,
                    )?;
                    store.delete_queue_entry(&queue_entry.entry_id)?;
                    report.drained += 1;
                    if applied == Applied::DuplicateReplay {
                        report.replayed += 1;
                        tracing::debug!(
                            entry_id = %queue_entry.entry_id,
                            "remote deduped replay by idempotency key"
                        );
                    }
                }
                Err(err) if err.is_retryable() => {
                    let retries = queue_entry.retry_count + 1;
                    if retries >= self.retry_ceiling {
                        store.mark_failed_permanently(&queue_entry.entry_id, &err.to_string())?;
                        tracing::warn!(
                            entry_id = %queue_entry.entry_id,
                            retries,
                            error = %err,
                            "entry retired at retry ceiling"
                        );
                        report.failed.push(FailedEntry {
                            entry_id: queue_entry.entry_id.clone(),
                            entity_id: queue_entry.entity_id.clone(),
                            error: err.to_string(),
                        });
                    } else {
                        store.record_queue_failure(
                            &queue_entry.entry_id,
                            retries,
                            &err.to_string(),
                        )?;
                        report.still_pending += 1;
                    }
                    blocked.insert(queue_entry.entity_id);
                }
                Err(RemoteError::Conflict(details)) => {
                    self.resolve_conflict(
                        store, remote, policy, batcher, &queue_entry, details, now_us,
                        &mut report,
                    )?;
                    blocked.insert(queue_entry.entity_id);
                }
                Err(err) => {
                    store.mark_failed_permanently(&queue_entry.entry_id, &err.to_string())?;
                    tracing::warn!(
                        entry_id = %queue_entry.entry_id,
                        error = %err,
                        "entry retired on non-retryable error"
                    );
                    report.failed.push(FailedEntry {
                        entry_id: queue_entry.entry_id.clone(),
                        entity_id: queue_entry.entity_id.clone(),
                        error: err.to_string(),
                    });
                    blocked.insert(queue_entry.entity_id);
                }
            }
        }

        report.remaining = store.queue_depth(&self.scope)?;
        tracing::info!(
            drained = report.drained,
            replayed = report.replayed,
            failed = report.failed.len(),
            remaining = report.remaining,
            "drain pass complete"
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_conflict<R: RemoteStore>(
        &self,
        store: &LocalStore,
        remote: &mut R,
        policy: &dyn ConflictPolicy,
        batcher: &mut ReviewBatcher,
        queue_entry: &QueueEntry,
        details: ConflictDetails,
        now_us: u64,
        report: &mut DrainReport,
    ) -> Result<(), SyncError> {
        match policy.resolve(&details) {
            ConflictResolution::ManualReview => {
                batcher.record_conflict(store, &details, now_us)?;
                store.mark_failed_permanently(
                    &queue_entry.entry_id,
                    &SyncError::Conflict(details.clone()).to_string(),
                )?;
                report.failed.push(FailedEntry {
                    entry_id: queue_entry.entry_id.clone(),
                    entity_id: queue_entry.entity_id.clone(),
                    error: details.to_string(),
                });
                report.conflicts.push(details);
            }
            ConflictResolution::PreferServer => {
                // Drop the local operation; pull the server's snapshot.
                store.delete_queue_entry(&queue_entry.entry_id)?;
                let item_id = ItemId::new_unchecked(&queue_entry.entity_id);
                if let Some(server_item) = remote.get_item(&item_id)? {
                    store.put_item(&self.scope, &server_item)?;
                }
                tracing::info!(
                    entry_id = %queue_entry.entry_id,
                    "conflict resolved in the server's favor"
                );
                report.drained += 1;
            }
            ConflictResolution::PreferLocal => {
                // Rebase the asserted base onto the server's current
                // value and retry once with a fresh idempotency key.
                let rebased = rebase_operation(&queue_entry.operation, &details);
                let key = entry::idempotency_key(&queue_entry.entry_id, &rebased)?;
                match remote.apply(&rebased, &key, now_us) {
                    Ok(_) => {
                        apply_local_effects(store, remote, &self.scope, &rebased, now_us)?;
                        store.delete_queue_entry(&queue_entry.entry_id)?;
                        tracing::info!(
                            entry_id = %queue_entry.entry_id,
                            "conflict resolved in the local operation's favor"
                        );
                        report.drained += 1;
                    }
                    Err(err) => {
                        store.mark_failed_permanently(&queue_entry.entry_id, &err.to_string())?;
                        report.failed.push(FailedEntry {
                            entry_id: queue_entry.entry_id.clone(),
                            entity_id: queue_entry.entity_id.clone(),
                            error: err.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Rewrite an operation's asserted base to the server's current value.
fn rebase_operation(op: &Operation, details: &ConflictDetails) -> Operation {
    let mut rebased = op.clone();
    let actual = details.actual.as_deref();
    match &mut rebased {
        Operation::ReassignItem {
            previous_transaction_id,
            ..
        } => {
            *previous_transaction_id = actual.map(TransactionId::new_unchecked);
        }
        Operation::DeallocateItem {
            previous_project_id,
            ..
        }
        | Operation::SellItem {
            previous_project_id,
            ..
        } => {
            *previous_project_id = actual.map(ProjectId::new_unchecked);
        }
        _ => {}
    }
    rebased
}

// ---------------------------------------------------------------------------
// Shared local side effects
// ---------------------------------------------------------------------------

/// Apply an operation's local side effects after the remote confirmed
/// it: snapshot writes, transaction cache upkeep, and the lineage edge.
///
/// This is the single code path for both the online fast path and the
/// drain loop, so a drained entry produces byte-identical local state
/// to the same operation applied online.
pub(crate) fn apply_local_effects<R: RemoteStore>(
    store: &LocalStore,
    remote: &mut R,
    scope: &ScopeId,
    op: &Operation,
    now_us: u64,
) -> Result<(), SyncError> {
    let prior = prior_item(store, op)?;
    let edge = edge_for(op, prior.as_ref(), now_us);

    match op {
        Operation::CreateItem { item } | Operation::UpdateItem { item } => {
            store.put_item(scope, item)?;
            if let Some(tx_id) = &item.transaction_id {
                cache_in_transaction(store, scope, tx_id, &item.id, now_us)?;
            }
        }
        Operation::DeleteItem { item_id } => {
            if let Some(tx_id) = prior.as_ref().and_then(|i| i.transaction_id.as_ref()) {
                uncache_from_transaction(store, scope, tx_id, item_id, now_us)?;
            }
            store.delete_item(item_id, now_us)?;
        }
        Operation::CreateTransaction { transaction }
        | Operation::UpdateTransaction { transaction } => {
            store.put_transaction(scope, transaction)?;
        }
        Operation::DeleteTransaction { transaction_id } => {
            store.delete_transaction(transaction_id, now_us)?;
        }
        Operation::ReassignItem {
            item_id,
            to_transaction_id,
            ..
        } => {
            let mut item = movable_item(store, remote, item_id, prior)?;
            if let Some(old_tx) = item.transaction_id.take() {
                uncache_from_transaction(store, scope, &old_tx, item_id, now_us)?;
            }
            item.transaction_id = Some(to_transaction_id.clone());
            item.latest_transaction_id = Some(to_transaction_id.clone());
            item.last_updated_us = now_us;
            cache_in_transaction(store, scope, to_transaction_id, item_id, now_us)?;
            store.put_item(scope, &item)?;
        }
        Operation::AllocateItem {
            item_id,
            to_project_id,
        } => {
            let mut item = movable_item(store, remote, item_id, prior)?;
            item.project_id = Some(to_project_id.clone());
            item.last_updated_us = now_us;
            store.put_item(scope, &item)?;
        }
        Operation::DeallocateItem { item_id, .. } => {
            let mut item = movable_item(store, remote, item_id, prior)?;
            item.previous_project_id = item.project_id.take();
            item.last_updated_us = now_us;
            store.put_item(scope, &item)?;
        }
        Operation::SellItem {
            item_id,
            sale_transaction_id,
            ..
        } => {
            let mut item = movable_item(store, remote, item_id, prior)?;
            item.previous_project_transaction_id = item.transaction_id.clone();
            item.previous_project_id = item.project_id.take();
            if let Some(old_tx) = item.transaction_id.take() {
                uncache_from_transaction(store, scope, &old_tx, item_id, now_us)?;
            }
            item.transaction_id = Some(sale_transaction_id.clone());
            item.latest_transaction_id = Some(sale_transaction_id.clone());
            item.last_updated_us = now_us;
            cache_in_transaction(store, scope, sale_transaction_id, item_id, now_us)?;
            store.put_item(scope, &item)?;
        }
    }

    if let Some(edge) = edge {
        record_edge(store, remote, &edge)?;
    }
    Ok(())
}

fn prior_item(store: &LocalStore, op: &Operation) -> Result<Option<Item>, SyncError> {
    match op {
        Operation::DeleteItem { item_id }
        | Operation::ReassignItem { item_id, .. }
        | Operation::AllocateItem { item_id, .. }
        | Operation::DeallocateItem { item_id, .. }
        | Operation::SellItem { item_id, .. } => store.get_item(item_id),
        _ => Ok(None),
    }
}

/// Resolve the item a movement op targets: the local snapshot, or the
/// remote's copy when another device created it.
fn movable_item<R: RemoteStore>(
    store: &LocalStore,
    remote: &R,
    item_id: &ItemId,
    prior: Option<Item>,
) -> Result<Item, SyncError> {
    if let Some(item) = prior {
        return Ok(item);
    }
    if let Some(item) = store.get_item(item_id)? {
        return Ok(item);
    }
    remote
        .get_item(item_id)?
        .ok_or_else(|| SyncError::ItemNotFound(item_id.to_string()))
}

fn cache_in_transaction(
    store: &LocalStore,
    scope: &ScopeId,
    tx_id: &TransactionId,
    item_id: &ItemId,
    now_us: u64,
) -> Result<(), SyncError> {
    if let Some(mut tx) = store.get_transaction(tx_id)? {
        tx.cache_item(item_id);
        tx.last_updated_us = now_us;
        store.put_transaction(scope, &tx)?;
    }
    Ok(())
}

fn uncache_from_transaction(
    store: &LocalStore,
    scope: &ScopeId,
    tx_id: &TransactionId,
    item_id: &ItemId,
    now_us: u64,
) -> Result<(), SyncError> {
    if let Some(mut tx) = store.get_transaction(tx_id)? {
        tx.uncache_item(item_id);
        tx.last_updated_us = now_us;
        store.put_transaction(scope, &tx)?;
    }
    Ok(())
}
