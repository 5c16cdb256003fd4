//! Durable queue entries and the operations they carry.
//!
//! Every mutation is recorded as an idempotent, retryable unit of
//! work. The idempotency key is a BLAKE3 hash (`blake3:<hex>`) over
//! the entry id plus the canonical JSON of the operation, so a drain
//! attempt that succeeded remotely but died before the local ack can
//! be replayed as a no-op.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::model::{Item, ItemId, ProjectId, ScopeId, Transaction, TransactionId};

/// A domain mutation routed through the operation queue.
///
/// Reassign/allocate/sell variants carry the asserted previous
/// container pointer; the remote rejects them with `Conflict` when its
/// current value differs (optimistic-concurrency base check).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Operation {
    CreateItem {
        item: Item,
    },
    UpdateItem {
        item: Item,
    },
    DeleteItem {
        item_id: ItemId,
    },
    CreateTransaction {
        transaction: Transaction,
    },
    UpdateTransaction {
        transaction: Transaction,
    },
    DeleteTransaction {
        transaction_id: TransactionId,
    },
    /// Move an item between transactions.
    ReassignItem {
        item_id: ItemId,
        previous_transaction_id: Option<TransactionId>,
        to_transaction_id: TransactionId,
    },
    /// Move an item from the business-inventory pool into a project.
    AllocateItem {
        item_id: ItemId,
        to_project_id: ProjectId,
    },
    /// Return an item from a project to the business-inventory pool.
    DeallocateItem {
        item_id: ItemId,
        previous_project_id: Option<ProjectId>,
    },
    /// Sell an item out of a project under a sale transaction.
    SellItem {
        item_id: ItemId,
        previous_project_id: Option<ProjectId>,
        sale_transaction_id: TransactionId,
    },
}

impl Operation {
    /// The single entity this operation targets, for per-entity FIFO
    /// ordering during drain.
    #[must_use]
    pub fn entity_id(&self) -> String {
        match self {
            Self::CreateItem { item } | Self::UpdateItem { item } => item.id.to_string(),
            Self::DeleteItem { item_id }
            | Self::ReassignItem { item_id, .. }
            | Self::AllocateItem { item_id, .. }
            | Self::DeallocateItem { item_id, .. }
            | Self::SellItem { item_id, .. } => item_id.to_string(),
            Self::CreateTransaction { transaction } | Self::UpdateTransaction { transaction } => {
                transaction.id.to_string()
            }
            Self::DeleteTransaction { transaction_id } => transaction_id.to_string(),
        }
    }

    /// Short kind tag for logs and error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CreateItem { .. } => "create-item",
            Self::UpdateItem { .. } => "update-item",
            Self::DeleteItem { .. } => "delete-item",
            Self::CreateTransaction { .. } => "create-transaction",
            Self::UpdateTransaction { .. } => "update-transaction",
            Self::DeleteTransaction { .. } => "delete-transaction",
            Self::ReassignItem { .. } => "reassign-item",
            Self::AllocateItem { .. } => "allocate-item",
            Self::DeallocateItem { .. } => "deallocate-item",
            Self::SellItem { .. } => "sell-item",
        }
    }
}

/// Queue entry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueStatus {
    Pending,
    InFlight,
    FailedPermanently,
}

impl QueueStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in-flight",
            Self::FailedPermanently => "failed-permanently",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a queue status from a store row.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid queue status: '{0}'")]
pub struct ParseStatusError(pub String);

impl FromStr for QueueStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in-flight" => Ok(Self::InFlight),
            "failed-permanently" => Ok(Self::FailedPermanently),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

/// A pending mutation persisted in the durable local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub entry_id: String,
    pub scope: ScopeId,
    pub entity_id: String,
    pub idempotency_key: String,
    pub operation: Operation,
    pub status: QueueStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub enqueued_at_us: u64,
}

impl QueueEntry {
    /// Build a fresh pending entry for `operation`.
    pub fn new(
        scope: &ScopeId,
        operation: Operation,
        now_us: u64,
        nonce: u64,
    ) -> Result<Self, serde_json::Error> {
        let entity_id = operation.entity_id();
        let entry_id = format!("op-{}", &entry_tail(scope, &entity_id, now_us, nonce));
        let idempotency_key = idempotency_key(&entry_id, &operation)?;
        Ok(Self {
            entry_id,
            scope: scope.clone(),
            entity_id,
            idempotency_key,
            operation,
            status: QueueStatus::Pending,
            retry_count: 0,
            last_error: None,
            enqueued_at_us: now_us,
        })
    }
}

/// Compute the client-generated idempotency key for an operation.
///
/// The key covers the entry id, so re-submitting the same logical
/// mutation as a *new* entry gets a new key, while replaying a durable
/// entry reuses its key exactly.
pub fn idempotency_key(entry_id: &str, operation: &Operation) -> Result<String, serde_json::Error> {
    let payload = serde_json::to_string(operation)?;
    let hash = blake3::hash(format!("{entry_id}\t{payload}").as_bytes());
    Ok(format!("blake3:{hash}"))
}

fn entry_tail(scope: &ScopeId, entity_id: &str, now_us: u64, nonce: u64) -> String {
    let hash = blake3::hash(format!("{scope}\t{entity_id}\t{now_us}\t{nonce}").as_bytes());
    hash.to_hex().as_str()[..12].to_string()
}
