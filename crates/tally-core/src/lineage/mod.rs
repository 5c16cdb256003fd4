//! Append-only item-lineage ledger.
//!
//! Every cross-container movement of an item is recorded as an
//! immutable [`LineageEdge`]. Edges are never updated or deleted:
//! "current location" is always the item's live pointer fields, and
//! the ledger exists purely for provenance queries ("what moved out of
//! transaction T"). An item moved away and back produces two edges,
//! not a merge — this is a log, not a current-state index.
//!
//! The edge hash is BLAKE3 over the canonical edge fields, which makes
//! local and remote appends idempotent under replay.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::error::{PartialCompletion, SyncError};
use crate::model::{Item, ItemId, ProjectId, Transaction, TransactionId};
use crate::queue::entry::Operation;
use crate::remote::RemoteStore;
use crate::store::LocalStore;

// ---------------------------------------------------------------------------
// Containers and move kinds
// ---------------------------------------------------------------------------

/// A place an item can live: a transaction, a project, or the
/// account-level business-inventory pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Container {
    Transaction(TransactionId),
    Project(ProjectId),
    BusinessInventory,
}

impl Container {
    /// Stable text encoding used in store columns and edge hashes.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Transaction(id) => format!("tx:{id}"),
            Self::Project(id) => format!("proj:{id}"),
            Self::BusinessInventory => "inventory".to_string(),
        }
    }

    /// Decode the text form; `None` for unrecognized input.
    #[must_use]
    pub fn decode(raw: &str) -> Option<Self> {
        if raw == "inventory" {
            return Some(Self::BusinessInventory);
        }
        if let Some(id) = raw.strip_prefix("tx:") {
            return Some(Self::Transaction(TransactionId::new_unchecked(id)));
        }
        raw.strip_prefix("proj:")
            .map(|id| Self::Project(ProjectId::new_unchecked(id)))
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// The operation type that caused a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MoveKind {
    Allocate,
    Sell,
    Deallocate,
    ReassignTransaction,
}

impl MoveKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Allocate => "allocate",
            Self::Sell => "sell",
            Self::Deallocate => "deallocate",
            Self::ReassignTransaction => "reassign-transaction",
        }
    }
}

impl fmt::Display for MoveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a move kind from a store row.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid move kind: '{0}'")]
pub struct ParseMoveKindError(pub String);

impl FromStr for MoveKind {
    type Err = ParseMoveKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allocate" => Ok(Self::Allocate),
            "sell" => Ok(Self::Sell),
            "deallocate" => Ok(Self::Deallocate),
            "reassign-transaction" => Ok(Self::ReassignTransaction),
            _ => Err(ParseMoveKindError(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// LineageEdge
// ---------------------------------------------------------------------------

/// An immutable fact: item X moved from container A to container B at
/// time T, caused by `operation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageEdge {
    pub edge_hash: String,
    pub item_id: ItemId,
    pub from: Container,
    pub to: Container,
    pub operation: MoveKind,
    pub at_us: u64,
}

impl LineageEdge {
    /// Build an edge, computing its content hash.
    #[must_use]
    pub fn new(
        item_id: ItemId,
        from: Container,
        to: Container,
        operation: MoveKind,
        at_us: u64,
    ) -> Self {
        let hash = blake3::hash(
            format!(
                "{item_id}\t{}\t{}\t{operation}\t{at_us}",
                from.encode(),
                to.encode()
            )
            .as_bytes(),
        );
        Self {
            edge_hash: format!("blake3:{hash}"),
            item_id,
            from,
            to,
            operation,
            at_us,
        }
    }
}

/// Derive the lineage edge an operation will produce, given the item's
/// state *before* the operation applies. Non-movement operations
/// produce no edge.
#[must_use]
pub fn edge_for(op: &Operation, prior: Option<&Item>, at_us: u64) -> Option<LineageEdge> {
    // Container precedence: a project placement shadows the purchase
    // transaction, which shadows the account pool. An item bought
    // under transaction A and never allocated still "sits in" A, so
    // allocating it out of A records a Transaction(A) source — that
    // edge is what lets `transaction_contents` recover pass-throughs
    // even when the item_ids cache is lost.
    let current_container = |item: Option<&Item>| -> Container {
        let Some(item) = item else {
            return Container::BusinessInventory;
        };
        if let Some(project) = item.project_id.clone() {
            return Container::Project(project);
        }
        item.transaction_id
            .clone()
            .map_or(Container::BusinessInventory, Container::Transaction)
    };

    match op {
        Operation::ReassignItem {
            item_id,
            previous_transaction_id,
            to_transaction_id,
        } => {
            let from = previous_transaction_id
                .clone()
                .or_else(|| prior.and_then(|i| i.transaction_id.clone()))
                .map_or(Container::BusinessInventory, Container::Transaction);
            Some(LineageEdge::new(
                item_id.clone(),
                from,
                Container::Transaction(to_transaction_id.clone()),
                MoveKind::ReassignTransaction,
                at_us,
            ))
        }
        Operation::AllocateItem {
            item_id,
            to_project_id,
        } => Some(LineageEdge::new(
            item_id.clone(),
            current_container(prior),
            Container::Project(to_project_id.clone()),
            MoveKind::Allocate,
            at_us,
        )),
        Operation::DeallocateItem {
            item_id,
            previous_project_id,
        } => {
            let from = previous_project_id
                .clone()
                .or_else(|| prior.and_then(|i| i.project_id.clone()))
                .map_or(Container::BusinessInventory, Container::Project);
            Some(LineageEdge::new(
                item_id.clone(),
                from,
                Container::BusinessInventory,
                MoveKind::Deallocate,
                at_us,
            ))
        }
        Operation::SellItem {
            item_id,
            previous_project_id,
            sale_transaction_id,
        } => {
            // A sale usually closes out a project, but an item can
            // sell straight out of its purchase transaction too.
            let from = previous_project_id
                .clone()
                .map_or_else(|| current_container(prior), Container::Project);
            Some(LineageEdge::new(
                item_id.clone(),
                from,
                Container::Transaction(sale_transaction_id.clone()),
                MoveKind::Sell,
                at_us,
            ))
        }
        _ => None,
    }
}

/// Append an edge locally and to the remote ledger.
///
/// The local append lands first so provenance queries work offline;
/// a remote append failure surfaces as a [`SyncError::Partial`] — the
/// causing mutation must not be considered complete.
pub fn record_edge<R: RemoteStore>(
    store: &LocalStore,
    remote: &mut R,
    edge: &LineageEdge,
) -> Result<(), SyncError> {
    store.append_edge(edge)?;
    remote.append_edge(edge).map_err(|err| {
        SyncError::Partial(PartialCompletion {
            entity_id: edge.item_id.to_string(),
            applied: "item mutation and local edge".to_string(),
            failed: format!("remote lineage append: {err}"),
        })
    })
}

/// Edges whose source container is transaction `tx_id`.
pub fn edges_from_transaction(
    store: &LocalStore,
    tx_id: &TransactionId,
) -> Result<Vec<LineageEdge>, SyncError> {
    store.edges_from_container(&Container::Transaction(tx_id.clone()))
}

/// Every edge that ever touched `item_id`, oldest first.
pub fn edges_for_item(store: &LocalStore, item_id: &ItemId) -> Result<Vec<LineageEdge>, SyncError> {
    store.edges_for_item(item_id)
}

// ---------------------------------------------------------------------------
// Transaction contents reconstruction
// ---------------------------------------------------------------------------

/// An item that passed through a transaction but moved on, with the
/// edge that took it away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovedItem {
    pub item: Item,
    pub departed_via: LineageEdge,
}

/// The reconstructed membership view of one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionContents {
    /// Items whose live pointer still names the transaction.
    pub current: Vec<Item>,
    /// Items that passed through but now live elsewhere.
    pub moved_out: Vec<MovedItem>,
}

/// Reconstruct "what is currently in transaction T" vs. "what passed
/// through here but moved on".
///
/// `tx.item_ids` is a cache, invalid by construction: it is taken as a
/// candidate list, corroborated against each item's live pointer, and
/// when empty the live-pointer index is queried directly. Items with
/// no live record are tombstoned and excluded from both partitions.
pub fn transaction_contents(
    store: &LocalStore,
    tx: &Transaction,
) -> Result<TransactionContents, SyncError> {
    let mut candidates: Vec<Item> = Vec::new();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

    if tx.item_ids.is_empty() {
        for item in store.items_by_transaction(&tx.id)? {
            seen.insert(item.id.to_string());
            candidates.push(item);
        }
    } else {
        for id in &tx.item_ids {
            if let Some(item) = store.get_item(id)? {
                seen.insert(item.id.to_string());
                candidates.push(item);
            }
            // No live record: tombstoned, excluded.
        }
    }

    let departures = edges_from_transaction(store, &tx.id)?;

    let mut contents = TransactionContents::default();
    for item in candidates {
        if item.transaction_id.as_ref() == Some(&tx.id) {
            contents.current.push(item);
        } else if let Some(edge) = departures
            .iter()
            .rev()
            .find(|edge| edge.item_id == item.id)
        {
            contents.moved_out.push(MovedItem {
                item,
                departed_via: edge.clone(),
            });
        }
    }

    // The cache can also *omit* items that departed long ago; pull the
    // remainder from the ledger so "moved out" is complete.
    for edge in departures {
        if seen.contains(edge.item_id.as_str()) {
            continue;
        }
        if let Some(item) = store.get_item(&edge.item_id)? {
            if item.transaction_id.as_ref() != Some(&tx.id) {
                seen.insert(item.id.to_string());
                contents.moved_out.push(MovedItem {
                    item,
                    departed_via: edge,
                });
            }
        }
    }

    Ok(contents)
}

/// Rebuild a transaction's `item_ids` cache from live pointers and the
/// ledger — the materialized-view repair path used by tests and store
/// recovery.
pub fn rebuild_item_ids(store: &LocalStore, tx: &mut Transaction) -> Result<(), SyncError> {
    let contents = {
        let cleared = Transaction {
            item_ids: Vec::new(),
            ..tx.clone()
        };
        transaction_contents(store, &cleared)?
    };

    tx.item_ids.clear();
    for item in &contents.current {
        tx.item_ids.push(item.id.clone());
    }
    for moved in &contents.moved_out {
        tx.item_ids.push(moved.item.id.clone());
    }
    Ok(())
}
