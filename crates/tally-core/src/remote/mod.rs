//! Remote store and network-presence seams.
//!
//! The sync core is generic over the backend: any type implementing
//! [`RemoteStore`] can serve as the authoritative store (HTTP API,
//! gRPC, a test double). Push delivery is modeled as an explicit
//! [`Subscription`] handle over a bounded channel — the component that
//! opened a subscription owns it and closes it — rather than callback
//! injection with manual re-registration.

pub mod memory;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::mpsc::{Receiver, TryRecvError};

use crate::error::{ConflictDetails, SyncError};
use crate::lineage::LineageEdge;
use crate::model::{Item, ItemId, ScopeId, Transaction};
use crate::queue::entry::Operation;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Typed errors from the remote store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// No connectivity or connection reset mid-call. Retryable.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// The call timed out. Retryable.
    #[error("remote call timed out: {0}")]
    Timeout(String),

    /// Business rule violation. Never retried.
    #[error("remote rejected: {0}")]
    Rejected(String),

    /// Server state diverged from the asserted base. Never retried.
    #[error("conflict: {0}")]
    Conflict(ConflictDetails),

    /// Target entity does not exist remotely.
    #[error("not found: {0}")]
    NotFound(String),
}

impl RemoteError {
    /// Returns `true` when a drain attempt may retry this failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unavailable(msg) | RemoteError::Timeout(msg) => {
                Self::NetworkUnavailable(msg)
            }
            RemoteError::Rejected(msg) => Self::RemoteRejected(msg),
            RemoteError::Conflict(details) => Self::Conflict(details),
            RemoteError::NotFound(id) => Self::ItemNotFound(id),
        }
    }
}

// ---------------------------------------------------------------------------
// Collections and push events
// ---------------------------------------------------------------------------

/// The collections tracked by the reconciliation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Items,
    Transactions,
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Items => "items",
            Self::Transactions => "transactions",
        })
    }
}

/// Lifecycle statuses delivered on a push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Subscribed,
    ChannelError,
    TimedOut,
    Closed,
}

/// A single entity change delivered by push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushChange {
    UpsertItem(Item),
    UpsertTransaction(Transaction),
    RemoveItem(ItemId),
    RemoveTransaction(crate::model::TransactionId),
}

impl PushChange {
    /// Collection this change belongs to.
    #[must_use]
    pub const fn collection(&self) -> Collection {
        match self {
            Self::UpsertItem(_) | Self::RemoveItem(_) => Collection::Items,
            Self::UpsertTransaction(_) | Self::RemoveTransaction(_) => Collection::Transactions,
        }
    }

    /// Id of the affected entity.
    #[must_use]
    pub fn entity_id(&self) -> String {
        match self {
            Self::UpsertItem(item) => item.id.to_string(),
            Self::RemoveItem(id) => id.to_string(),
            Self::UpsertTransaction(tx) => tx.id.to_string(),
            Self::RemoveTransaction(id) => id.to_string(),
        }
    }
}

/// Message delivered on a push channel: a status, optionally carrying
/// an entity change (statuses like `CLOSED` carry none).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub status: ChannelStatus,
    pub change: Option<PushChange>,
    /// Server-side wall clock of the change, in µs.
    pub at_us: u64,
}

// ---------------------------------------------------------------------------
// Subscription handle
// ---------------------------------------------------------------------------

/// Owned handle to one push channel.
///
/// `close` is idempotent; dropping the handle closes it too. One
/// subscription exists per collection per active scope.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    collection: Collection,
    receiver: Option<Receiver<PushMessage>>,
}

impl Subscription {
    /// Wrap a channel receiver. Called by `RemoteStore` impls.
    #[must_use]
    pub const fn new(id: u64, collection: Collection, receiver: Receiver<PushMessage>) -> Self {
        Self {
            id,
            collection,
            receiver: Some(receiver),
        }
    }

    /// Channel identifier assigned by the remote.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Collection this channel tracks.
    #[must_use]
    pub const fn collection(&self) -> Collection {
        self.collection
    }

    /// Drain one queued message without blocking.
    pub fn try_recv(&mut self) -> Option<PushMessage> {
        let receiver = self.receiver.as_ref()?;
        match receiver.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Tear the channel down. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.receiver = None;
    }

    /// `true` once the channel has been closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }
}

// ---------------------------------------------------------------------------
// RemoteStore / NetworkPresence traits
// ---------------------------------------------------------------------------

/// Result of a successful `apply` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The mutation was applied fresh.
    Fresh,
    /// The idempotency key was seen before; the replay was a no-op.
    DuplicateReplay,
}

/// The authoritative remote store.
pub trait RemoteStore {
    /// Apply one operation. Replays of a seen `idempotency_key` must
    /// return `Applied::DuplicateReplay` without re-mutating.
    fn apply(
        &mut self,
        op: &Operation,
        idempotency_key: &str,
        now_us: u64,
    ) -> Result<Applied, RemoteError>;

    /// Fetch every live item in a scope.
    fn fetch_items(&self, scope: &ScopeId) -> Result<Vec<Item>, RemoteError>;

    /// Fetch every live transaction in a scope.
    fn fetch_transactions(&self, scope: &ScopeId) -> Result<Vec<Transaction>, RemoteError>;

    /// Fetch a single item.
    fn get_item(&self, id: &ItemId) -> Result<Option<Item>, RemoteError>;

    /// Append a lineage edge to the remote ledger. Appends of an
    /// already-seen edge hash are no-op successes.
    fn append_edge(&mut self, edge: &LineageEdge) -> Result<(), RemoteError>;

    /// Open a push channel for `collection` within `scope`.
    fn subscribe(
        &mut self,
        collection: Collection,
        scope: &ScopeId,
    ) -> Result<Subscription, RemoteError>;
}

/// Synchronous network-presence snapshot.
pub trait NetworkPresence {
    /// `true` when the network is believed reachable right now.
    fn is_online(&self) -> bool;
}

impl<T: NetworkPresence + ?Sized> NetworkPresence for std::rc::Rc<T> {
    fn is_online(&self) -> bool {
        (**self).is_online()
    }
}
