//! Conflict resolution policy and the review batcher.
//!
//! When the remote rejects an operation because its base assertion no
//! longer holds, a [`ConflictPolicy`] decides what happens. The default
//! policy routes everything to manual review: a durable review entry
//! the user resolves later. Bulk edits go through the
//! [`ReviewBatcher`], which coalesces per-field changes so a hundred
//! touched fields surface as one reviewable unit instead of a hundred.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::{fmt, str::FromStr};

use crate::error::{ConflictDetails, SyncError};
use crate::model::ScopeId;
use crate::store::LocalStore;

// ---------------------------------------------------------------------------
// Conflict policy
// ---------------------------------------------------------------------------

/// What to do with a detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Persist a review entry; the operation stays failed.
    ManualReview,
    /// Accept the server's value and drop the local operation.
    PreferServer,
    /// Re-submit the local operation against the server's current base.
    PreferLocal,
}

/// Pluggable conflict-resolution strategy.
pub trait ConflictPolicy {
    fn resolve(&self, details: &ConflictDetails) -> ConflictResolution;
}

/// Default policy: every conflict goes to manual review. Automatic
/// merging of diverged business records is someone else's judgment
/// call, not the sync layer's.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysManual;

impl ConflictPolicy for AlwaysManual {
    fn resolve(&self, _details: &ConflictDetails) -> ConflictResolution {
        ConflictResolution::ManualReview
    }
}

// ---------------------------------------------------------------------------
// Review entries
// ---------------------------------------------------------------------------

/// What kind of review a persisted entry asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewKind {
    Conflict,
    FieldChanges,
}

impl ReviewKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Conflict => "conflict",
            Self::FieldChanges => "field-changes",
        }
    }
}

impl fmt::Display for ReviewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a review kind from a store row.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid review kind: '{0}'")]
pub struct ParseReviewKindError(pub String);

impl FromStr for ReviewKind {
    type Err = ParseReviewKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conflict" => Ok(Self::Conflict),
            "field-changes" => Ok(Self::FieldChanges),
            _ => Err(ParseReviewKindError(s.to_string())),
        }
    }
}

/// A durable unit of work awaiting user judgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewEntry {
    pub review_id: String,
    pub scope: ScopeId,
    pub kind: ReviewKind,
    pub detail: serde_json::Value,
    pub created_at_us: u64,
}

/// One coalesced field edit inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub entity_id: String,
    pub field: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

// ---------------------------------------------------------------------------
// ReviewBatcher
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct OpenBatch {
    changes: Vec<FieldChange>,
    // (entity_id, field) -> index into `changes`
    index: HashMap<(String, String), usize>,
}

impl OpenBatch {
    fn coalesce(&mut self, change: FieldChange) {
        let key = (change.entity_id.clone(), change.field.clone());
        if let Some(&at) = self.index.get(&key) {
            // First old value wins, last new value wins.
            self.changes[at].new = change.new;
        } else {
            self.index.insert(key, self.changes.len());
            self.changes.push(change);
        }
    }
}

/// Batches field changes into durable review entries.
///
/// Without an open batch, every recorded change flushes immediately as
/// its own entry. Inside a batch, changes to the same entity and field
/// coalesce (first old value, last new value) and flush as one entry.
#[derive(Debug)]
pub struct ReviewBatcher {
    scope: ScopeId,
    open: Option<OpenBatch>,
    nonce: u64,
}

impl ReviewBatcher {
    #[must_use]
    pub const fn new(scope: ScopeId) -> Self {
        Self {
            scope,
            open: None,
            nonce: 0,
        }
    }

    /// `true` while a batch is collecting changes.
    #[must_use]
    pub const fn batch_open(&self) -> bool {
        self.open.is_some()
    }

    /// Start collecting changes. Re-opening an already open batch keeps
    /// the collected changes.
    pub fn begin_batch(&mut self) {
        if self.open.is_none() {
            self.open = Some(OpenBatch::default());
        }
    }

    /// Record one field change. Outside a batch this persists
    /// immediately; inside one it coalesces until flush.
    pub fn record_change(
        &mut self,
        store: &LocalStore,
        change: FieldChange,
        now_us: u64,
    ) -> Result<(), SyncError> {
        if let Some(batch) = self.open.as_mut() {
            batch.coalesce(change);
            return Ok(());
        }
        let detail = serde_json::json!({ "changes": [change] });
        self.persist(store, ReviewKind::FieldChanges, detail, now_us)?;
        Ok(())
    }

    /// Close the open batch and persist it as one entry. Returns the
    /// review id, or `None` when the batch was empty or never opened.
    pub fn flush_batch(
        &mut self,
        store: &LocalStore,
        now_us: u64,
    ) -> Result<Option<String>, SyncError> {
        let Some(batch) = self.open.take() else {
            return Ok(None);
        };
        if batch.changes.is_empty() {
            return Ok(None);
        }
        let detail = serde_json::json!({ "changes": batch.changes });
        let review_id = self.persist(store, ReviewKind::FieldChanges, detail, now_us)?;
        Ok(Some(review_id))
    }

    /// Persist a conflict for manual review. Conflicts never batch;
    /// each one is individually actionable.
    pub fn record_conflict(
        &mut self,
        store: &LocalStore,
        details: &ConflictDetails,
        now_us: u64,
    ) -> Result<String, SyncError> {
        let detail = serde_json::to_value(details)?;
        self.persist(store, ReviewKind::Conflict, detail, now_us)
    }

    fn persist(
        &mut self,
        store: &LocalStore,
        kind: ReviewKind,
        detail: serde_json::Value,
        now_us: u64,
    ) -> Result<String, SyncError> {
        self.nonce += 1;
        let hash = blake3::hash(format!("{}\t{now_us}\t{}", self.scope, self.nonce).as_bytes());
        let review_id = format!("rv-{}", &hash.to_hex().as_str()[..12]);
        let entry = ReviewEntry {
            review_id: review_id.clone(),
            scope: self.scope.clone(),
            kind,
            detail,
            created_at_us: now_us,
        };
        store.insert_review_entry(&entry)?;
        tracing::debug!(%review_id, kind = %entry.kind, "review entry persisted");
        Ok(review_id)
    }
}
