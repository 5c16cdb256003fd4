//! The in-memory realtime snapshot consumers read.

use std::collections::{BTreeMap, HashMap};

use crate::model::{Item, Transaction};
use crate::remote::{ChannelStatus, Collection};

/// Lifecycle of one tracked collection.
///
/// `Loading` keeps the previous data visible: a refresh never blanks
/// the snapshot, it swaps in the new state atomically on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionPhase {
    #[default]
    Uninitialized,
    Loading,
    Ready,
    Error,
}

/// Connection and freshness telemetry surfaced alongside the data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Telemetry {
    /// Completion time of the last successful refresh per collection.
    pub last_refreshed_us: HashMap<Collection, u64>,
    /// Open push channels.
    pub active_channels: u32,
    /// When the most recent channel drop happened, if any.
    pub last_disconnect_us: Option<u64>,
    /// Status that caused that drop.
    pub last_disconnect_status: Option<ChannelStatus>,
}

/// Live entity state plus phases and telemetry. Keyed by entity id so
/// push upserts and removals are point operations.
#[derive(Debug, Clone, Default)]
pub struct RealtimeSnapshot {
    pub items: BTreeMap<String, Item>,
    pub transactions: BTreeMap<String, Transaction>,
    pub items_phase: CollectionPhase,
    pub transactions_phase: CollectionPhase,
    pub telemetry: Telemetry,
}

impl RealtimeSnapshot {
    /// Phase of one collection.
    #[must_use]
    pub const fn phase(&self, collection: Collection) -> CollectionPhase {
        match collection {
            Collection::Items => self.items_phase,
            Collection::Transactions => self.transactions_phase,
        }
    }

    pub(crate) const fn set_phase(&mut self, collection: Collection, phase: CollectionPhase) {
        match collection {
            Collection::Items => self.items_phase = phase,
            Collection::Transactions => self.transactions_phase = phase,
        }
    }

    /// Drop all entity state and reset phases; telemetry survives.
    pub(crate) fn clear(&mut self) {
        self.items.clear();
        self.transactions.clear();
        self.items_phase = CollectionPhase::Uninitialized;
        self.transactions_phase = CollectionPhase::Uninitialized;
    }
}

#[cfg(test)]
mod tests {
    use super::{CollectionPhase, RealtimeSnapshot};
    use crate::model::Item;
    use crate::remote::Collection;

    #[test]
    fn phases_start_uninitialized() {
        let snapshot = RealtimeSnapshot::default();
        assert_eq!(snapshot.phase(Collection::Items), CollectionPhase::Uninitialized);
        assert_eq!(
            snapshot.phase(Collection::Transactions),
            CollectionPhase::Uninitialized
        );
    }

    #[test]
    fn clear_resets_data_but_keeps_telemetry() {
        let mut snapshot = RealtimeSnapshot::default();
        snapshot.items.insert("it-a".into(), Item::default());
        snapshot.items_phase = CollectionPhase::Ready;
        snapshot.telemetry.active_channels = 2;

        snapshot.clear();
        assert!(snapshot.items.is_empty());
        assert_eq!(snapshot.items_phase, CollectionPhase::Uninitialized);
        assert_eq!(snapshot.telemetry.active_channels, 2);
    }
}
