//! Realtime view of remote state: snapshots, push subscriptions, and
//! the reconciler that keeps fetch and push from fighting each other.

pub mod reconcile;
pub mod snapshot;

pub use reconcile::{Reconciler, RefreshTicket};
pub use snapshot::{CollectionPhase, RealtimeSnapshot, Telemetry};
