//! tally-core: the offline-first sync core for the tally inventory
//! tracker.
//!
//! Everything here is synchronous and deterministic: callers pass the
//! current wall clock (`now_us`, microseconds) explicitly, the remote
//! backend and network presence are trait seams, and all durable state
//! lives in one sqlite store under `.tally/`.
//!
//! The pieces, bottom up:
//! - [`store`]: the durable local store (snapshots, queue, ledger,
//!   media cache, review entries)
//! - [`queue`]: the operation queue — online fast path, offline
//!   persistence, reconnect drain
//! - [`lineage`]: the append-only item-lineage ledger
//! - [`realtime`]: fetch/push reconciliation with staleness guards
//! - [`review`]: conflict policy and the review batcher
//! - [`orchestrator`]: the single entry point wiring it all together
//!
//! # Conventions
//!
//! - **Errors**: typed [`error::SyncError`] in the core; `anyhow` at
//!   binary edges.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `debug!`).

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod lineage;
pub mod lock;
pub mod model;
pub mod orchestrator;
pub mod queue;
pub mod realtime;
pub mod remote;
pub mod review;
pub mod store;

pub use error::{ConflictDetails, ErrorCode, PartialCompletion, SyncError};
pub use orchestrator::{Orchestrator, SyncEvent};
