//! Domain model: entity ids, items, and transactions.

pub mod ids;
pub mod item;
pub mod transaction;

pub use ids::{ItemId, ProjectId, ScopeId, TransactionId};
pub use item::{Disposition, Item, Money};
pub use transaction::{Transaction, TransactionStatus};
