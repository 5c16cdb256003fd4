use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::ids::{ItemId, ProjectId, TransactionId};
use super::item::{Money, ParseEnumError};

/// Lifecycle states of a financial transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Canceled,
}

impl TransactionStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "canceled" => Ok(Self::Canceled),
            _ => Err(ParseEnumError {
                expected: "transaction status",
                got: s.to_string(),
            }),
        }
    }
}

/// A financial event: a purchase, sale, or return at a vendor.
///
/// `item_ids` is a denormalized cache of items created under or
/// currently assigned to this transaction. It is *not* the source of
/// truth for "what is currently in this transaction" — items move away
/// without a synchronous rewrite of historical records, so any
/// membership answer must corroborate with the lineage ledger (see
/// [`crate::lineage::transaction_contents`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transaction {
    pub id: TransactionId,
    pub source: String,
    pub amount: Money,
    pub sales_tax: Money,
    pub project_id: Option<ProjectId>,
    pub item_ids: Vec<ItemId>,
    pub receipt_images: Vec<String>,
    pub other_images: Vec<String>,
    pub status: TransactionStatus,
    pub date_created_us: u64,
    pub last_updated_us: u64,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            id: TransactionId::new_unchecked(""),
            source: String::new(),
            amount: Money::zero(),
            sales_tax: Money::zero(),
            project_id: None,
            item_ids: Vec::new(),
            receipt_images: Vec::new(),
            other_images: Vec::new(),
            status: TransactionStatus::Pending,
            date_created_us: 0,
            last_updated_us: 0,
        }
    }
}

impl Transaction {
    /// Add an item to the denormalized cache, keeping it duplicate-free.
    pub fn cache_item(&mut self, id: &ItemId) {
        if !self.item_ids.contains(id) {
            self.item_ids.push(id.clone());
        }
    }

    /// Drop an item from the denormalized cache.
    pub fn uncache_item(&mut self, id: &ItemId) {
        self.item_ids.retain(|cached| cached != id);
    }
}

#[cfg(test)]
mod tests {
    use super::{Transaction, TransactionStatus};
    use crate::model::ids::ItemId;
    use std::str::FromStr;

    #[test]
    fn status_roundtrips() {
        for value in [
            TransactionStatus::Pending,
            TransactionStatus::Completed,
            TransactionStatus::Canceled,
        ] {
            let rendered = value.to_string();
            assert_eq!(TransactionStatus::from_str(&rendered).expect("parse"), value);
        }
        assert!(TransactionStatus::from_str("refunded").is_err());
    }

    #[test]
    fn item_cache_is_duplicate_free() {
        let mut tx = Transaction::default();
        let id = ItemId::new_unchecked("it-a1b2c3d4");

        tx.cache_item(&id);
        tx.cache_item(&id);
        assert_eq!(tx.item_ids.len(), 1);

        tx.uncache_item(&id);
        assert!(tx.item_ids.is_empty());
    }

    #[test]
    fn serde_defaults_tolerate_sparse_json() {
        let tx: Transaction =
            serde_json::from_str(r#"{"id":"tx-00aa11bb","source":"Estate sale"}"#)
                .expect("sparse JSON should deserialize");
        assert_eq!(tx.source, "Estate sale");
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(tx.item_ids.is_empty());
    }
}
