use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::ids::{ItemId, ProjectId, TransactionId};

/// Lifecycle state describing an item's intended handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Disposition {
    ToPurchase,
    Purchased,
    ToReturn,
    Returned,
    Inventory,
}

impl Disposition {
    const fn as_str(self) -> &'static str {
        match self {
            Self::ToPurchase => "to-purchase",
            Self::Purchased => "purchased",
            Self::ToReturn => "to-return",
            Self::Returned => "returned",
            Self::Inventory => "inventory",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an enum value from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {expected}: '{got}'")]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl FromStr for Disposition {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "to-purchase" => Ok(Self::ToPurchase),
            "purchased" => Ok(Self::Purchased),
            "to-return" => Ok(Self::ToReturn),
            "returned" => Ok(Self::Returned),
            "inventory" => Ok(Self::Inventory),
            _ => Err(ParseEnumError {
                expected: "disposition",
                got: s.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// A monetary amount kept as a canonical decimal string.
///
/// Amounts never pass through floating point: parse validates the
/// shape (optional sign, digits, at most one point, at most two
/// fractional digits) and the original text is stored verbatim minus
/// surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(String);

/// Error returned for malformed money strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid money amount: '{0}'")]
pub struct ParseMoneyError(pub String);

impl Money {
    /// A zero amount.
    #[must_use]
    pub fn zero() -> Self {
        Self("0".to_string())
    }

    /// Parse and validate a decimal string.
    pub fn parse(raw: &str) -> Result<Self, ParseMoneyError> {
        let trimmed = raw.trim();
        let unsigned = trimmed.strip_prefix('-').unwrap_or(trimmed);
        let mut parts = unsigned.splitn(2, '.');
        let whole = parts.next().unwrap_or_default();
        let frac = parts.next();

        let whole_ok = !whole.is_empty() && whole.chars().all(|c| c.is_ascii_digit());
        let frac_ok = frac.is_none_or(|f| {
            !f.is_empty() && f.len() <= 2 && f.chars().all(|c| c.is_ascii_digit())
        });

        if whole_ok && frac_ok {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(ParseMoneyError(raw.to_string()))
        }
    }

    /// The canonical decimal string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Money {
    type Err = ParseMoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

/// A physical unit of inventory.
///
/// An item has at most one current transaction and at most one current
/// project at any time; `project_id == None` means the item sits in
/// the account-level business-inventory pool. Historical containers
/// are reachable only through the lineage ledger — the back-pointer
/// fields here are a convenience for the most recent hop, never a
/// history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Item {
    pub id: ItemId,
    pub description: String,
    pub purchase_price: Money,
    pub project_price: Money,
    pub market_value: Money,
    pub project_id: Option<ProjectId>,
    pub transaction_id: Option<TransactionId>,
    pub disposition: Disposition,
    pub images: Vec<String>,
    pub previous_project_id: Option<ProjectId>,
    pub previous_project_transaction_id: Option<TransactionId>,
    pub latest_transaction_id: Option<TransactionId>,
    pub date_created_us: u64,
    pub last_updated_us: u64,
}

impl Default for Item {
    fn default() -> Self {
        Self {
            id: ItemId::new_unchecked(""),
            description: String::new(),
            purchase_price: Money::zero(),
            project_price: Money::zero(),
            market_value: Money::zero(),
            project_id: None,
            transaction_id: None,
            disposition: Disposition::ToPurchase,
            images: Vec::new(),
            previous_project_id: None,
            previous_project_transaction_id: None,
            latest_transaction_id: None,
            date_created_us: 0,
            last_updated_us: 0,
        }
    }
}

impl Item {
    /// `true` when the item sits in the business-inventory pool.
    #[must_use]
    pub const fn in_business_inventory(&self) -> bool {
        self.project_id.is_none()
    }
}
