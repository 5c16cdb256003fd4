//! Prefix-validated entity id newtypes.
//!
//! Ids are client-generated so an item created offline keeps the same
//! id once the queued create drains to the remote store. The tail is
//! the first 8 hex chars of a BLAKE3 hash over (agent, wall-clock µs,
//! nonce), which keeps ids short, stable, and collision-resistant at
//! local scale.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when parsing an id with the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {expected} id: '{got}'")]
pub struct ParseIdError {
    pub expected: &'static str,
    pub got: String,
}

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal, $label:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Id prefix, including the trailing dash.
            pub const PREFIX: &'static str = $prefix;

            /// Wrap a string without validation. For trusted inputs
            /// (store rows, test fixtures) only.
            #[must_use]
            pub fn new_unchecked(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Generate a fresh client-side id.
            #[must_use]
            pub fn generate(agent: &str, now_us: u64, nonce: u64) -> Self {
                let hash = blake3::hash(
                    format!("{}\t{agent}\t{now_us}\t{nonce}", $prefix).as_bytes(),
                );
                let hex = hash.to_hex();
                Self(format!("{}{}", $prefix, &hex.as_str()[..8]))
            }

            /// The id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let tail = s.strip_prefix($prefix).ok_or_else(|| ParseIdError {
                    expected: $label,
                    got: s.to_string(),
                })?;
                if tail.is_empty() || !tail.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(ParseIdError {
                        expected: $label,
                        got: s.to_string(),
                    });
                }
                Ok(Self(s.to_string()))
            }
        }
    };
}

entity_id!(
    /// Identifier of an inventory item (`it-` prefix).
    ItemId,
    "it-",
    "item"
);

entity_id!(
    /// Identifier of a financial transaction (`tx-` prefix).
    TransactionId,
    "tx-",
    "transaction"
);

entity_id!(
    /// Identifier of a project (`pj-` prefix).
    ProjectId,
    "pj-",
    "project"
);

/// The active account scope. Scopes partition every cache and
/// subscription; there is no cross-scope data flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(String);

impl ScopeId {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{ItemId, ProjectId, TransactionId};
    use std::str::FromStr;

    #[test]
    fn generated_ids_carry_prefix() {
        let id = ItemId::generate("alice", 1_700_000_000_000_000, 0);
        assert!(id.as_str().starts_with("it-"));
        assert_eq!(id.as_str().len(), "it-".len() + 8);
    }

    #[test]
    fn generation_is_deterministic_per_inputs() {
        let a = TransactionId::generate("alice", 42, 7);
        let b = TransactionId::generate("alice", 42, 7);
        let c = TransactionId::generate("alice", 42, 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn parse_enforces_prefix() {
        assert!(ItemId::from_str("it-a1b2c3d4").is_ok());
        assert!(ItemId::from_str("tx-a1b2c3d4").is_err());
        assert!(ItemId::from_str("it-").is_err());
        assert!(ItemId::from_str("it-has space").is_err());
        assert!(ProjectId::from_str("pj-00ff00ff").is_ok());
    }

    #[test]
    fn display_parse_roundtrips() {
        let id = TransactionId::generate("bob", 1, 1);
        let reparsed = TransactionId::from_str(&id.to_string()).expect("roundtrip");
        assert_eq!(id, reparsed);
    }

    #[test]
    fn serde_is_transparent() {
        let id = ItemId::new_unchecked("it-cafef00d");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"it-cafef00d\"");
        let back: ItemId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, back);
    }
}
