use std::fmt;

/// Machine-readable error codes for operator-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    NotAuthenticated,
    ItemNotFound,
    TransactionNotFound,
    InvalidEnumValue,
    InvalidMoney,
    InvalidEntityId,
    NetworkUnavailable,
    RemoteRejected,
    Conflict,
    PartialCompletion,
    QueueUnavailable,
    EdgeAppendFailed,
    LockContention,
    StoreCorrupt,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::NotAuthenticated => "E1003",
            Self::ItemNotFound => "E2001",
            Self::TransactionNotFound => "E2002",
            Self::InvalidEnumValue => "E2003",
            Self::InvalidMoney => "E2004",
            Self::InvalidEntityId => "E2005",
            Self::NetworkUnavailable => "E4001",
            Self::RemoteRejected => "E4002",
            Self::Conflict => "E4003",
            Self::PartialCompletion => "E4004",
            Self::QueueUnavailable => "E5001",
            Self::EdgeAppendFailed => "E5002",
            Self::LockContention => "E5003",
            Self::StoreCorrupt => "E5004",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Store not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::NotAuthenticated => "No signed-in identity",
            Self::ItemNotFound => "Item not found",
            Self::TransactionNotFound => "Transaction not found",
            Self::InvalidEnumValue => "Invalid disposition/status value",
            Self::InvalidMoney => "Invalid money amount",
            Self::InvalidEntityId => "Invalid entity id",
            Self::NetworkUnavailable => "Network unavailable",
            Self::RemoteRejected => "Remote rejected the operation",
            Self::Conflict => "Server state diverged from assumed base",
            Self::PartialCompletion => "Operation partially completed",
            Self::QueueUnavailable => "Local durable store inaccessible",
            Self::EdgeAppendFailed => "Lineage edge append failed",
            Self::LockContention => "Lock contention",
            Self::StoreCorrupt => "Corrupt local store",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `ty init` to initialize the local store."),
            Self::ConfigParseError => Some("Fix syntax in .tally/config.toml and retry."),
            Self::NotAuthenticated => {
                Some("Sign in before writing; offline writes need an identity context.")
            }
            Self::ItemNotFound | Self::TransactionNotFound => None,
            Self::InvalidEnumValue => Some("Use one of the documented disposition/status values."),
            Self::InvalidMoney => Some("Amounts are decimal strings like '12.50'."),
            Self::InvalidEntityId => Some("Entity ids carry an it-/tx-/pj- prefix."),
            Self::NetworkUnavailable => {
                Some("The operation was queued and will drain on reconnect.")
            }
            Self::RemoteRejected => Some("Choose a different target; this is not retryable."),
            Self::Conflict => Some("Refresh, review the entity, and retry with the current base."),
            Self::PartialCompletion => {
                Some("Primary write applied but a linkage failed; reconcile manually.")
            }
            Self::QueueUnavailable => Some("Check disk space and permissions for .tally/."),
            Self::EdgeAppendFailed => Some("Retry the mutation; the ledger append did not land."),
            Self::LockContention => Some("Retry after the other `ty` process releases its lock."),
            Self::StoreCorrupt => Some("Restore .tally/local.db from backup or re-sync."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ---------------------------------------------------------------------------
// Conflict and partial-completion detail payloads
// ---------------------------------------------------------------------------

/// Detail payload for a `Conflict` error: the asserted base no longer
/// matches the server's current value.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConflictDetails {
    /// Entity whose server state diverged.
    pub entity_id: String,
    /// Field carrying the stale assumption (e.g. `transaction_id`).
    pub field: String,
    /// Value the local mutation assumed.
    pub expected: Option<String>,
    /// Value the server currently holds.
    pub actual: Option<String>,
}

impl fmt::Display for ConflictDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {}={:?}, server has {:?}",
            self.entity_id, self.field, self.expected, self.actual
        )
    }
}

/// Detail payload when the primary mutation applied but a secondary
/// linkage (e.g. the remote lineage append) did not.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PartialCompletion {
    /// Entity the primary mutation applied to.
    pub entity_id: String,
    /// What applied successfully.
    pub applied: String,
    /// What failed, with the underlying error text.
    pub failed: String,
}

impl fmt::Display for PartialCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: applied {} but {} failed",
            self.entity_id, self.applied, self.failed
        )
    }
}

// ---------------------------------------------------------------------------
// SyncError
// ---------------------------------------------------------------------------

/// Errors surfaced by the sync core.
///
/// `is_retryable` gates queue persistence and drain retries: only
/// `NetworkUnavailable` is retried automatically. `Conflict` and
/// `RemoteRejected` always surface to the caller untouched.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Transient network failure; the mutation was (or can be) queued.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// Non-retryable business rule violation from the remote.
    #[error("remote rejected: {0}")]
    RemoteRejected(String),

    /// Server state diverged from the assumed base; needs manual review.
    #[error("conflict: {0}")]
    Conflict(ConflictDetails),

    /// Primary write applied but a secondary linkage did not.
    #[error("partial completion: {0}")]
    Partial(PartialCompletion),

    /// Local durable store inaccessible — fatal for offline capability.
    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    /// Offline writes require a previously-established identity context.
    #[error("not authenticated: offline writes require a signed-in identity")]
    NotAuthenticated,

    /// Referenced item does not exist locally or remotely.
    #[error("item not found: {0}")]
    ItemNotFound(String),

    /// Referenced transaction does not exist locally or remotely.
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    /// sqlite-level failure in the local store.
    #[error("local store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Payload (de)serialization failure.
    #[error("payload encode/decode error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl SyncError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NetworkUnavailable(_) => ErrorCode::NetworkUnavailable,
            Self::RemoteRejected(_) => ErrorCode::RemoteRejected,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::Partial(_) => ErrorCode::PartialCompletion,
            Self::QueueUnavailable(_) => ErrorCode::QueueUnavailable,
            Self::NotAuthenticated => ErrorCode::NotAuthenticated,
            Self::ItemNotFound(_) => ErrorCode::ItemNotFound,
            Self::TransactionNotFound(_) => ErrorCode::TransactionNotFound,
            Self::Store(_) => ErrorCode::QueueUnavailable,
            Self::Payload(_) => ErrorCode::InternalUnexpected,
        }
    }

    /// Returns `true` if the drain loop may retry this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkUnavailable(_))
    }
}
