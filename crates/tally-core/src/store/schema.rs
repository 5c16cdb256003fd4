//! Canonical sqlite schema for the durable local store.
//!
//! The store persists entity snapshots, the pending-operation queue,
//! the append-only lineage ledger, cached media blobs, and flushed
//! review entries:
//! - `items` / `transactions` keep the latest entity snapshots
//! - `lineage_edges` is append-only; rows are never updated or deleted
//! - `operation_queue` holds durable, idempotent, retryable mutations
//! - `media` / `media_upload_queue` cache blobs and pending uploads
//! - `review_entries` holds coalesced needs-review batches
//! - `store_meta` tracks the schema version

/// Migration v1: core tables plus store metadata.
pub const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    item_id TEXT PRIMARY KEY CHECK (item_id LIKE 'it-%'),
    scope_id TEXT NOT NULL,
    snapshot_json TEXT NOT NULL,
    project_id TEXT,
    transaction_id TEXT,
    disposition TEXT NOT NULL CHECK (
        disposition IN ('to-purchase', 'purchased', 'to-return', 'returned', 'inventory')
    ),
    is_deleted INTEGER NOT NULL DEFAULT 0 CHECK (is_deleted IN (0, 1)),
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS transactions (
    transaction_id TEXT PRIMARY KEY CHECK (transaction_id LIKE 'tx-%'),
    scope_id TEXT NOT NULL,
    snapshot_json TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('pending', 'completed', 'canceled')),
    is_deleted INTEGER NOT NULL DEFAULT 0 CHECK (is_deleted IN (0, 1)),
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS lineage_edges (
    edge_hash TEXT PRIMARY KEY,
    item_id TEXT NOT NULL CHECK (item_id LIKE 'it-%'),
    from_container TEXT NOT NULL,
    to_container TEXT NOT NULL,
    operation TEXT NOT NULL CHECK (
        operation IN ('allocate', 'sell', 'deallocate', 'reassign-transaction')
    ),
    at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS operation_queue (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_id TEXT NOT NULL UNIQUE,
    scope_id TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    idempotency_key TEXT NOT NULL UNIQUE,
    payload_json TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending' CHECK (
        status IN ('pending', 'in-flight', 'failed-permanently')
    ),
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    enqueued_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS media (
    media_id TEXT PRIMARY KEY,
    scope_id TEXT NOT NULL,
    content_type TEXT NOT NULL,
    blob BLOB NOT NULL,
    byte_len INTEGER NOT NULL,
    expires_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS media_upload_queue (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    media_id TEXT NOT NULL REFERENCES media(media_id) ON DELETE CASCADE,
    target_entity_id TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    enqueued_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS review_entries (
    review_id TEXT PRIMARY KEY,
    scope_id TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('conflict', 'field-changes')),
    detail_json TEXT NOT NULL,
    created_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 1);
"#;

/// Migration v2: read-path indexes for queue draining, lineage
/// queries, and scope-filtered snapshot loads.
pub const MIGRATION_V2_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_items_scope_updated
    ON items(scope_id, is_deleted, updated_at_us DESC);

CREATE INDEX IF NOT EXISTS idx_items_transaction
    ON items(transaction_id);

CREATE INDEX IF NOT EXISTS idx_items_project
    ON items(project_id);

CREATE INDEX IF NOT EXISTS idx_transactions_scope_updated
    ON transactions(scope_id, is_deleted, updated_at_us DESC);

CREATE INDEX IF NOT EXISTS idx_lineage_item
    ON lineage_edges(item_id, at_us);

CREATE INDEX IF NOT EXISTS idx_lineage_from
    ON lineage_edges(from_container, at_us);

CREATE INDEX IF NOT EXISTS idx_queue_status_seq
    ON operation_queue(status, seq);

CREATE INDEX IF NOT EXISTS idx_queue_entity
    ON operation_queue(entity_id, seq);

CREATE INDEX IF NOT EXISTS idx_media_expiry
    ON media(expires_at_us);

CREATE INDEX IF NOT EXISTS idx_review_scope_created
    ON review_entries(scope_id, created_at_us DESC);

UPDATE store_meta SET schema_version = 2 WHERE id = 1;
"#;

/// Indexes expected by the drain, lineage, and snapshot read paths.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_items_scope_updated",
    "idx_items_transaction",
    "idx_items_project",
    "idx_transactions_scope_updated",
    "idx_lineage_item",
    "idx_lineage_from",
    "idx_queue_status_seq",
    "idx_queue_entity",
    "idx_media_expiry",
    "idx_review_scope_created",
];

#[cfg(test)]
mod tests {
    use crate::store::migrations;
    use rusqlite::{Connection, params};

    fn seeded_conn() -> rusqlite::Result<Connection> {
        let mut conn = Connection::open_in_memory()?;
        migrations::migrate(&mut conn)?;

        for idx in 0..24_u32 {
            let item_id = format!("it-{idx:08x}");
            let tx_id = format!("tx-{:08x}", idx % 6);
            conn.execute(
                "INSERT INTO items (
                    item_id, scope_id, snapshot_json, project_id, transaction_id,
                    disposition, is_deleted, created_at_us, updated_at_us
                 ) VALUES (?1, 'acct-1', '{}', NULL, ?2, 'purchased', 0, ?3, ?4)",
                params![item_id, tx_id, i64::from(idx), i64::from(idx) + 1_000],
            )?;
        }

        for idx in 0..40_u32 {
            conn.execute(
                "INSERT INTO lineage_edges (
                    edge_hash, item_id, from_container, to_container, operation, at_us
                 ) VALUES (?1, ?2, ?3, 'inventory', 'deallocate', ?4)",
                params![
                    format!("blake3:{idx:064x}"),
                    format!("it-{:08x}", idx % 24),
                    format!("tx:tx-{:08x}", idx % 6),
                    i64::from(idx)
                ],
            )?;
        }

        for idx in 0..12_u32 {
            conn.execute(
                "INSERT INTO operation_queue (
                    entry_id, scope_id, entity_id, idempotency_key, payload_json,
                    status, retry_count, enqueued_at_us
                 ) VALUES (?1, 'acct-1', ?2, ?3, '{}', ?4, 0, ?5)",
                params![
                    format!("op-{idx:04}"),
                    format!("it-{:08x}", idx % 4),
                    format!("blake3:key{idx:060x}"),
                    if idx % 3 == 0 { "failed-permanently" } else { "pending" },
                    i64::from(idx)
                ],
            )?;
        }

        Ok(conn)
    }

    fn query_plan_details(conn: &Connection, sql: &str) -> rusqlite::Result<Vec<String>> {
        let mut stmt = conn.prepare(&format!("EXPLAIN QUERY PLAN {sql}"))?;
        stmt.query_map([], |row| row.get::<_, String>(3))?
            .collect::<Result<Vec<_>, _>>()
    }

    #[test]
    fn query_plan_uses_pending_queue_index() -> rusqlite::Result<()> {
        let conn = seeded_conn()?;
        let details = query_plan_details(
            &conn,
            "SELECT entry_id
             FROM operation_queue
             WHERE status = 'pending'
             ORDER BY seq",
        )?;

        assert!(
            details
                .iter()
                .any(|detail| detail.contains("idx_queue_status_seq")),
            "expected queue drain index in plan, got: {details:?}"
        );

        Ok(())
    }

    #[test]
    fn query_plan_uses_lineage_from_index() -> rusqlite::Result<()> {
        let conn = seeded_conn()?;
        let details = query_plan_details(
            &conn,
            "SELECT item_id
             FROM lineage_edges
             WHERE from_container = 'tx:tx-00000001'
             ORDER BY at_us",
        )?;

        assert!(
            details.iter().any(|detail| detail.contains("idx_lineage_from")),
            "expected lineage index in plan, got: {details:?}"
        );

        Ok(())
    }

    #[test]
    fn query_plan_uses_live_transaction_index() -> rusqlite::Result<()> {
        let conn = seeded_conn()?;
        let details = query_plan_details(
            &conn,
            "SELECT item_id
             FROM items
             WHERE transaction_id = 'tx-00000001'",
        )?;

        assert!(
            details
                .iter()
                .any(|detail| detail.contains("idx_items_transaction")),
            "expected live-pointer index in plan, got: {details:?}"
        );

        Ok(())
    }

    #[test]
    fn lineage_edges_reject_unknown_operation() {
        let conn = seeded_conn().expect("seed");
        let result = conn.execute(
            "INSERT INTO lineage_edges (
                edge_hash, item_id, from_container, to_container, operation, at_us
             ) VALUES ('blake3:bad', 'it-00000001', 'inventory', 'inventory', 'merge', 0)",
            [],
        );
        assert!(result.is_err(), "CHECK constraint should reject 'merge'");
    }
}
