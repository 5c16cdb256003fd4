use anyhow::Result;
use serde::Serialize;
use std::io::Write as _;
use std::path::Path;

use crate::cmd::open_workspace;
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use tally_core::store::StorageQuota;

/// Snapshot of local sync health, stable across output modes.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub scope: String,
    pub pending_operations: u64,
    pub failed_operations: usize,
    pub review_entries: usize,
    pub storage: StorageQuota,
}

/// Execute `ty status`: queue depth, retired entries, review backlog,
/// and the sqlite storage quota.
pub fn run_status(output: OutputMode, project_root: &Path) -> Result<()> {
    let ws = open_workspace(project_root)?;

    let report = StatusReport {
        scope: ws.scope.to_string(),
        pending_operations: ws.store.queue_depth(&ws.scope)?,
        failed_operations: ws.store.failed_entries(&ws.scope)?.len(),
        review_entries: ws.store.list_review_entries(&ws.scope)?.len(),
        storage: ws.store.quota()?,
    };

    render_mode(
        output,
        &report,
        |r, w| {
            writeln!(
                w,
                "{}\t{}\t{}\t{}\t{}/{}",
                r.scope,
                r.pending_operations,
                r.failed_operations,
                r.review_entries,
                r.storage.used_bytes,
                r.storage.quota_bytes
            )
        },
        |r, w| {
            pretty_section(w, "tally status")?;
            pretty_kv(w, "scope", &r.scope)?;
            pretty_kv(w, "pending", r.pending_operations.to_string())?;
            pretty_kv(w, "failed", r.failed_operations.to_string())?;
            pretty_kv(w, "reviews", r.review_entries.to_string())?;
            pretty_kv(
                w,
                "storage",
                format!("{} / {} bytes", r.storage.used_bytes, r.storage.quota_bytes),
            )
        },
    )
}
