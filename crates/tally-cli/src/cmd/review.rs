use anyhow::Result;
use serde::Serialize;
use std::io::Write as _;
use std::path::Path;

use crate::cmd::{fmt_us, open_workspace};
use crate::output::{OutputMode, pretty_section, render_mode};
use tally_core::review::ReviewEntry;

/// One review entry, flattened for output.
#[derive(Debug, Serialize)]
pub struct ReviewRow {
    pub review_id: String,
    pub kind: String,
    pub detail: serde_json::Value,
    pub created_at_us: u64,
}

impl From<&ReviewEntry> for ReviewRow {
    fn from(entry: &ReviewEntry) -> Self {
        Self {
            review_id: entry.review_id.clone(),
            kind: entry.kind.to_string(),
            detail: entry.detail.clone(),
            created_at_us: entry.created_at_us,
        }
    }
}

/// Execute `ty review`: list conflicts and batched field changes
/// awaiting a human decision.
pub fn run_review(output: OutputMode, project_root: &Path) -> Result<()> {
    let ws = open_workspace(project_root)?;

    let entries = ws.store.list_review_entries(&ws.scope)?;
    let rows: Vec<ReviewRow> = entries.iter().map(ReviewRow::from).collect();

    render_mode(
        output,
        &rows,
        |rows, w| {
            for row in rows {
                writeln!(w, "{}\t{}\t{}", row.review_id, row.kind, row.detail)?;
            }
            Ok(())
        },
        |rows, w| {
            pretty_section(w, "review backlog")?;
            if rows.is_empty() {
                writeln!(w, "(none)")?;
                return Ok(());
            }
            for row in rows {
                writeln!(
                    w,
                    "{}  {}  [{}]",
                    fmt_us(row.created_at_us),
                    row.review_id,
                    row.kind
                )?;
                writeln!(w, "    {}", row.detail)?;
            }
            Ok(())
        },
    )
}
