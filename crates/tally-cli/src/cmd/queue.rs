use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::io::Write as _;
use std::path::Path;

use crate::cmd::{fmt_us, open_workspace};
use crate::output::{OutputMode, pretty_section, render_mode};
use tally_core::queue::entry::QueueEntry;

#[derive(Args, Debug)]
pub struct QueueArgs {
    /// Show permanently failed entries instead of pending ones.
    #[arg(long)]
    pub failed: bool,
}

/// One queue entry, flattened for output.
#[derive(Debug, Serialize)]
pub struct QueueRow {
    pub entry_id: String,
    pub operation: &'static str,
    pub entity_id: String,
    pub status: String,
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub enqueued_at_us: u64,
}

impl From<&QueueEntry> for QueueRow {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            entry_id: entry.entry_id.clone(),
            operation: entry.operation.kind(),
            entity_id: entry.entity_id.clone(),
            status: entry.status.to_string(),
            retries: entry.retry_count,
            last_error: entry.last_error.clone(),
            enqueued_at_us: entry.enqueued_at_us,
        }
    }
}

/// Execute `ty queue`: list the durable operation queue.
pub fn run_queue(args: &QueueArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let ws = open_workspace(project_root)?;

    let entries = if args.failed {
        ws.store.failed_entries(&ws.scope)?
    } else {
        ws.store.pending_entries(&ws.scope)?
    };
    let rows: Vec<QueueRow> = entries.iter().map(QueueRow::from).collect();

    let heading = if args.failed {
        "failed operations"
    } else {
        "pending operations"
    };

    render_mode(
        output,
        &rows,
        |rows, w| {
            for row in rows {
                writeln!(
                    w,
                    "{}\t{}\t{}\t{}\t{}",
                    row.entry_id, row.operation, row.entity_id, row.status, row.retries
                )?;
            }
            Ok(())
        },
        |rows, w| {
            pretty_section(w, heading)?;
            if rows.is_empty() {
                writeln!(w, "(none)")?;
                return Ok(());
            }
            for row in rows {
                writeln!(
                    w,
                    "{}  {:<20} {:<14} {} (retries: {})",
                    fmt_us(row.enqueued_at_us),
                    row.operation,
                    row.entity_id,
                    row.status,
                    row.retries
                )?;
                if let Some(ref err) = row.last_error {
                    writeln!(w, "    last error: {err}")?;
                }
            }
            Ok(())
        },
    )
}
