use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::io::Write as _;
use std::path::Path;
use std::str::FromStr as _;

use crate::cmd::{fmt_us, open_workspace};
use crate::output::{OutputMode, pretty_section, render_mode};
use tally_core::lineage::LineageEdge;
use tally_core::model::ItemId;

#[derive(Args, Debug)]
pub struct LineageArgs {
    /// Item id (`it-` prefixed) whose movement history to show.
    #[arg(value_name = "ITEM_ID")]
    pub item_id: String,
}

/// One ledger edge, flattened for output.
#[derive(Debug, Serialize)]
pub struct EdgeRow {
    pub edge_hash: String,
    pub operation: String,
    pub from: String,
    pub to: String,
    pub at_us: u64,
}

impl From<&LineageEdge> for EdgeRow {
    fn from(edge: &LineageEdge) -> Self {
        Self {
            edge_hash: edge.edge_hash.clone(),
            operation: edge.operation.to_string(),
            from: edge.from.encode(),
            to: edge.to.encode(),
            at_us: edge.at_us,
        }
    }
}

/// Execute `ty lineage <item-id>`: the append-only movement history of
/// one item, oldest first.
pub fn run_lineage(args: &LineageArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let item_id = ItemId::from_str(&args.item_id)?;
    let ws = open_workspace(project_root)?;

    let edges = ws.store.edges_for_item(&item_id)?;
    let rows: Vec<EdgeRow> = edges.iter().map(EdgeRow::from).collect();

    render_mode(
        output,
        &rows,
        |rows, w| {
            for row in rows {
                writeln!(
                    w,
                    "{}\t{}\t{}\t{}",
                    row.at_us, row.operation, row.from, row.to
                )?;
            }
            Ok(())
        },
        |rows, w| {
            pretty_section(w, &format!("lineage for {}", args.item_id))?;
            if rows.is_empty() {
                writeln!(w, "(no recorded moves)")?;
                return Ok(());
            }
            for row in rows {
                writeln!(
                    w,
                    "{}  {:<22} {} -> {}",
                    fmt_us(row.at_us),
                    row.operation,
                    row.from,
                    row.to
                )?;
            }
            Ok(())
        },
    )
}
