use anyhow::Result;
use serde::Serialize;
use std::io::Write as _;
use std::path::Path;

use crate::cmd::{now_us, open_workspace};
use crate::output::{OutputMode, render};

#[derive(Debug, Serialize)]
struct GcReport {
    purged_media: usize,
}

/// Execute `ty gc`: drop media blobs whose TTL has lapsed.
pub fn run_gc(output: OutputMode, project_root: &Path) -> Result<()> {
    let ws = open_workspace(project_root)?;

    let purged = ws.store.purge_expired_media(now_us())?;
    tracing::info!(purged, ttl_days = ws.config.media.ttl_days, "media gc");

    render(output, &GcReport { purged_media: purged }, |r, w| {
        writeln!(w, "✓ Purged {} expired media blob(s).", r.purged_media)
    })
}
