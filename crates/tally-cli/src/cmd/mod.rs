//! Command handlers for the `ty` binary.

pub mod gc;
pub mod init;
pub mod lineage;
pub mod queue;
pub mod review;
pub mod status;

use anyhow::Result;
use std::path::Path;
use tally_core::config::{self, ProjectConfig, STORE_DIR};
use tally_core::error::SyncError;
use tally_core::model::ScopeId;
use tally_core::store::LocalStore;

/// An opened project: its config, the scope rows are tagged with, and
/// the locked local store.
#[derive(Debug)]
pub struct Workspace {
    pub config: ProjectConfig,
    pub scope: ScopeId,
    pub store: LocalStore,
}

/// Open the `.tally/` workspace under `root`.
///
/// Errors with [`SyncError::QueueUnavailable`] when the directory is
/// missing rather than silently creating it; read commands must never
/// initialize a project as a side effect.
pub fn open_workspace(root: &Path) -> Result<Workspace> {
    if !root.join(STORE_DIR).exists() {
        return Err(SyncError::QueueUnavailable(format!(
            "no {STORE_DIR}/ in {}. Run `ty init` first.",
            root.display()
        ))
        .into());
    }
    let config = config::load_project_config(root)?;
    let scope = ScopeId::new(config.scope.clone().unwrap_or_else(|| "local".to_string()));
    let store = LocalStore::open(root)?;
    Ok(Workspace {
        config,
        scope,
        store,
    })
}

/// Wall-clock time in microseconds, the unit every timestamp uses.
#[must_use]
pub fn now_us() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or_default()
}

/// Format a microsecond timestamp for human output.
#[must_use]
pub fn fmt_us(us: u64) -> String {
    i64::try_from(us)
        .ok()
        .and_then(chrono::DateTime::from_timestamp_micros)
        .map_or_else(|| us.to_string(), |dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::{fmt_us, open_workspace};
    use tempfile::TempDir;

    #[test]
    fn open_workspace_refuses_uninitialized_root() {
        let dir = TempDir::new().expect("tempdir");
        let err = open_workspace(dir.path()).expect_err("must refuse");
        assert!(err.to_string().contains("ty init"));
    }

    #[test]
    fn fmt_us_renders_calendar_time() {
        // 2024-01-01T00:00:00Z
        assert_eq!(fmt_us(1_704_067_200_000_000), "2024-01-01 00:00:00");
    }
}
