use anyhow::{Context as _, Result};
use clap::Args;
use std::path::Path;
use tally_core::config::{ProjectConfig, STORE_DIR, save_project_config};
use tally_core::store::LocalStore;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force re-initialization even if `.tally/` already exists.
    #[arg(long)]
    pub force: bool,

    /// Account scope to tag local rows and queue entries with.
    #[arg(long, default_value = "local")]
    pub scope: String,
}

const GITIGNORE: &str = "local.db\nlocal.db-wal\nlocal.db-shm\nstore.lock\n";

/// Execute `ty init`. Creates the project skeleton:
///
/// ```text
/// .tally/
///   local.db        (sqlite store, migrated to the latest schema)
///   store.lock      (single-writer advisory lock)
///   config.toml     (scope + sync/media tunables)
///   .gitignore      (local.db*, store.lock)
/// ```
///
/// # Errors
///
/// Returns an error if `.tally/` already exists and `--force` is not
/// set, or if any filesystem or store operation fails.
pub fn run_init(args: &InitArgs, project_root: &Path) -> Result<()> {
    let store_dir = project_root.join(STORE_DIR);

    if store_dir.exists() && !args.force {
        anyhow::bail!("{STORE_DIR}/ already exists. Use `ty init --force` to reinitialize.");
    }

    std::fs::create_dir_all(&store_dir)
        .with_context(|| format!("Failed to create store directory: {}", store_dir.display()))?;

    let config = ProjectConfig {
        scope: Some(args.scope.clone()),
        ..ProjectConfig::default()
    };
    save_project_config(project_root, &config)?;

    let gitignore_path = store_dir.join(".gitignore");
    std::fs::write(&gitignore_path, GITIGNORE)
        .with_context(|| format!("Failed to write .gitignore: {}", gitignore_path.display()))?;

    // Opening runs the migrations, so the schema exists before the
    // first offline write.
    let store = LocalStore::open(project_root)?;
    drop(store);

    println!("✓ Initialized {STORE_DIR}/ project structure.");
    println!();
    println!("  Store:   {STORE_DIR}/local.db");
    println!("  Config:  {STORE_DIR}/config.toml");
    println!("  Scope:   {}", args.scope);
    println!();
    println!("Next steps:");
    println!("  ty status          # queue depth, reviews, storage quota");
    println!("  ty queue           # pending offline operations");
    Ok(())
}
