use std::path::Path;

use anyhow::{Context, Result};
use emuexec_core::config::EngineConfig;
use emuexec_core::db::{ResultsDb, WorkspaceLayout};

/// Load the engine config and open the results DB (delegates to core helper).
pub fn open_workspace_db(
    layout: &WorkspaceLayout,
) -> Result<(EngineConfig, std::path::PathBuf, ResultsDb)> {
    emuexec_core::db::open_results_db(layout)
}

/// Engine config for `layout`, or defaults when the workspace has none yet.
pub fn load_config_or_default(layout: &WorkspaceLayout) -> Result<EngineConfig> {
    if layout.config_path.exists() {
        emuexec_core::db::load_engine_config(layout)
    } else {
        Ok(EngineConfig::default())
    }
}

/// Helper to print whether a directory exists.
pub fn print_dir_status(label: &str, path: &Path) {
    let exists = path.is_dir();
    println!("- {label}: {} ({})", if exists { "OK" } else { "MISSING" }, path.display());
}

pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    println!("{serialized}");
    Ok(())
}
