use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::EngineConfig;
use crate::db::{ResultsDb, WorkspaceLayout};

/// Load the engine config for a workspace layout.
pub fn load_engine_config(layout: &WorkspaceLayout) -> Result<EngineConfig> {
    EngineConfig::load(&layout.config_path)
}

/// Resolve the configured DB path; relative paths are anchored at the workspace root.
pub fn resolve_db_path(layout: &WorkspaceLayout, config: &EngineConfig) -> PathBuf {
    let config_db_path = Path::new(&config.db.path);
    if config_db_path.is_absolute() {
        config_db_path.to_path_buf()
    } else {
        layout.root.join(config_db_path)
    }
}

/// Load the config and open the results database it points at.
pub fn open_results_db(layout: &WorkspaceLayout) -> Result<(EngineConfig, PathBuf, ResultsDb)> {
    let config = load_engine_config(layout)?;
    let db_path = resolve_db_path(layout, &config);
    let db = ResultsDb::open(&db_path)
        .with_context(|| format!("Failed to open results database at {}", db_path.display()))?;
    Ok((config, db_path, db))
}
