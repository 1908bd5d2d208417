use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::config::EngineConfig;
use crate::db::{open_results_db, ResultsDb, WorkspaceLayout};

/// Convenience wrapper bundling layout, config, db path, and an open ResultsDb.
#[derive(Debug)]
pub struct WorkspaceContext {
    pub layout: WorkspaceLayout,
    pub config: EngineConfig,
    pub db_path: PathBuf,
    pub db: ResultsDb,
}

impl WorkspaceContext {
    /// Load the workspace config and open the database for a given root.
    pub fn from_root(root: impl AsRef<Path>) -> Result<Self> {
        let layout = WorkspaceLayout::new(root);
        let (config, db_path, db) = open_results_db(&layout)?;
        Ok(Self { layout, config, db_path, db })
    }
}
