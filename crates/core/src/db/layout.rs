use std::path::{Path, PathBuf};

/// Logical layout of an analysis workspace on disk.
///
/// This is derived from a chosen root path. It does *not* perform any IO itself;
/// frontends create the directories and files.
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    pub root: PathBuf,
    /// Directory for internal metadata (.emuexec).
    pub meta_dir: PathBuf,
    /// Engine configuration (JSON).
    pub config_path: PathBuf,
    pub db_path: PathBuf,
    /// Directory for exported JSON reports.
    pub reports_dir: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let meta_dir = root.join(".emuexec");
        let config_path = meta_dir.join("config.json");
        let db_path = meta_dir.join("results.db");
        let reports_dir = root.join("reports");

        Self { root, meta_dir, config_path, db_path, reports_dir }
    }

    /// Database path relative to `root`, suitable for storing in the config.
    pub fn db_path_relative_string(&self) -> String {
        match self.db_path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_string_lossy().to_string(),
            Err(_) => self.db_path.to_string_lossy().to_string(),
        }
    }

    /// Where the JSON report for a firmware uid is exported.
    pub fn report_path(&self, firmware_uid: &str) -> PathBuf {
        self.reports_dir.join(format!("{firmware_uid}.json"))
    }
}
