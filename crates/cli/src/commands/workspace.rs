use std::fs;

use anyhow::{Context, Result};
use emuexec_core::config::EngineConfig;
use emuexec_core::db::{AnalysisRecord, ResultsDb, WorkspaceLayout};
use serde::Serialize;

use crate::canonicalize_or_current;
use crate::commands::{open_workspace_db, print_dir_status, print_json};

#[derive(Serialize)]
pub struct WorkspaceInfoSnapshot {
    pub root: String,
    pub config_file: String,
    pub db_path: String,
    pub reports_dir: String,
    pub engine_version: String,
    pub config: EngineConfig,
    pub analyses: Vec<AnalysisRecord>,
}

/// Initialize a new workspace at `root`.
///
/// An existing config is left untouched so re-running `init` is safe.
pub fn init_workspace_command(root: &str) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = WorkspaceLayout::new(&root_path);

    fs::create_dir_all(&layout.meta_dir)
        .with_context(|| format!("Failed to create meta dir: {}", layout.meta_dir.display()))?;
    fs::create_dir_all(&layout.reports_dir).with_context(|| {
        format!("Failed to create reports dir: {}", layout.reports_dir.display())
    })?;

    let config = if layout.config_path.exists() {
        emuexec_core::db::load_engine_config(&layout)?
    } else {
        let config = EngineConfig::default().with_db_path(layout.db_path_relative_string());
        config.save(&layout.config_path)?;
        config
    };

    let db_path = emuexec_core::db::resolve_db_path(&layout, &config);
    ResultsDb::open(&db_path).with_context(|| {
        format!("Failed to initialize results database at {}", db_path.display())
    })?;

    println!("Initialized emuexec workspace:");
    println!("  Root: {}", layout.root.display());
    println!("  Config: {}", layout.config_path.display());
    println!("  DB path (relative): {}", config.db.path);
    println!("  Reports dir: {}", layout.reports_dir.display());

    Ok(())
}

/// Show configuration and stored analyses of an existing workspace.
pub fn workspace_info_command(root: &str, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = WorkspaceLayout::new(&root_path);

    let (config, db_path, db) = open_workspace_db(&layout)?;
    let analyses = db.list_analyses().context("Failed to list analyses")?;

    if json {
        let snapshot = WorkspaceInfoSnapshot {
            root: layout.root.display().to_string(),
            config_file: layout.config_path.display().to_string(),
            db_path: db_path.display().to_string(),
            reports_dir: layout.reports_dir.display().to_string(),
            engine_version: emuexec_core::version().to_string(),
            config,
            analyses,
        };
        return print_json(&snapshot);
    }

    println!("emuexec Workspace Info");
    println!("======================");
    println!("Root: {}", layout.root.display());
    println!("Config file: {}", layout.config_path.display());
    println!("Config version: {}", config.config_version);
    println!("DB path: {}", db_path.display());
    println!("Engine version: {}", emuexec_core::version());
    println!();

    println!("Engine:");
    println!("  Options: {:?}", config.options);
    if config.default_architectures.is_empty() {
        println!("  Default architectures: (none)");
    } else {
        println!("  Default architectures: {}", config.default_architectures.join(", "));
    }
    println!("  Timeout: {}s (trace {}s)", config.timeout_secs, config.trace_timeout_secs);
    println!("  Tracing: {}", if config.trace_enabled { "enabled" } else { "disabled" });
    println!("  Max concurrent emulations: {}", config.max_concurrent_emulations);
    match &config.emulator.dir {
        Some(dir) => println!("  Emulator dir: {}", dir.display()),
        None => println!("  Emulator dir: (PATH)"),
    }
    println!();

    println!("Directories:");
    print_dir_status("Meta dir (.emuexec)", &layout.meta_dir);
    print_dir_status("Reports dir", &layout.reports_dir);
    println!();

    println!("Analyses ({}):", analyses.len());
    if analyses.is_empty() {
        println!("  (none)");
    }
    for record in analyses {
        println!(
            "  - #{} {} files={} executable={} incomplete={}{} at {}",
            record.id,
            record.firmware_uid,
            record.file_count,
            record.executable_count,
            record.incomplete_count,
            if record.parent_flag { " [parent]" } else { "" },
            record.created_at
        );
    }

    Ok(())
}
