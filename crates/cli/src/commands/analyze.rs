use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use emuexec_core::config::EngineConfig;
use emuexec_core::db::WorkspaceLayout;
use emuexec_core::model::{AnalysisResult, FileStatus};
use emuexec_core::services::analyzer::{analyze_firmware, FirmwareFile};
use emuexec_core::services::emulator::QemuUserBackend;
use emuexec_core::services::report::summarize;
use serde::Deserialize;
use tracing::info;

use crate::commands::{open_workspace_db, print_json};
use crate::{canonicalize_or_current, file_uid};

/// Inputs of `emuexec analyze`.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeArgs {
    pub root: String,
    pub manifest: String,
    pub firmware_uid: Option<String>,
    pub parent: bool,
    /// Replaces the configured default architectures when non-empty.
    pub architectures: Vec<String>,
    /// Replaces the configured invocation options when non-empty.
    pub options: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub no_trace: bool,
    pub library_root: Option<PathBuf>,
    pub json: bool,
}

/// One manifest entry; `uid` is derived from the file contents when omitted.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub path: PathBuf,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default, alias = "architectures")]
    pub candidate_architectures: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestDoc {
    List(Vec<ManifestEntry>),
    Wrapped { files: Vec<ManifestEntry> },
}

/// Parse a JSON or YAML manifest into firmware files.
///
/// Relative paths are resolved against the manifest's directory.
pub fn load_manifest(path: &Path) -> Result<Vec<FirmwareFile>> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest at {}", path.display()))?;
    let doc: ManifestDoc = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&body).context("Failed to parse manifest YAML")?
        }
        _ => serde_json::from_str(&body).context("Failed to parse manifest JSON")?,
    };
    let entries = match doc {
        ManifestDoc::List(entries) | ManifestDoc::Wrapped { files: entries } => entries,
    };

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    entries
        .into_iter()
        .map(|entry| {
            let file_path =
                if entry.path.is_absolute() { entry.path } else { base.join(entry.path) };
            let uid = match entry.uid {
                Some(uid) => uid,
                None => file_uid(&file_path).with_context(|| {
                    format!("Cannot derive uid for manifest entry {}", file_path.display())
                })?,
            };
            Ok(FirmwareFile {
                path: file_path,
                uid,
                candidate_architectures: entry.candidate_architectures,
            })
        })
        .collect()
}

/// Fold command-line overrides into the workspace config.
pub fn apply_overrides(config: &mut EngineConfig, args: &AnalyzeArgs) -> Result<()> {
    if !args.architectures.is_empty() {
        config.default_architectures = args.architectures.clone();
    }
    if !args.options.is_empty() {
        config.options = args.options.clone();
    }
    if let Some(timeout) = args.timeout_secs {
        config.timeout_secs = timeout;
    }
    if args.no_trace {
        config.trace_enabled = false;
    }
    if let Some(root) = &args.library_root {
        config.emulator.library_root = Some(root.clone());
    }
    config.validate().map_err(|e| anyhow!("Invalid analysis settings: {e}"))
}

/// Run the engine over a manifest, persist the result, and export a JSON report.
pub fn analyze_command(args: &AnalyzeArgs) -> Result<()> {
    let root_path = canonicalize_or_current(&args.root)?;
    let layout = WorkspaceLayout::new(&root_path);
    let (mut config, _db_path, db) = open_workspace_db(&layout)?;
    apply_overrides(&mut config, args)?;

    let manifest_path = Path::new(&args.manifest);
    let manifest_path = if manifest_path.is_absolute() {
        manifest_path.to_path_buf()
    } else {
        std::env::current_dir().context("Failed to get current directory")?.join(manifest_path)
    };
    let files = load_manifest(&manifest_path)?;
    let firmware_uid = match &args.firmware_uid {
        Some(uid) => uid.clone(),
        None => file_uid(&manifest_path)?,
    };

    let backend = QemuUserBackend::new(&config.emulator);
    info!(firmware_uid = %firmware_uid, files = files.len(), "starting analysis");
    let result = analyze_firmware(&config, &backend, &files, args.parent)
        .context("Failed to start analysis")?;

    let run_id = db.insert_analysis(&firmware_uid, &result).context("Failed to store analysis")?;
    let report_path = write_report(&layout, &firmware_uid, &result)?;

    if args.json {
        return print_json(&result);
    }

    print_analysis_summary(&firmware_uid, run_id, &result);
    println!("  Report: {}", report_path.display());
    Ok(())
}

fn write_report(
    layout: &WorkspaceLayout,
    firmware_uid: &str,
    result: &AnalysisResult,
) -> Result<PathBuf> {
    fs::create_dir_all(&layout.reports_dir).with_context(|| {
        format!("Failed to create reports dir: {}", layout.reports_dir.display())
    })?;
    let path = layout.report_path(firmware_uid);
    let json = serde_json::to_string_pretty(result).context("Failed to serialize report")?;
    fs::write(&path, json)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    Ok(path)
}

pub fn print_analysis_summary(firmware_uid: &str, run_id: i64, result: &AnalysisResult) {
    let summary = summarize(result);
    println!("Analyzed firmware {firmware_uid} (run #{run_id}):");
    println!(
        "  Files: {}  Executable: {}  Incomplete: {}",
        summary.files, summary.executable, summary.incomplete
    );
    for (uid, file) in &result.files {
        match &file.status {
            FileStatus::Incomplete { reason } => {
                println!("  - {uid} {} incomplete: {reason}", file.path);
            }
            FileStatus::Complete if file.executable => {
                println!(
                    "  - {uid} {} executable [{}]",
                    file.path,
                    file.executable_architectures().join(", ")
                );
            }
            FileStatus::Complete => println!("  - {uid} {} not executable", file.path),
        }
    }
}
