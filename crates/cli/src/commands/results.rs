use anyhow::{anyhow, Context, Result};
use emuexec_core::db::WorkspaceLayout;
use emuexec_core::model::{AnalysisResult, FileStatus, TraceResult};
use serde_json::Value;

use crate::canonicalize_or_current;
use crate::commands::{open_workspace_db, print_json};

/// Load the stored result for `firmware_uid`.
///
/// For container images (`parent_flag`), child files persisted later under the
/// same firmware uid are merged in without replacing records already present.
pub fn load_stored_analysis(
    layout: &WorkspaceLayout,
    firmware_uid: &str,
) -> Result<AnalysisResult> {
    let (_config, _db_path, db) = open_workspace_db(layout)?;
    let mut result = db
        .load_analysis(firmware_uid)
        .context("Failed to load analysis")?
        .ok_or_else(|| anyhow!("No analysis stored for firmware uid {firmware_uid}"))?;

    if result.parent_flag {
        let children = db.load_child_files(firmware_uid).context("Failed to load child files")?;
        result.merge(children);
    }
    Ok(result)
}

/// Print a stored analysis.
pub fn show_analysis_command(
    root: &str,
    firmware_uid: &str,
    json: bool,
    decompress_traces: bool,
) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = WorkspaceLayout::new(&root_path);
    let result = load_stored_analysis(&layout, firmware_uid)?;

    if json {
        let mut value = serde_json::to_value(&result).context("Failed to serialize analysis")?;
        if decompress_traces {
            inline_trace_text(&mut value, &result)?;
        }
        return print_json(&value);
    }

    println!("Analysis for firmware {firmware_uid}:");
    println!(
        "  Files: {}  Executable: {}  Incomplete: {}{}",
        result.files.len(),
        result.executable_count(),
        result.incomplete_count(),
        if result.parent_flag { "  [parent]" } else { "" }
    );

    for (uid, file) in &result.files {
        println!("- {uid} ({})", file.path);
        if let FileStatus::Incomplete { reason } = &file.status {
            println!("    incomplete: {reason}");
            continue;
        }
        println!("    executable: {}", file.executable);
        if file.architecture_results.is_empty() {
            println!("    (no architectures probed)");
        }
        for (arch, arch_result) in &file.architecture_results {
            let codes: Vec<String> =
                arch_result.attempts.iter().map(|a| a.return_code.to_string()).collect();
            println!(
                "    {arch}: executable={} return_codes=[{}]",
                arch_result.executable,
                codes.join(", ")
            );
            if decompress_traces && !arch_result.trace.is_empty() {
                let text = trace_text(&arch_result.trace)?;
                for line in text.lines() {
                    println!("      | {line}");
                }
            }
        }
    }

    Ok(())
}

fn trace_text(trace: &TraceResult) -> Result<String> {
    let raw = trace
        .decompressed()
        .with_context(|| format!("Failed to decompress {} trace", trace.architecture))?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Add a `trace_text` field next to every non-empty compressed trace.
fn inline_trace_text(value: &mut Value, result: &AnalysisResult) -> Result<()> {
    for (uid, file) in &result.files {
        for (arch, arch_result) in &file.architecture_results {
            if arch_result.trace.is_empty() {
                continue;
            }
            let text = trace_text(&arch_result.trace)?;
            let pointer =
                format!("/files/{}/architecture_results/{}/trace", escape(uid), escape(arch));
            if let Some(trace) = value.pointer_mut(&pointer).and_then(Value::as_object_mut) {
                trace.insert("trace_text".to_string(), Value::String(text));
            }
        }
    }
    Ok(())
}

/// JSON-pointer escaping of a single reference token.
fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}
