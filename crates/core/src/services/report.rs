use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::{AnalysisResult, FileResult};

/// Wrap per-file records into the final analysis record.
pub fn assemble(file_results: BTreeMap<String, FileResult>, parent_flag: bool) -> AnalysisResult {
    AnalysisResult { files: file_results, parent_flag }
}

/// Counts shown after an analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisSummary {
    pub files: usize,
    pub executable: usize,
    pub incomplete: usize,
    pub parent_flag: bool,
    /// uid -> architectures that produced a real execution.
    pub executable_architectures: BTreeMap<String, Vec<String>>,
}

pub fn summarize(result: &AnalysisResult) -> AnalysisSummary {
    let executable_architectures = result
        .files
        .iter()
        .filter(|(_, f)| f.executable)
        .map(|(uid, f)| {
            let archs = f.executable_architectures().into_iter().map(str::to_string).collect();
            (uid.clone(), archs)
        })
        .collect();

    AnalysisSummary {
        files: result.files.len(),
        executable: result.executable_count(),
        incomplete: result.incomplete_count(),
        parent_flag: result.parent_flag,
        executable_architectures,
    }
}
