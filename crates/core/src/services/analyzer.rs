use std::collections::{BTreeMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::model::{AnalysisResult, ArchitectureResult, FileResult};
use crate::policy::ExecutionPolicy;
use crate::services::emulator::EmulationBackend;
use crate::services::probe::{ArchitectureProbe, ProbeError};
use crate::services::report;
use crate::services::runner::{EmulationRunner, DEFAULT_OUTPUT_LIMIT};
use crate::services::trace::{TraceCollector, DEFAULT_TRACE_LIMIT};

/// One extracted file handed to the analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareFile {
    pub path: PathBuf,
    pub uid: String,
    /// Architecture hints for this file; empty falls back to the analysis-wide list.
    #[serde(default)]
    pub candidate_architectures: Vec<String>,
}

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("max_concurrent_emulations must be at least 1")]
    NoWorkers,
    #[error("Failed to build emulation worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Knobs the analyzer needs beyond backend and policy.
#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub trace_enabled: bool,
    pub trace_timeout: Duration,
    pub output_limit: usize,
    pub trace_limit: usize,
    pub max_concurrent_emulations: usize,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            trace_enabled: true,
            trace_timeout: Duration::from_secs(10),
            output_limit: DEFAULT_OUTPUT_LIMIT,
            trace_limit: DEFAULT_TRACE_LIMIT,
            max_concurrent_emulations: 4,
        }
    }
}

impl AnalyzerSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            trace_enabled: config.trace_enabled,
            trace_timeout: config.trace_timeout(),
            output_limit: config.max_output_bytes,
            trace_limit: config.max_trace_bytes,
            max_concurrent_emulations: config.max_concurrent_emulations,
        }
    }
}

/// Probes every file of a firmware image under its candidate architectures.
///
/// All emulator subprocesses (option runs and traced runs) are spawned and awaited
/// on the analyzer's own rayon pool, so at most `max_concurrent_emulations` of them
/// are alive at any moment.
pub struct FileAnalyzer<'a> {
    backend: &'a dyn EmulationBackend,
    policy: &'a ExecutionPolicy,
    settings: AnalyzerSettings,
    pool: rayon::ThreadPool,
}

impl<'a> FileAnalyzer<'a> {
    pub fn new(
        backend: &'a dyn EmulationBackend,
        policy: &'a ExecutionPolicy,
        settings: AnalyzerSettings,
    ) -> Result<Self, AnalyzerError> {
        if settings.max_concurrent_emulations == 0 {
            return Err(AnalyzerError::NoWorkers);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.max_concurrent_emulations)
            .thread_name(|i| format!("emuexec-worker-{i}"))
            .build()?;
        Ok(Self { backend, policy, settings, pool })
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    /// Analyze `files`, returning exactly one record per distinct uid.
    ///
    /// `candidate_architectures` applies to files that carry no hints of their own.
    /// A repeated uid is analyzed once, using its first occurrence.
    pub fn analyze(
        &self,
        files: &[FirmwareFile],
        candidate_architectures: &[String],
        options: &[String],
        timeout: Duration,
    ) -> BTreeMap<String, FileResult> {
        let mut seen = HashSet::new();
        let unique: Vec<&FirmwareFile> = files
            .iter()
            .filter(|file| {
                let first = seen.insert(file.uid.as_str());
                if !first {
                    warn!(uid = %file.uid, path = %file.path.display(), "duplicate uid skipped");
                }
                first
            })
            .collect();

        let probe = self.probe();
        let results: Mutex<BTreeMap<String, FileResult>> = Mutex::new(BTreeMap::new());

        self.pool.install(|| {
            unique.par_iter().for_each(|file| {
                let candidates = if file.candidate_architectures.is_empty() {
                    candidate_architectures
                } else {
                    file.candidate_architectures.as_slice()
                };
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    analyze_file(&probe, file, candidates, options, timeout)
                }));
                match outcome {
                    Ok(record) => {
                        results.lock().insert(file.uid.clone(), record);
                    }
                    Err(_) => error!(uid = %file.uid, "analysis task panicked"),
                }
            });
        });

        let mut results = results.into_inner();
        for file in unique {
            results.entry(file.uid.clone()).or_insert_with(|| {
                FileResult::incomplete(
                    file.path.display().to_string(),
                    file.uid.clone(),
                    "analysis task produced no result",
                )
            });
        }
        results
    }

    fn probe(&self) -> ArchitectureProbe<'_> {
        let mut runner = EmulationRunner::new(self.backend, self.policy);
        runner.output_limit = self.settings.output_limit;
        let tracer = self.settings.trace_enabled.then(|| TraceCollector {
            backend: self.backend,
            trace_limit: self.settings.trace_limit,
        });
        ArchitectureProbe { runner, tracer, trace_timeout: self.settings.trace_timeout }
    }
}

/// Probe one file under each of `candidates`.
///
/// An empty candidate list or a blank name is treated as malformed: the file is
/// reported complete with no architecture results. Only resource exhaustion turns
/// the record into an `Incomplete` marker.
pub fn analyze_file(
    probe: &ArchitectureProbe<'_>,
    file: &FirmwareFile,
    candidates: &[String],
    options: &[String],
    timeout: Duration,
) -> FileResult {
    let path = file.path.display().to_string();

    let Some(candidates) = normalize_candidates(candidates) else {
        warn!(uid = %file.uid, path = %path, "malformed candidate architecture list");
        return FileResult::complete(path, file.uid.clone(), BTreeMap::new());
    };

    let probed: Result<Vec<ArchitectureResult>, ProbeError> = candidates
        .par_iter()
        .map(|arch| probe.probe(&file.path, arch, options, timeout))
        .collect();

    match probed {
        Ok(results) => {
            let architecture_results: BTreeMap<String, ArchitectureResult> =
                results.into_iter().map(|r| (r.architecture.clone(), r)).collect();
            let record = FileResult::complete(path, file.uid.clone(), architecture_results);
            info!(
                uid = %record.uid,
                executable = record.executable,
                architectures = ?record.executable_architectures(),
                "file analyzed"
            );
            record
        }
        Err(e) => {
            error!(uid = %file.uid, path = %path, error = %e, "file analysis aborted");
            FileResult::incomplete(path, file.uid.clone(), e.to_string())
        }
    }
}

/// Deduplicated candidates in first-seen order, or `None` when the list is malformed.
fn normalize_candidates(candidates: &[String]) -> Option<Vec<&str>> {
    if candidates.is_empty() || candidates.iter().any(|c| c.trim().is_empty()) {
        return None;
    }
    let mut seen = HashSet::new();
    Some(candidates.iter().map(|c| c.trim()).filter(|c| seen.insert(*c)).collect())
}

/// Run a full analysis with engine-config defaults and assemble the report.
pub fn analyze_firmware(
    config: &EngineConfig,
    backend: &dyn EmulationBackend,
    files: &[FirmwareFile],
    parent_flag: bool,
) -> Result<AnalysisResult, AnalyzerError> {
    let analyzer =
        FileAnalyzer::new(backend, &config.policy, AnalyzerSettings::from_config(config))?;
    let results =
        analyzer.analyze(files, &config.default_architectures, &config.options, config.timeout());
    Ok(report::assemble(results, parent_flag))
}
