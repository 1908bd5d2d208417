//! Core data model for emulated execution results.
//!
//! Records flow bottom-up:
//! - `ExecutionAttempt`: one emulator run for an (architecture, option) pair.
//! - `TraceResult`: the single syscall-traced run of an architecture.
//! - `ArchitectureResult`: every attempt plus the trace for one architecture.
//! - `FileResult`: all probed architectures for one extracted file.
//! - `AnalysisResult`: every file of one firmware image, keyed by uid.
//!
//! All records are plain values; once produced they are never mutated by the engine.

mod encoding;

use std::collections::BTreeMap;
use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Result of running the target once under one architecture with one invocation option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    pub architecture: String,
    /// The argument passed to the target; empty means it ran without arguments.
    pub invocation_option: String,
    #[serde(with = "encoding::text_bytes")]
    pub stdout: Vec<u8>,
    #[serde(with = "encoding::text_bytes")]
    pub stderr: Vec<u8>,
    /// Exit code, `128 + signal` for signal deaths, or a negative sentinel from
    /// [`crate::policy`].
    pub return_code: i32,
    #[serde(rename = "duration_ms", with = "encoding::duration_ms")]
    pub duration: Duration,
}

impl ExecutionAttempt {
    pub fn timed_out(&self) -> bool {
        self.return_code == crate::policy::TIMEOUT_RETURN_CODE
    }
}

/// Output of the traced run of one architecture.
///
/// `raw_trace` holds zstd-compressed bytes when non-empty and is empty otherwise,
/// so consumers can decide whether to decompress from emptiness alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceResult {
    pub architecture: String,
    #[serde(with = "encoding::hex_bytes")]
    pub raw_trace: Vec<u8>,
    pub compressed: bool,
}

impl TraceResult {
    /// A trace that produced nothing (launch failure or silent run).
    pub fn empty(architecture: impl Into<String>) -> Self {
        Self { architecture: architecture.into(), raw_trace: Vec::new(), compressed: false }
    }

    /// Compress a captured trace for storage. Empty input stays empty.
    pub fn from_raw(architecture: impl Into<String>, raw: &[u8]) -> io::Result<Self> {
        if raw.is_empty() {
            return Ok(Self::empty(architecture));
        }
        let compressed = zstd::stream::encode_all(raw, TRACE_COMPRESSION_LEVEL)?;
        Ok(Self { architecture: architecture.into(), raw_trace: compressed, compressed: true })
    }

    pub fn is_empty(&self) -> bool {
        self.raw_trace.is_empty()
    }

    /// Recover the original trace text bytes.
    pub fn decompressed(&self) -> io::Result<Vec<u8>> {
        if self.raw_trace.is_empty() {
            return Ok(Vec::new());
        }
        zstd::stream::decode_all(self.raw_trace.as_slice())
    }
}

/// zstd level used for stored traces.
pub const TRACE_COMPRESSION_LEVEL: i32 = 3;

/// Every attempt and the trace collected for one candidate architecture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectureResult {
    pub architecture: String,
    /// One attempt per configured option, in configured order.
    pub attempts: Vec<ExecutionAttempt>,
    pub trace: TraceResult,
    /// Whether any attempt ended outside the failure-sentinel set.
    pub executable: bool,
}

/// Completion state of a file's analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FileStatus {
    Complete,
    /// The analysis for this file was aborted; results may be partial or missing.
    Incomplete { reason: String },
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Complete => "complete",
            FileStatus::Incomplete { .. } => "incomplete",
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, FileStatus::Complete)
    }
}

/// Per-file record produced by the file analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResult {
    pub path: String,
    pub uid: String,
    pub executable: bool,
    pub architecture_results: BTreeMap<String, ArchitectureResult>,
    pub status: FileStatus,
}

impl FileResult {
    /// Build a complete record; `executable` is derived from the architecture signals.
    pub fn complete(
        path: impl Into<String>,
        uid: impl Into<String>,
        architecture_results: BTreeMap<String, ArchitectureResult>,
    ) -> Self {
        let executable = architecture_results.values().any(|r| r.executable);
        Self {
            path: path.into(),
            uid: uid.into(),
            executable,
            architecture_results,
            status: FileStatus::Complete,
        }
    }

    pub fn incomplete(
        path: impl Into<String>,
        uid: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            uid: uid.into(),
            executable: false,
            architecture_results: BTreeMap::new(),
            status: FileStatus::Incomplete { reason: reason.into() },
        }
    }

    /// Architectures under which at least one run looked like a real execution.
    pub fn executable_architectures(&self) -> Vec<&str> {
        self.architecture_results
            .values()
            .filter(|r| r.executable)
            .map(|r| r.architecture.as_str())
            .collect()
    }
}

/// Final record for one analysis run of a firmware image.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub files: BTreeMap<String, FileResult>,
    /// Set for container images whose children are analyzed out of band.
    pub parent_flag: bool,
}

impl AnalysisResult {
    pub fn executable_count(&self) -> usize {
        self.files.values().filter(|f| f.executable).count()
    }

    pub fn incomplete_count(&self) -> usize {
        self.files.values().filter(|f| !f.status.is_complete()).count()
    }

    /// Merge a partial `files` mapping fetched out of band.
    ///
    /// Records already present are kept; returns how many new files were added.
    pub fn merge(&mut self, partial: BTreeMap<String, FileResult>) -> usize {
        let mut added = 0;
        for (uid, file) in partial {
            if let std::collections::btree_map::Entry::Vacant(slot) = self.files.entry(uid) {
                slot.insert(file);
                added += 1;
            }
        }
        added
    }
}
