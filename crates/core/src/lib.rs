//! emuexec-core
//!
//! Core library for emulated multi-architecture execution of extracted firmware
//! files.
//!
//! Each file is run under a user-mode emulator for every candidate architecture
//! with a fixed list of invocation options, plus one syscall-traced run. The
//! per-attempt outcomes are aggregated into a per-file "is executable" signal and
//! an `AnalysisResult` that can be persisted in the workspace database.
//!
//! All substantive logic lives here so it is testable and reusable from multiple
//! frontends.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod policy;
pub mod services;

pub use config::EngineConfig;
pub use model::{AnalysisResult, ArchitectureResult, ExecutionAttempt, FileResult, TraceResult};
pub use services::analyzer::{analyze_firmware, FileAnalyzer, FirmwareFile};

/// Returns the library version as encoded at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
