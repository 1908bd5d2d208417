use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::ExecutionPolicy;
use crate::services::emulator::default_targets;
use crate::services::runner::DEFAULT_OUTPUT_LIMIT;
use crate::services::trace::DEFAULT_TRACE_LIMIT;

/// Invocation variants tried against every binary when none are configured.
pub const DEFAULT_OPTIONS: &[&str] = &["-h", "--help", "-help", "--version", ""];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_concurrent_emulations must be at least 1")]
    NoWorkers,
    #[error("timeout_secs must be greater than zero")]
    ZeroTimeout,
    #[error("at least one invocation option is required")]
    NoOptions,
}

/// Database configuration (path is typically relative to the workspace root).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub path: String,
}

impl DbConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::new(".emuexec/results.db")
    }
}

/// Where emulators live and how architecture names map onto them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Directory holding `qemu-<target>` binaries; `None` resolves through `PATH`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Prefix passed as `-L` so dynamically linked targets find their loader.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_root: Option<PathBuf>,
    /// Architecture name to qemu target suffix.
    pub targets: BTreeMap<String, String>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self { dir: None, library_root: None, targets: default_targets() }
    }
}

/// Engine configuration, stored at `.emuexec/config.json` in a workspace.
///
/// Every field has a default so partial files are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Schema/config version. This is about the config format, not the engine version.
    pub config_version: String,
    /// Invocation options in the order attempts are recorded.
    pub options: Vec<String>,
    /// Candidates used for files that arrive without architecture hints.
    pub default_architectures: Vec<String>,
    pub timeout_secs: u64,
    pub trace_timeout_secs: u64,
    pub trace_enabled: bool,
    /// Upper bound on emulator subprocesses alive at the same time.
    pub max_concurrent_emulations: usize,
    pub max_output_bytes: usize,
    pub max_trace_bytes: usize,
    pub emulator: EmulatorConfig,
    pub policy: ExecutionPolicy,
    pub db: DbConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            config_version: "0.1.0".to_string(),
            options: DEFAULT_OPTIONS.iter().map(|o| o.to_string()).collect(),
            default_architectures: Vec::new(),
            timeout_secs: 5,
            trace_timeout_secs: 10,
            trace_enabled: true,
            max_concurrent_emulations: default_worker_count(),
            max_output_bytes: DEFAULT_OUTPUT_LIMIT,
            max_trace_bytes: DEFAULT_TRACE_LIMIT,
            emulator: EmulatorConfig::default(),
            policy: ExecutionPolicy::default(),
            db: DbConfig::default(),
        }
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

impl EngineConfig {
    pub fn with_db_path(mut self, path: impl Into<String>) -> Self {
        self.db = DbConfig::new(path);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn trace_timeout(&self) -> Duration {
        Duration::from_secs(self.trace_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_emulations == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.options.is_empty() {
            return Err(ConfigError::NoOptions);
        }
        Ok(())
    }

    /// Load a config file; `.yaml`/`.yml` are parsed as YAML, anything else as JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine config at {}", path.display()))?;
        let config: EngineConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&body).context("Failed to parse engine config YAML")?
            }
            _ => serde_json::from_str(&body).context("Failed to parse engine config JSON")?,
        };
        config.validate().with_context(|| format!("Invalid engine config at {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write engine config: {}", path.display()))
    }
}
