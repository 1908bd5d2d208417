use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::model::ExecutionAttempt;
use crate::policy::{ExecutionPolicy, LAUNCH_FAILURE_RETURN_CODE};
use crate::services::emulator::{EmulationBackend, Invocation};
use crate::services::process::{is_resource_exhaustion, run_with_timeout};

/// Default cap on captured stdout/stderr per attempt.
pub const DEFAULT_OUTPUT_LIMIT: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Binary not found at {0}")]
    MissingBinary(PathBuf),
    #[error("Failed to launch emulator {emulator}: {source}")]
    Launch {
        emulator: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Host resources exhausted while launching {emulator}: {source}")]
    ResourceExhausted {
        emulator: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RunError {
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, RunError::ResourceExhausted { .. })
    }
}

/// Runs the target once per call under the configured backend.
pub struct EmulationRunner<'a> {
    pub backend: &'a dyn EmulationBackend,
    pub policy: &'a ExecutionPolicy,
    pub output_limit: usize,
}

impl<'a> EmulationRunner<'a> {
    pub fn new(backend: &'a dyn EmulationBackend, policy: &'a ExecutionPolicy) -> Self {
        Self { backend, policy, output_limit: DEFAULT_OUTPUT_LIMIT }
    }

    /// Run `binary` under `architecture` with `option` as its only argument.
    ///
    /// Crashes, non-zero exits, and timeouts are normal outcomes recorded in the
    /// attempt; only a failure to start the emulator is an error.
    pub fn run(
        &self,
        binary: &Path,
        architecture: &str,
        option: &str,
        timeout: Duration,
    ) -> Result<ExecutionAttempt, RunError> {
        if !binary.is_file() {
            return Err(RunError::MissingBinary(binary.to_path_buf()));
        }

        let invocation = Invocation { binary, architecture, option };
        let mut cmd = self.backend.command(&invocation);
        let output = run_with_timeout(&mut cmd, timeout, self.output_limit)
            .map_err(|e| spawn_error(self.backend.emulator_path(architecture), e))?;

        let raw_code = output.return_code();
        let return_code = self.policy.normalize_return_code(raw_code, &output.stderr);
        debug!(
            architecture,
            option,
            raw_code,
            return_code,
            timed_out = output.timed_out,
            elapsed_ms = output.duration.as_millis() as u64,
            "emulation attempt finished"
        );

        Ok(ExecutionAttempt {
            architecture: architecture.to_string(),
            invocation_option: option.to_string(),
            stdout: output.stdout,
            stderr: output.stderr,
            return_code,
            duration: output.duration,
        })
    }
}

pub(crate) fn spawn_error(emulator: PathBuf, source: io::Error) -> RunError {
    if is_resource_exhaustion(&source) {
        RunError::ResourceExhausted { emulator, source }
    } else {
        RunError::Launch { emulator, source }
    }
}

/// Attempt recorded in place of a run whose emulator could not be started.
pub fn launch_failure_attempt(
    architecture: &str,
    option: &str,
    error: &RunError,
) -> ExecutionAttempt {
    ExecutionAttempt {
        architecture: architecture.to_string(),
        invocation_option: option.to_string(),
        stdout: Vec::new(),
        stderr: error.to_string().into_bytes(),
        return_code: LAUNCH_FAILURE_RETURN_CODE,
        duration: Duration::ZERO,
    }
}
