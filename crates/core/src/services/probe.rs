use std::path::Path;
use std::time::Duration;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{ArchitectureResult, ExecutionAttempt, TraceResult};
use crate::services::runner::{launch_failure_attempt, EmulationRunner, RunError};
use crate::services::trace::TraceCollector;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Probing {architecture} aborted: {source}")]
    ResourceExhausted {
        architecture: String,
        #[source]
        source: RunError,
    },
}

/// Runs every invocation option (plus one traced run) for a single architecture.
///
/// Option runs and the traced run are scheduled on the current rayon pool; the
/// caller decides how many of them may be live at once by choosing that pool.
pub struct ArchitectureProbe<'a> {
    pub runner: EmulationRunner<'a>,
    /// `None` disables tracing; the result then carries an empty trace.
    pub tracer: Option<TraceCollector<'a>>,
    pub trace_timeout: Duration,
}

impl<'a> ArchitectureProbe<'a> {
    pub fn probe(
        &self,
        binary: &Path,
        architecture: &str,
        options: &[String],
        timeout: Duration,
    ) -> Result<ArchitectureResult, ProbeError> {
        let (attempts, trace) = rayon::join(
            || {
                options
                    .par_iter()
                    .map(|option| self.attempt(binary, architecture, option, timeout))
                    .collect::<Vec<_>>()
            },
            || self.trace(binary, architecture),
        );
        // Indexed collection keeps configured option order.
        let attempts = attempts.into_iter().collect::<Result<Vec<_>, _>>()?;

        let executable = attempts.iter().any(|a| self.runner.policy.is_success(a.return_code));
        debug!(architecture, executable, attempts = attempts.len(), "architecture probed");

        Ok(ArchitectureResult {
            architecture: architecture.to_string(),
            attempts,
            trace,
            executable,
        })
    }

    fn attempt(
        &self,
        binary: &Path,
        architecture: &str,
        option: &str,
        timeout: Duration,
    ) -> Result<ExecutionAttempt, ProbeError> {
        match self.runner.run(binary, architecture, option, timeout) {
            Ok(attempt) => Ok(attempt),
            Err(source) if source.is_resource_exhaustion() => Err(ProbeError::ResourceExhausted {
                architecture: architecture.to_string(),
                source,
            }),
            Err(e) => {
                warn!(architecture, option, error = %e, "emulator launch failed");
                Ok(launch_failure_attempt(architecture, option, &e))
            }
        }
    }

    fn trace(&self, binary: &Path, architecture: &str) -> TraceResult {
        match &self.tracer {
            Some(tracer) => tracer.trace(binary, architecture, self.trace_timeout),
            None => TraceResult::empty(architecture),
        }
    }
}
