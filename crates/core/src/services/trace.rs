use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use crate::model::TraceResult;
use crate::services::emulator::{EmulationBackend, Invocation};
use crate::services::process::run_with_timeout;

/// Default cap on raw trace bytes kept per architecture before compression.
pub const DEFAULT_TRACE_LIMIT: usize = 64 * 1024 * 1024;

/// Best-effort syscall tracing, independent of the option runs.
pub struct TraceCollector<'a> {
    pub backend: &'a dyn EmulationBackend,
    pub trace_limit: usize,
}

impl<'a> TraceCollector<'a> {
    pub fn new(backend: &'a dyn EmulationBackend) -> Self {
        Self { backend, trace_limit: DEFAULT_TRACE_LIMIT }
    }

    /// Run the target once with tracing and return the compressed trace.
    ///
    /// Never fails: a traced run that cannot start yields an empty trace. A run that
    /// times out keeps whatever it logged before it was killed.
    pub fn trace(&self, binary: &Path, architecture: &str, timeout: Duration) -> TraceResult {
        if !binary.is_file() {
            warn!(architecture, binary = %binary.display(), "trace skipped: binary missing");
            return TraceResult::empty(architecture);
        }

        let invocation = Invocation { binary, architecture, option: "" };
        let mut cmd = self.backend.trace_command(&invocation);
        let output = match run_with_timeout(&mut cmd, timeout, self.trace_limit) {
            Ok(output) => output,
            Err(e) => {
                warn!(
                    architecture,
                    emulator = %self.backend.emulator_path(architecture).display(),
                    error = %e,
                    "traced run failed to launch"
                );
                return TraceResult::empty(architecture);
            }
        };

        debug!(
            architecture,
            trace_bytes = output.stderr.len(),
            timed_out = output.timed_out,
            truncated = output.truncated,
            "traced run finished"
        );

        TraceResult::from_raw(architecture, &output.stderr).unwrap_or_else(|e| {
            warn!(architecture, error = %e, "trace compression failed");
            TraceResult::empty(architecture)
        })
    }
}
