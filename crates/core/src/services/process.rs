//! Timed subprocess execution with guaranteed teardown.
//!
//! Every child is spawned into its own process group so that a timeout kills the
//! emulator together with anything it forked. The child is owned by a guard that
//! kills and reaps it on drop. Descendants that leave the group (`setsid`
//! daemons) cannot be reached by the group kill; their hold on the output pipes
//! is bounded by the same timeout instead.

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use crate::policy::{SIGNAL_EXIT_BASE, TIMEOUT_RETURN_CODE};

/// Interval between liveness checks while waiting on a child.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long past the timeout the output streams may stay open after the child is gone.
pub const READER_GRACE: Duration = Duration::from_millis(250);

/// What a finished (or killed) child left behind.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
    /// Either stream hit the capture limit; the excess was drained and dropped.
    pub truncated: bool,
    pub duration: Duration,
}

impl ProcessOutput {
    /// Collapse the exit status into a single integer.
    ///
    /// Timeouts map to [`TIMEOUT_RETURN_CODE`]; signal deaths map to `128 + signal`.
    pub fn return_code(&self) -> i32 {
        if self.timed_out {
            return TIMEOUT_RETURN_CODE;
        }
        if let Some(code) = self.status.code() {
            return code;
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt as _;
            if let Some(signal) = self.status.signal() {
                return SIGNAL_EXIT_BASE + signal;
            }
        }
        SIGNAL_EXIT_BASE
    }
}

/// Owns a spawned child and tears its process group down unless it was reaped.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn spawn(cmd: &mut Command) -> io::Result<Self> {
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt as _;
            cmd.process_group(0);
        }
        let child = cmd.spawn()?;
        Ok(Self { child, reaped: false })
    }

    /// Whether the direct child has exited, without reaping it.
    ///
    /// While the exited leader is unreaped its pid (and so its process group id)
    /// cannot be handed to another process, which keeps `signal_group` safe.
    #[cfg(target_os = "linux")]
    fn has_exited(&mut self) -> io::Result<bool> {
        let pid = libc::id_t::from(self.child.id());
        // SAFETY: siginfo_t is plain data; waitid only writes into it.
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        // SAFETY: `info` is a valid, writable siginfo_t for the duration of the call.
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid,
                &mut info,
                libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
            )
        };
        if rc == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }
        // SAFETY: waitid filled `info` (or left it zeroed when nothing changed).
        Ok(unsafe { info.si_pid() } != 0)
    }

    #[cfg(not(target_os = "linux"))]
    fn has_exited(&mut self) -> io::Result<bool> {
        let status = self.child.try_wait()?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status.is_some())
    }

    /// Kill whatever is left of the group, then reap the exited leader.
    fn finish(&mut self) -> io::Result<ExitStatus> {
        if !self.reaped {
            self.signal_group();
        }
        let status = self.child.wait()?;
        self.reaped = true;
        Ok(status)
    }

    /// Kill the whole process group, then reap the direct child.
    fn kill(&mut self) -> io::Result<ExitStatus> {
        self.signal_group();
        let _ = self.child.kill();
        let status = self.child.wait()?;
        self.reaped = true;
        Ok(status)
    }

    #[cfg(unix)]
    fn signal_group(&self) {
        if let Ok(pgid) = libc::pid_t::try_from(self.child.id()) {
            // SAFETY: killpg has no memory-safety preconditions; the group id is the
            // child's pid because it was spawned with process_group(0).
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&self) {}
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            self.signal_group();
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Bytes captured from one stream so far; shared with its reader thread.
#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: bool,
}

/// A stream reader running on its own thread.
///
/// The thread reports completion over a channel, so the caller can give up on it
/// and still keep whatever it captured.
struct StreamReader {
    capture: Arc<Mutex<Capture>>,
    done: Receiver<io::Result<()>>,
}

impl StreamReader {
    fn spawn<R: Read + Send + 'static>(name: &str, reader: R, limit: usize) -> io::Result<Self> {
        let capture = Arc::new(Mutex::new(Capture::default()));
        let (tx, done) = mpsc::channel();
        let sink = Arc::clone(&capture);
        thread::Builder::new().name(name.to_string()).spawn(move || {
            let _ = tx.send(read_capped_into(reader, limit, &sink));
        })?;
        Ok(Self { capture, done })
    }

    /// Wait for EOF until `deadline`; returns `false` when the stream is still open.
    fn wait_until(&self, deadline: Instant) -> io::Result<bool> {
        match self.done.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(result) => result.map(|()| true),
            Err(RecvTimeoutError::Timeout) => Ok(false),
            // The reader thread died without reporting; keep what it captured.
            Err(RecvTimeoutError::Disconnected) => Ok(true),
        }
    }

    fn take(&self) -> (Vec<u8>, bool) {
        let mut capture = self.capture.lock();
        (std::mem::take(&mut capture.bytes), capture.truncated)
    }
}

/// Run `cmd` to completion or until `timeout` elapses, capturing both streams.
///
/// Each stream keeps at most `output_limit` bytes. Output is collected until the
/// streams close or `timeout` plus [`READER_GRACE`] has passed, whichever comes
/// first; a descendant that escaped the process group and keeps a stream open
/// past that point turns the run into a timeout with the output captured so far.
/// Spawn failures are returned as-is so callers can tell a missing emulator from
/// an exhausted process table.
pub fn run_with_timeout(
    cmd: &mut Command,
    timeout: Duration,
    output_limit: usize,
) -> io::Result<ProcessOutput> {
    let start = Instant::now();
    let mut guard = ChildGuard::spawn(cmd)?;

    let stdout = guard.child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
    let stderr = guard.child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;
    let stdout_reader = StreamReader::spawn("emuexec-stdout", stdout, output_limit)?;
    let stderr_reader = StreamReader::spawn("emuexec-stderr", stderr, output_limit)?;

    let (status, mut timed_out) = loop {
        if guard.has_exited()? {
            break (guard.finish()?, false);
        }
        if start.elapsed() >= timeout {
            break (guard.kill()?, true);
        }
        thread::sleep(POLL_INTERVAL);
    };
    let mut duration = start.elapsed();

    let reader_deadline = start + timeout + READER_GRACE;
    let stdout_closed = stdout_reader.wait_until(reader_deadline)?;
    let stderr_closed = stderr_reader.wait_until(reader_deadline)?;
    if !(stdout_closed && stderr_closed) {
        warn!(
            timeout_ms = timeout.as_millis() as u64,
            "output stream held open by a detached descendant; abandoning reader"
        );
        timed_out = true;
        duration = start.elapsed();
    }

    let (stdout, stdout_truncated) = stdout_reader.take();
    let (stderr, stderr_truncated) = stderr_reader.take();

    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        timed_out,
        truncated: stdout_truncated || stderr_truncated,
        duration,
    })
}

fn missing_pipe(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("child {name} pipe was not captured"))
}

/// Read until EOF, keeping the first `limit` bytes and draining the rest so the
/// child never blocks on a full pipe.
pub fn read_capped<R: Read>(reader: R, limit: usize) -> io::Result<(Vec<u8>, bool)> {
    let capture = Mutex::new(Capture::default());
    read_capped_into(reader, limit, &capture)?;
    let capture = capture.into_inner();
    Ok((capture.bytes, capture.truncated))
}

fn read_capped_into<R: Read>(
    mut reader: R,
    limit: usize,
    sink: &Mutex<Capture>,
) -> io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let mut capture = sink.lock();
        let room = limit.saturating_sub(capture.bytes.len());
        if n > room {
            capture.truncated = true;
        }
        capture.bytes.extend_from_slice(&chunk[..n.min(room)]);
    }
}

/// Whether a spawn error means the host ran out of processes, descriptors, or memory.
pub fn is_resource_exhaustion(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        matches!(
            err.raw_os_error(),
            Some(libc::EAGAIN) | Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOMEM)
        )
    }
    #[cfg(not(unix))]
    {
        err.kind() == io::ErrorKind::OutOfMemory
    }
}
