//! Running toolchain executables with a bounded wall-clock timeout.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::ToolError;

/// How often a running child is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long output pipes are drained after the child exits.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// The outcome of one tool invocation.
///
/// A non-zero exit or a timeout is an ordinary, expected result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Standard output followed by standard error.
    pub output: String,
    /// Exit code, or `None` if the process was killed or terminated by a signal.
    pub exit_code: Option<i32>,
    /// Whether the invocation was killed for exceeding its timeout.
    pub timed_out: bool,
    /// Wall-clock duration.
    pub duration: Duration,
}

impl ToolOutput {
    /// A successful result with the given output.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            exit_code: Some(0),
            timed_out: false,
            duration: Duration::ZERO,
        }
    }

    /// A failed result with the given exit code and output.
    pub fn failed(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            exit_code: Some(exit_code),
            timed_out: false,
            duration: Duration::ZERO,
        }
    }

    /// Returns `true` if the tool exited with status zero.
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Runs a toolchain executable.
///
/// Implementations must be callable from several worker threads at once and
/// keep no state shared between invocations.
pub trait ToolInvoker: Send + Sync {
    /// Runs `tool` with `argv`, killing it after `timeout` if given.
    fn invoke(
        &self,
        tool: &Path,
        argv: &[String],
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, ToolError>;
}

/// Runs tools as child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessInvoker {
    cwd: Option<PathBuf>,
}

impl ProcessInvoker {
    /// Creates an invoker running tools in the current directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an invoker running tools in `cwd`.
    pub fn in_dir(cwd: &Path) -> Self {
        Self {
            cwd: Some(cwd.to_path_buf()),
        }
    }
}

impl ToolInvoker for ProcessInvoker {
    fn invoke(
        &self,
        tool: &Path,
        argv: &[String],
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, ToolError> {
        let mut cmd = Command::new(tool);
        cmd.args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        debug!(tool = %tool.display(), args = argv.len(), "invoking tool");

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| ToolError::Spawn {
            tool: tool.to_path_buf(),
            source: e,
        })?;
        let io_err = |e| ToolError::Io {
            tool: tool.to_path_buf(),
            source: e,
        };

        let stdout_rx = drain(child.stdout.take());
        let stderr_rx = drain(child.stderr.take());

        let (status, timed_out) = match wait_with_timeout(&mut child, timeout).map_err(io_err)? {
            Some(status) => (status, false),
            None => {
                warn!(tool = %tool.display(), "tool timed out; killing");
                let _ = child.kill();
                (child.wait().map_err(io_err)?, true)
            }
        };

        let deadline = Instant::now() + DRAIN_GRACE;
        let mut output = recv_until(&stdout_rx, deadline);
        output.extend(recv_until(&stderr_rx, deadline));

        Ok(ToolOutput {
            output: String::from_utf8_lossy(&output).into_owned(),
            exit_code: if timed_out { None } else { status.code() },
            timed_out,
            duration: start.elapsed(),
        })
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    if let Some(mut pipe) = pipe {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            let _ = tx.send(buffer);
        });
    }
    rx
}

fn recv_until(rx: &mpsc::Receiver<Vec<u8>>, deadline: Instant) -> Vec<u8> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    rx.recv_timeout(remaining).unwrap_or_default()
}

fn wait_with_timeout(
    child: &mut Child,
    timeout: Option<Duration>,
) -> std::io::Result<Option<ExitStatus>> {
    let Some(timeout) = timeout else {
        return child.wait().map(Some);
    };
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= timeout {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
