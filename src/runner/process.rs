//! Bounded Process Runner
//!
//! Runs one shell command with a hard wall-clock deadline and captures its
//! output up to a size ceiling.
//!
//! The deadline applies to the process's exit status, not to its pipes: a
//! command that exits but leaves a background child holding stdout (`pg_ctl
//! start`, `cmd &`) still completes, and the remaining output is drained for
//! a short grace period only.

use crate::error::{ElevateError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command as TokioCommand};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Maximum captured output per stream in bytes (1MB)
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// How long to wait for a killed child to be reaped
const REAP_GRACE: Duration = Duration::from_secs(2);

/// How long a timed-out process group gets between SIGTERM and SIGKILL
const TERM_GRACE: Duration = Duration::from_millis(500);

/// How long output pipes may stay open after the process exited
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured output of a successful run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Standard output (truncated if too large)
    pub stdout: String,

    /// Standard error (truncated if too large)
    pub stderr: String,

    /// Exit code (None if terminated by a signal)
    pub exit_code: Option<i32>,

    /// Execution duration in milliseconds
    pub duration_ms: f64,

    /// Whether either stream hit the output ceiling
    pub truncated: bool,
}

impl ExecutionResult {
    /// Result with the given stdout and an exit code of zero
    pub fn from_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            exit_code: Some(0),
            ..Default::default()
        }
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "exit code {:?}, {:.0}ms, {} bytes output{}",
            self.exit_code,
            self.duration_ms,
            self.stdout.len() + self.stderr.len(),
            if self.truncated { ", truncated" } else { "" }
        )
    }
}

/// Anything that can run a shell command under a deadline
///
/// The production implementation is [`BoundedRunner`]; tests substitute
/// scripted runners.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `command` and wait at most `timeout` for it to exit
    ///
    /// # Errors
    ///
    /// - `TimeoutExceeded` if the process is still running at the deadline
    /// - `ProcessError` if it exits non-zero or cannot be spawned
    async fn run(&self, command: &str, timeout: Duration) -> Result<ExecutionResult>;

    /// Like [`run`](Self::run), but the command stays in the caller's
    /// foreground process group so an elevation tool can prompt on the
    /// terminal
    async fn run_attached(&self, command: &str, timeout: Duration) -> Result<ExecutionResult> {
        self.run(command, timeout).await
    }
}

/// Configuration for the bounded runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum output size per stream in bytes (default: 1MB)
    pub max_output_size: usize,

    /// Shell used to interpret command strings (default: "sh")
    pub shell: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_output_size: MAX_OUTPUT_SIZE,
            shell: "sh".to_string(),
        }
    }
}

impl RunnerConfig {
    /// Create a runner config with custom output limit
    pub fn with_max_output_size(size: usize) -> Self {
        Self {
            max_output_size: size,
            ..Default::default()
        }
    }
}

/// Runs commands through `sh -c` with a deadline
///
/// stdin is always `/dev/null`: a prompt can never be answered through the
/// pipe, so a command stuck on one simply runs into the deadline.
///
/// `run` starts the shell in a new process group. On timeout the whole group
/// gets SIGTERM (which sudo relays to the command it runs), then SIGKILL,
/// and the shell is reaped before returning. `run_attached` leaves the shell
/// in the foreground group for the terminal prompt, so only the shell itself
/// is killed.
#[derive(Debug, Clone, Default)]
pub struct BoundedRunner {
    config: RunnerConfig,
}

impl BoundedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    async fn run_bounded(
        &self,
        command: &str,
        timeout: Duration,
        isolate: bool,
    ) -> Result<ExecutionResult> {
        let start = Instant::now();
        debug!("Running with {:?} deadline: {}", timeout, command);

        let mut process = TokioCommand::new(&self.config.shell);
        process
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if isolate {
            new_process_group(&mut process);
        }

        let mut child = process
            .spawn()
            .map_err(|e| ElevateError::spawn(command, e))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.config.max_output_size;
        let (exited_tx, exited_rx) = watch::channel(false);

        let waiter = async {
            let outcome = tokio::time::timeout(timeout, child.wait()).await;
            if outcome.is_err() {
                warn!("Command still running after {:?}, killing: {}", timeout, command);
                terminate(&mut child, isolate).await;
            }
            let _ = exited_tx.send(true);
            outcome
        };

        let (stdout, stderr, outcome) = tokio::join!(
            read_capped(stdout, limit, exited_rx.clone()),
            read_capped(stderr, limit, exited_rx),
            waiter
        );

        let status = match outcome {
            Ok(status) => status.map_err(|e| ElevateError::ProcessError {
                command: command.to_string(),
                exit_code: None,
                message: format!("Failed to wait for process: {}", e),
            })?,
            Err(_) => {
                return Err(ElevateError::TimeoutExceeded {
                    command: command.to_string(),
                    timeout,
                });
            }
        };
        let (stdout, stdout_truncated) = stdout.map_err(|e| io_failure(command, e))?;
        let (stderr, stderr_truncated) = stderr.map_err(|e| io_failure(command, e))?;

        let result = ExecutionResult {
            stdout: finish_stream(stdout, stdout_truncated),
            stderr: finish_stream(stderr, stderr_truncated),
            exit_code: status.code(),
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
            truncated: stdout_truncated || stderr_truncated,
        };

        if status.success() {
            debug!("Command succeeded ({}): {}", result.summary(), command);
            Ok(result)
        } else {
            let message = if result.stderr.trim().is_empty() {
                result.stdout.trim().to_string()
            } else {
                result.stderr.trim().to_string()
            };
            Err(ElevateError::ProcessError {
                command: command.to_string(),
                exit_code: result.exit_code,
                message,
            })
        }
    }
}

#[async_trait]
impl ProcessRunner for BoundedRunner {
    async fn run(&self, command: &str, timeout: Duration) -> Result<ExecutionResult> {
        self.run_bounded(command, timeout, true).await
    }

    async fn run_attached(&self, command: &str, timeout: Duration) -> Result<ExecutionResult> {
        self.run_bounded(command, timeout, false).await
    }
}

#[cfg(unix)]
fn new_process_group(process: &mut TokioCommand) {
    process.process_group(0);
}

#[cfg(not(unix))]
fn new_process_group(_process: &mut TokioCommand) {}

/// Stop a timed-out child and reap it
async fn terminate(child: &mut Child, isolated: bool) {
    if isolated {
        stop_group(child).await;
    }
    // already gone after a group kill; this covers the attached case
    let _ = child.start_kill();
    if tokio::time::timeout(REAP_GRACE, child.wait()).await.is_err() {
        warn!("Killed child was not reaped within {:?}", REAP_GRACE);
    }
}

/// SIGTERM the child's process group, then SIGKILL whatever is left
///
/// sudo forwards SIGTERM to the command it runs but cannot forward SIGKILL,
/// and a command running as another account cannot be signalled directly.
#[cfg(unix)]
async fn stop_group(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    let group = Pid::from_raw(pid as i32);

    if let Err(e) = killpg(group, Signal::SIGTERM) {
        debug!("SIGTERM to process group {} failed: {}", pid, e);
    }
    let _ = tokio::time::timeout(TERM_GRACE, child.wait()).await;
    if let Err(e) = killpg(group, Signal::SIGKILL) {
        debug!("SIGKILL to process group {} failed: {}", pid, e);
    }
}

#[cfg(not(unix))]
async fn stop_group(_child: &mut Child) {}

fn io_failure(command: &str, err: std::io::Error) -> ElevateError {
    ElevateError::ProcessError {
        command: command.to_string(),
        exit_code: None,
        message: format!("Failed to read process output: {}", err),
    }
}

/// Read a stream to EOF, keeping at most `limit` bytes
///
/// Bytes past the limit are drained and discarded so the child never blocks
/// on a full pipe. Once `exited` flips, reading stops after [`DRAIN_GRACE`]
/// even if a leftover descendant still holds the pipe open.
async fn read_capped<R>(
    reader: Option<R>,
    limit: usize,
    mut exited: watch::Receiver<bool>,
) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut truncated = false;
    let Some(mut reader) = reader else {
        return Ok((buf, truncated));
    };

    let drain_deadline = async move {
        let _ = exited.wait_for(|done| *done).await;
        tokio::time::sleep(DRAIN_GRACE).await;
    };
    tokio::pin!(drain_deadline);

    let mut chunk = [0u8; 8192];
    loop {
        tokio::select! {
            read = reader.read(&mut chunk) => {
                let n = read?;
                if n == 0 {
                    break;
                }
                let room = limit.saturating_sub(buf.len());
                if n > room {
                    truncated = true;
                }
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
            _ = &mut drain_deadline => {
                debug!("Output pipe still open {:?} after exit, leaving it to the background process", DRAIN_GRACE);
                break;
            }
        }
    }

    Ok((buf, truncated))
}

fn finish_stream(bytes: Vec<u8>, truncated: bool) -> String {
    let mut s = String::from_utf8_lossy(&bytes).into_owned();
    if truncated {
        s.push_str("...");
    }
    s
}
