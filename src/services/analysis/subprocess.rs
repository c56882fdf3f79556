//! Subprocess Executor
//!
//! Runs a local CLI tool as a single non-interactive invocation: prompt on
//! stdin, JSON on stdout. Both output pipes are drained on their own tasks
//! from the moment the child is spawned, so a chatty child can never block on
//! a full pipe while we wait for it to exit. The child leads its own process
//! group, and a timeout terminates the whole group within the grace period.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};

use super::error::{AnalysisError, AnalysisResult};

/// Largest stdin payload accepted before spawning
pub const MAX_STDIN_BYTES: usize = 500 * 1024;

/// Default hard wall-clock limit for one invocation
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Time allowed between SIGTERM and force-kill, and for draining pipes afterwards
pub const DEFAULT_GRACE: Duration = Duration::from_secs(3);

/// Share of the grace period kept for SIGKILL and the final reap
const KILL_RESERVE: Duration = Duration::from_millis(250);

const STDERR_EXCERPT_CHARS: usize = 2000;

type DrainTask = JoinHandle<std::io::Result<Vec<u8>>>;

/// Captured output of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Executor for one-shot CLI invocations
#[derive(Debug, Clone)]
pub struct SubprocessExecutor {
    timeout: Duration,
    grace: Duration,
    max_stdin_bytes: usize,
    working_dir: Option<PathBuf>,
}

impl Default for SubprocessExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl SubprocessExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            grace: DEFAULT_GRACE,
            max_stdin_bytes: MAX_STDIN_BYTES,
            working_dir: None,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_max_stdin_bytes(mut self, max: usize) -> Self {
        self.max_stdin_bytes = max;
        self
    }

    /// Directory the child runs in (defaults to the current directory)
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `tool_path args...`, feeding `stdin`, bounded by the configured timeout.
    pub async fn run(
        &self,
        tool_path: &Path,
        args: &[String],
        stdin: &str,
    ) -> AnalysisResult<ProcessOutput> {
        if stdin.len() > self.max_stdin_bytes {
            return Err(AnalysisError::PayloadTooLarge(format!(
                "stdin is {} bytes, limit is {}",
                stdin.len(),
                self.max_stdin_bytes
            )));
        }

        let mut cmd = Command::new(tool_path);
        cmd.args(args)
            .env("NO_COLOR", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so grandchildren holding the pipes are signalled too.
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AnalysisError::ToolNotFound(tool_path.display().to_string())
            } else {
                AnalysisError::ToolNotFound(format!(
                    "failed to spawn {}: {}",
                    tool_path.display(),
                    e
                ))
            }
        })?;

        debug!(
            tool = %tool_path.display(),
            pid = child.id().unwrap_or(0),
            stdin_bytes = stdin.len(),
            "Spawned analysis CLI"
        );

        // Drains start before anything waits on the child.
        let stdout_task = child.stdout.take().map(|mut out| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                out.read_to_end(&mut buf).await.map(|_| buf)
            })
        });
        let stderr_task = child.stderr.take().map(|mut err| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                err.read_to_end(&mut buf).await.map(|_| buf)
            })
        });

        if let Some(mut pipe) = child.stdin.take() {
            let input = stdin.as_bytes().to_vec();
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&input).await {
                    debug!("stdin write ended early: {}", e);
                }
                let _ = pipe.shutdown().await;
            });
        }

        let status = match timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                let deadline = Instant::now() + self.grace;
                self.terminate_then_kill(&mut child, deadline).await;
                collect_both(stdout_task, stderr_task, deadline).await;
                return Err(AnalysisError::NonZeroExit {
                    code: None,
                    stderr: format!("failed to wait for {}: {}", tool_path.display(), e),
                });
            }
            Err(_) => {
                warn!(
                    tool = %tool_path.display(),
                    timeout_secs = self.timeout.as_secs_f64(),
                    "Analysis CLI timed out, terminating"
                );
                let deadline = Instant::now() + self.grace;
                self.terminate_then_kill(&mut child, deadline).await;
                collect_both(stdout_task, stderr_task, deadline).await;
                return Err(AnalysisError::Timeout(self.timeout));
            }
        };

        let (stdout, stderr) =
            collect_both(stdout_task, stderr_task, Instant::now() + self.grace).await;
        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();

        if !status.success() {
            return Err(AnalysisError::NonZeroExit {
                code: status.code(),
                stderr: stderr_excerpt(&stderr),
            });
        }

        Ok(ProcessOutput {
            stdout,
            stderr,
            exit_code: status.code(),
        })
    }

    /// SIGTERM the process group, wait, then force-kill it. Everything,
    /// including the final reap, finishes by `deadline`.
    async fn terminate_then_kill(&self, child: &mut Child, deadline: Instant) {
        let pgid = child.id();
        signal_group(pgid, GroupSignal::Terminate);

        let kill_at = deadline - (self.grace / 4).min(KILL_RESERVE);
        if timeout_at(kill_at, child.wait()).await.is_ok() {
            // The leader is gone but stragglers in its group may not be.
            signal_group(pgid, GroupSignal::Kill);
            return;
        }

        signal_group(pgid, GroupSignal::Kill);
        let _ = child.start_kill();
        let _ = timeout_at(deadline, child.wait()).await;
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(pgid: Option<u32>, signal: GroupSignal) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = pgid else {
        return;
    };
    let signal = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    if let Err(e) = killpg(Pid::from_raw(pgid as i32), signal) {
        debug!(pgid, error = %e, "killpg failed");
    }
}

#[cfg(not(unix))]
fn signal_group(_pgid: Option<u32>, _signal: GroupSignal) {}

/// Await both drain tasks together until `deadline`, aborting whatever is left.
async fn collect_both(
    stdout: Option<DrainTask>,
    stderr: Option<DrainTask>,
    deadline: Instant,
) -> (Vec<u8>, Vec<u8>) {
    tokio::join!(collect(stdout, deadline), collect(stderr, deadline))
}

async fn collect(task: Option<DrainTask>, deadline: Instant) -> Vec<u8> {
    let Some(mut handle) = task else {
        return Vec::new();
    };
    match timeout_at(deadline, &mut handle).await {
        Ok(Ok(Ok(buf))) => buf,
        Ok(Ok(Err(e))) => {
            debug!("pipe read failed: {}", e);
            Vec::new()
        }
        Ok(Err(e)) => {
            debug!("pipe drain task failed: {}", e);
            Vec::new()
        }
        Err(_) => {
            handle.abort();
            Vec::new()
        }
    }
}

/// Tail of stderr, which is where CLIs put the actual error
fn stderr_excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let tail: String = trimmed.chars().skip(count - STDERR_EXCERPT_CHARS).collect();
    format!("…{}", tail)
}
