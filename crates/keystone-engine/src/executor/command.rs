//! Running the provisioning tool as a child process.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult, ExecutorStep};

/// How many trailing stderr lines end up in an error message.
const STDERR_TAIL_LINES: usize = 20;

/// Captured result of one tool invocation.
#[derive(Debug)]
pub struct ToolOutput {
    /// Exit code, or `-1` if the process was killed by a signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        self.code == 0
    }

    /// Exit status plus the tail of stderr.
    #[must_use]
    pub fn failure_message(&self) -> String {
        format!("exit status {}: {}", self.code, stderr_tail(&self.stderr))
    }

    /// Error describing a failed invocation.
    #[must_use]
    pub fn into_error(self, step: ExecutorStep) -> EngineError {
        EngineError::executor_run(step, self.failure_message())
    }
}

/// A resolved provisioning tool binary.
#[derive(Debug, Clone)]
pub struct Tool {
    binary: PathBuf,
    path_override: Option<OsString>,
    timeout: Duration,
}

impl Tool {
    #[must_use]
    pub const fn new(binary: PathBuf, path_override: Option<OsString>, timeout: Duration) -> Self {
        Self {
            binary,
            path_override,
            timeout,
        }
    }

    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run the tool in `dir` and wait for it to exit.
    ///
    /// A non-zero exit is not an error here; callers decide what each exit
    /// code means. Timeouts and cancellation kill the child and return
    /// [`EngineError::ExecutorRun`].
    pub async fn run(
        &self,
        dir: &Path,
        step: ExecutorStep,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> EngineResult<ToolOutput> {
        if cancel.is_cancelled() {
            return Err(EngineError::executor_run(step, "cancelled"));
        }

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(dir)
            .env("TF_IN_AUTOMATION", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = &self.path_override {
            cmd.env("PATH", path);
        }

        debug!(%step, ?args, "running provisioning tool");
        let start = Instant::now();

        let mut child = cmd.spawn().map_err(|e| {
            EngineError::executor_run(
                step,
                format!("failed to spawn {}: {e}", self.binary.display()),
            )
        })?;

        let stdout_task = collect_lines(child.stdout.take());
        let stderr_task = collect_lines(child.stderr.take());

        let status = tokio::select! {
            () = cancel.cancelled() => {
                warn!(%step, "provisioning tool cancelled");
                child.kill().await.ok();
                return Err(EngineError::executor_run(step, "cancelled"));
            }
            result = timeout(self.timeout, child.wait()) => {
                match result {
                    Ok(Ok(status)) => status,
                    Ok(Err(e)) => {
                        return Err(EngineError::executor_run(step, format!("process error: {e}")));
                    }
                    Err(_) => {
                        child.kill().await.ok();
                        return Err(EngineError::executor_run(
                            step,
                            format!("timed out after {}s", self.timeout.as_secs()),
                        ));
                    }
                }
            }
        };

        let stdout = stdout_task.await.unwrap_or_default().join("\n");
        let stderr = stderr_task.await.unwrap_or_default().join("\n");
        let code = status.code().unwrap_or(-1);

        debug!(
            %step,
            code,
            duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "provisioning tool exited"
        );

        Ok(ToolOutput {
            code,
            stdout,
            stderr,
        })
    }
}

fn collect_lines<R>(stream: Option<R>) -> JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = Vec::new();
        if let Some(stream) = stream {
            let mut reader_lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = reader_lines.next_line().await {
                lines.push(line);
            }
        }
        lines
    })
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
