//! Supervised execution of a transcoder process.
//!
//! A [`TranscodeProcess`] is a plain description (program, arguments,
//! working directory, environment) produced by the job collaborators. Running
//! it captures stderr for diagnostics and honours two cancellation tokens: the
//! soft token asks the process to exit (SIGTERM on unix) and the hard token
//! kills it outright.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Bytes of stderr kept for diagnostics (the tail is kept).
const MAX_STDERR_BYTES: usize = 16 * 1024;

/// A runnable external process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeProcess {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
}

/// How a supervised process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The process exited on its own. Signal deaths are reported as `128 + signal`.
    Exited { exit_code: i32, stderr: String },
    /// The process was stopped by a cancellation token.
    Cancelled,
}

impl TranscodeProcess {
    /// Create a new process description for the given program path.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    pub fn current_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable.
    pub fn env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Short tool name used in logs and errors.
    pub fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Run the process to completion.
    ///
    /// Returns [`ProcessOutcome::Cancelled`] as soon as the process is gone
    /// after `soft` fires. If it ignores the termination request, it is
    /// killed when `hard` fires.
    ///
    /// # Errors
    ///
    /// Returns [`tl_core::Error::Tool`] if the process cannot be spawned or
    /// waited on.
    pub async fn run(
        &self,
        soft: &CancellationToken,
        hard: &CancellationToken,
    ) -> tl_core::Result<ProcessOutcome> {
        let tool = self.tool_name();

        if soft.is_cancelled() {
            return Ok(ProcessOutcome::Cancelled);
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| tl_core::Error::tool(&tool, format!("failed to spawn: {e}")))?;

        tracing::debug!(tool = %tool, pid = ?child.id(), "Process started");

        let stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = soft.cancelled() => None,
        };

        let Some(status) = waited else {
            stop(&mut child, hard, &tool).await;
            stderr_task.abort();
            return Ok(ProcessOutcome::Cancelled);
        };

        let status = status
            .map_err(|e| tl_core::Error::tool(&tool, format!("I/O error waiting for process: {e}")))?;

        let stderr = match stderr_task.await {
            Ok(bytes) => tail_lossy(&bytes),
            Err(_) => String::new(),
        };

        Ok(ProcessOutcome::Exited {
            exit_code: exit_code(status),
            stderr,
        })
    }
}

/// Ask the child to exit, escalating to a kill when `hard` fires.
async fn stop(child: &mut Child, hard: &CancellationToken, tool: &str) {
    if hard.is_cancelled() || !terminate(child) {
        let _ = child.kill().await;
        return;
    }

    let exited = tokio::select! {
        _ = child.wait() => true,
        _ = hard.cancelled() => false,
    };

    if !exited {
        tracing::debug!(tool = %tool, "Process ignored termination; killing");
        let _ = child.kill().await;
    }
}

#[cfg(unix)]
fn terminate(child: &Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok(),
        None => false,
    }
}

#[cfg(not(unix))]
fn terminate(_child: &Child) -> bool {
    false
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn tail_lossy(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(MAX_STDERR_BYTES);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}
