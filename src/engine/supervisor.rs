//! Subprocess supervision.
//!
//! Commands run through the platform shell so user templates can use pipes
//! and redirection. Output streams into buffers while a deadline timer runs;
//! on expiry the process gets a graceful termination signal, and a forceful
//! kill if it is still alive after a fixed grace period.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::debug;

/// Grace period between the graceful signal and the forceful kill.
pub const KILL_GRACE_MS: u64 = 5_000;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("process spawn failed: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("command timed out after {0}ms")]
    Timeout(u64),

    #[error("failed waiting for process: {0}")]
    Wait(#[source] std::io::Error),
}

/// Execution parameters for one supervised command.
#[derive(Debug, Default)]
pub struct RunOptions {
    pub cwd: Option<PathBuf>,
    /// Extra environment entries layered over the inherited environment.
    pub env: HashMap<String, String>,
    pub timeout_ms: u64,
}

/// Captured outcome of a normally-exited process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run one shell command to completion, timeout, or spawn failure.
pub async fn run(command: &str, opts: RunOptions) -> Result<CommandOutput, SupervisorError> {
    let mut cmd = if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .envs(&opts.env)
        .kill_on_drop(true);

    if let Some(cwd) = &opts.cwd {
        cmd.current_dir(cwd);
    }

    let mut child = cmd.spawn().map_err(SupervisorError::Spawn)?;

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stdout_pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stderr_pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });

    tokio::select! {
        status = child.wait() => {
            let status = status.map_err(SupervisorError::Wait)?;
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            Ok(CommandOutput {
                exit_code: status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&stdout).trim().to_string(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            })
        }
        _ = tokio::time::sleep(Duration::from_millis(opts.timeout_ms)) => {
            debug!(timeout_ms = opts.timeout_ms, "command deadline expired, escalating");
            escalate(&mut child).await;
            stdout_task.abort();
            stderr_task.abort();
            Err(SupervisorError::Timeout(opts.timeout_ms))
        }
    }
}

/// Two-stage termination: SIGTERM, then SIGKILL after the grace period.
async fn escalate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // Safety: pid comes from a child we own and has not been reaped yet.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        if tokio::time::timeout(Duration::from_millis(KILL_GRACE_MS), child.wait())
            .await
            .is_ok()
        {
            return;
        }
        debug!("process survived graceful termination, sending kill");
    }

    let _ = child.kill().await;
}
