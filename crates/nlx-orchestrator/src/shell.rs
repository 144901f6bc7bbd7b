//! One-shot shell execution with cwd, optional stdin, timeout, and output
//! capture.
//!
//! Commands run via `sh -c` in the session's working directory. The child is
//! raced against the deadline on a separate task; on expiry it is killed
//! with SIGKILL by PID since the `Child` handle has been consumed by
//! `wait_with_output`.

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("spawn failed: {0}")]
    Spawn(String),

    #[error("Command timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ShellError>;

/// Captured output of a completed command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Run `command` through `sh -c` in `cwd`, feeding `stdin` when provided.
pub async fn run_command(
    command: &str,
    stdin: Option<&str>,
    cwd: &str,
    timeout: Duration,
) -> Result<ExecOutput> {
    debug!(command, cwd, has_stdin = stdin.is_some(), "exec");

    let mut cmd = AsyncCommand::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if !cwd.is_empty() {
        cmd.current_dir(cwd);
    }
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    }

    let mut child = cmd.spawn().map_err(|e| ShellError::Spawn(e.to_string()))?;

    if let Some(input) = stdin {
        if let Some(mut handle) = child.stdin.take() {
            handle.write_all(input.as_bytes()).await?;
            // Drop closes the pipe so `cat > file` style commands terminate.
        }
    }

    // `wait_with_output` takes the child by value, so drive it on a spawned
    // task and keep the PID for the kill-on-timeout path.
    let pid = child.id();
    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let _ = tx.send(child.wait_with_output().await);
    });

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(Ok(output))) => Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Ok(Err(e))) => Err(ShellError::Io(e)),
        Ok(Err(_recv_err)) => Err(ShellError::Spawn("wait task panicked".to_string())),
        Err(_elapsed) => {
            if let Some(raw_pid) = pid {
                #[cfg(unix)]
                // Safety: raw_pid is our direct child, still running.
                unsafe {
                    libc::kill(raw_pid as libc::pid_t, libc::SIGKILL);
                }
            }
            Err(ShellError::Timeout {
                secs: timeout.as_secs(),
            })
        }
    }
}

/// Quote-aware tokenization of a shell command line.
///
/// Handles single quotes (literal), double quotes (backslash escapes), and
/// unquoted backslash escapes. Unterminated quotes fall back to whitespace
/// splitting, matching how the context-mutation rules degrade.
pub fn tokenize(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = command.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;
    let mut has_token = false;

    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                has_token = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                has_token = true;
            }
            '\\' if !in_single => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    has_token = true;
                }
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }

    if in_single || in_double {
        // Unbalanced quoting — degrade to plain whitespace split.
        return command.split_whitespace().map(String::from).collect();
    }
    if has_token {
        tokens.push(current);
    }
    tokens
}
