//! Subprocess execution for the CFST pipeline.
//!
//! Both the speed-test prober and the git publish client shell out to
//! external binaries. This module provides the single execution path they
//! share: spawn, optionally feed stdin, wait with a hard timeout, and
//! capture output as text.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Result of an external command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code of the command (-1 when terminated by a signal).
    pub exit_code: i32,
    /// Standard output, lossily decoded as UTF-8.
    pub stdout: String,
    /// Standard error, lossily decoded as UTF-8.
    pub stderr: String,
    /// Execution duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Errors from the subprocess layer.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The binary could not be spawned at all.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The command did not finish within the allotted time.
    #[error("{program} timed out after {timeout_secs}s")]
    Timeout { program: String, timeout_secs: u64 },

    /// I/O failure while talking to the child process.
    #[error("i/o error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Specification of one external command invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Working directory for the child, when set.
    pub current_dir: Option<std::path::PathBuf>,
    /// Bytes written to the child's stdin before it is closed.
    pub stdin: Option<Vec<u8>>,
    /// Hard execution timeout.
    pub timeout: Duration,
}

impl CommandSpec {
    /// Build a spec for `program` with the given arguments and timeout.
    pub fn new<S: AsRef<str>>(program: &str, args: &[S], timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.as_ref().to_string()).collect(),
            current_dir: None,
            stdin: None,
            timeout,
        }
    }

    /// Run the child in `dir`.
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Feed `data` to the child's stdin, then close it.
    pub fn stdin(mut self, data: &[u8]) -> Self {
        self.stdin = Some(data.to_vec());
        self
    }
}

/// Run an external command to completion under a timeout.
///
/// Output streams are captured in full. On timeout the child is killed
/// (the future holding it is dropped with `kill_on_drop`) and
/// [`ExecError::Timeout`] is returned; no partial output is recovered.
pub async fn run(spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
    debug!(
        program = %spec.program,
        args = ?spec.args,
        timeout_secs = spec.timeout.as_secs(),
        "Executing external command"
    );

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args);
    if let Some(dir) = &spec.current_dir {
        cmd.current_dir(dir);
    }
    cmd.stdin(if spec.stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
        program: spec.program.clone(),
        source,
    })?;

    if let Some(data) = &spec.stdin
        && let Some(mut stdin) = child.stdin.take()
    {
        stdin.write_all(data).await.map_err(|source| ExecError::Io {
            program: spec.program.clone(),
            source,
        })?;
        stdin.shutdown().await.map_err(|source| ExecError::Io {
            program: spec.program.clone(),
            source,
        })?;
    }

    let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(ExecError::Io {
                program: spec.program.clone(),
                source,
            });
        }
        Err(_) => {
            warn!(
                program = %spec.program,
                timeout_secs = spec.timeout.as_secs(),
                "External command timed out"
            );
            return Err(ExecError::Timeout {
                program: spec.program.clone(),
                timeout_secs: spec.timeout.as_secs(),
            });
        }
    };

    let duration = start.elapsed();
    let result = CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: duration.as_millis() as u64,
    };

    if result.success() {
        debug!(
            program = %spec.program,
            duration_ms = result.duration_ms,
            stdout_len = result.stdout.len(),
            "External command completed"
        );
    } else {
        warn!(
            program = %spec.program,
            exit_code = result.exit_code,
            stderr = %result.stderr.trim(),
            duration_ms = result.duration_ms,
            "External command failed"
        );
    }

    Ok(result)
}
