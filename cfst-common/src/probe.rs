//! Prober: one run of the external speed-test binary.
//!
//! The binary is invoked with a fixed argument set, its parent directory as
//! working directory, and a single newline on stdin to satisfy any
//! interactive prompt. The results file it writes is picked up by the rest
//! of the pipeline; the prober itself writes nothing.

use crate::config::CfstConfig;
use crate::exec::{self, CommandOutput, CommandSpec, ExecError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Fixed argument set: latency limit 150 ms, test port 8443.
pub const PROBE_ARGS: [&str; 4] = ["-tl", "150", "-tp", "8443"];

/// Errors from one speed-test run.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The configured executable does not exist; nothing was invoked.
    #[error("speed-test executable not found at {path}")]
    ExecutableMissing { path: PathBuf },

    /// The run exceeded the hard timeout and was killed.
    #[error("speed test timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The binary ran but exited non-zero.
    #[error("speed test exited with code {exit_code}: {stderr}")]
    Failed { exit_code: i32, stderr: String },

    /// The binary could not be executed.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Abstraction over the probe step, so the pipeline can be exercised
/// without the real binary.
pub trait ProbeRunner {
    /// Run one measurement to completion.
    fn run(&self) -> impl Future<Output = Result<CommandOutput, ProbeError>>;
}

/// Real prober invoking the configured executable.
#[derive(Debug, Clone)]
pub struct Prober {
    executable: PathBuf,
    timeout: Duration,
}

impl Prober {
    /// Build a prober from the pipeline configuration.
    pub fn from_config(config: &CfstConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            timeout: Duration::from_secs(config.probe_timeout_secs),
        }
    }

    /// Build a prober for an explicit executable and timeout.
    pub fn new(executable: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            timeout,
        }
    }

    fn working_dir(&self) -> &Path {
        self.executable
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }
}

impl ProbeRunner for Prober {
    async fn run(&self) -> Result<CommandOutput, ProbeError> {
        if !self.executable.exists() {
            return Err(ProbeError::ExecutableMissing {
                path: self.executable.clone(),
            });
        }

        info!(
            executable = %self.executable.display(),
            timeout_secs = self.timeout.as_secs(),
            "Running speed test"
        );

        let spec = CommandSpec::new(
            &self.executable.to_string_lossy(),
            &PROBE_ARGS,
            self.timeout,
        )
        .current_dir(self.working_dir())
        .stdin(b"\n");

        let output = match exec::run(&spec).await {
            Ok(output) => output,
            Err(ExecError::Timeout { timeout_secs, .. }) => {
                return Err(ProbeError::Timeout { timeout_secs });
            }
            Err(err) => return Err(ProbeError::Exec(err)),
        };

        if !output.success() {
            return Err(ProbeError::Failed {
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        info!(
            duration_ms = output.duration_ms,
            "Speed test completed successfully"
        );
        if !output.stdout.trim().is_empty() {
            info!(output = %output.stdout.trim(), "Speed test output");
        }
        if !output.stderr.trim().is_empty() {
            warn!(stderr = %output.stderr.trim(), "Speed test reported warnings");
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_executable_fails_fast() {
        let prober = Prober::new("/nonexistent/cfst", Duration::from_secs(1));
        let err = prober.run().await.unwrap_err();
        assert!(matches!(err, ProbeError::ExecutableMissing { .. }));
    }

    #[test]
    fn working_dir_is_executable_parent() {
        let prober = Prober::new("/opt/cfst/cfst", Duration::from_secs(1));
        assert_eq!(prober.working_dir(), Path::new("/opt/cfst"));

        let bare = Prober::new("cfst", Duration::from_secs(1));
        assert_eq!(bare.working_dir(), Path::new("."));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_probe_captures_output() {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("cfst");
        {
            let mut f = std::fs::File::create(&script).unwrap();
            // Echo back the arguments so the fixed argument set is observable.
            writeln!(f, "#!/bin/sh\necho \"args: $@\"").unwrap();
        }
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();

        let prober = Prober::new(&script, Duration::from_secs(10));
        let output = prober.run().await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "args: -tl 150 -tp 8443");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_probe_reports_exit_code() {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("cfst");
        {
            let mut f = std::fs::File::create(&script).unwrap();
            writeln!(f, "#!/bin/sh\necho 'no servers reachable' >&2\nexit 2").unwrap();
        }
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();

        let prober = Prober::new(&script, Duration::from_secs(10));
        let err = prober.run().await.unwrap_err();
        match err {
            ProbeError::Failed { exit_code, stderr } => {
                assert_eq!(exit_code, 2);
                assert!(stderr.contains("no servers reachable"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
