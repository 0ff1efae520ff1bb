//! PublishClient: version-control plumbing for the results file.
//!
//! Wraps the `git` binary: ensures the repository and remote exist, detects
//! pending changes, stages and commits with a timestamped message, and
//! pushes with bounded retries and exponential backoff. A push rejected for
//! a missing upstream tracking branch is immediately retried with
//! `--set-upstream` before the attempt counts as failed.
//!
//! The client is generic over [`GitRunner`] so the full publish flow can be
//! exercised against a scripted [`MockGit`] without a git installation.

use crate::config::CfstConfig;
use crate::exec::{self, CommandOutput, CommandSpec, ExecError};
use crate::retry::RetryPolicy;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout for quick local git operations (version, status, add, commit).
const LOCAL_GIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the publish step.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The git binary is missing or broken. Fatal for the cycle.
    #[error("git is not available: {reason}")]
    GitUnavailable { reason: String },

    /// The configured repository path does not exist.
    #[error("repository path not found at {path}")]
    RepoPathMissing { path: PathBuf },

    /// `git init` failed.
    #[error("failed to initialize repository at {path}: {stderr}")]
    InitFailed { path: PathBuf, stderr: String },

    /// The remote does not exist and no URL is configured to create it.
    #[error("no remote named '{remote}' and no remote URL configured")]
    RemoteMissing { remote: String },

    /// `git remote add`/`set-url` failed.
    #[error("failed to configure remote '{remote}': {stderr}")]
    RemoteSetupFailed { remote: String, stderr: String },

    /// `git status` failed.
    #[error("git status failed: {stderr}")]
    StatusFailed { stderr: String },

    /// `git add` failed.
    #[error("failed to stage {path}: {stderr}")]
    AddFailed { path: PathBuf, stderr: String },

    /// `git commit` failed.
    #[error("commit failed: {stderr}")]
    CommitFailed { stderr: String },

    /// All push attempts failed. The local commit is preserved.
    #[error("push failed after {attempts} attempts: {last_error}")]
    PushExhausted { attempts: u32, last_error: String },

    /// Subprocess-level failure outside the push retry loop.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Outcome of a completed publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Working tree was clean for the results file; no commit was made.
    NoChanges,
    /// A commit was created and pushed.
    Published {
        /// Push attempts consumed (1-based).
        attempts: u32,
        /// Whether the upstream tracking branch was configured on the fly.
        upstream_configured: bool,
    },
}

/// True when git's stderr indicates a missing upstream tracking branch.
pub fn is_upstream_error(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("no upstream branch") || stderr.contains("set-upstream")
}

/// Commit message for a publish at `now`.
pub fn commit_message(now: &DateTime<Local>) -> String {
    format!("CFST results update {}", now.format("%Y-%m-%d %H:%M:%S"))
}

/// Abstraction over git invocation.
pub trait GitRunner {
    /// Run `git <args>` with the repository as working directory.
    fn run(
        &self,
        repo: &Path,
        args: &[&str],
        timeout: Duration,
    ) -> impl Future<Output = Result<CommandOutput, ExecError>>;
}

impl<T: GitRunner> GitRunner for &T {
    async fn run(
        &self,
        repo: &Path,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        (**self).run(repo, args, timeout).await
    }
}

/// Real runner spawning the `git` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitCli;

impl GitRunner for GitCli {
    async fn run(
        &self,
        repo: &Path,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        let spec = CommandSpec::new("git", args, timeout).current_dir(repo);
        exec::run(&spec).await
    }
}

/// Publishes the results file to the configured remote.
pub struct PublishClient<'a, G> {
    config: &'a CfstConfig,
    git: G,
    policy: RetryPolicy,
}

impl<'a, G: GitRunner> PublishClient<'a, G> {
    /// Create a publish client with the default retry policy.
    pub fn new(config: &'a CfstConfig, git: G) -> Self {
        Self {
            config,
            git,
            policy: RetryPolicy::default(),
        }
    }

    /// Replace the push retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn run_git(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput, ExecError> {
        self.git.run(&self.config.repo_path, args, timeout).await
    }

    /// Ensure the repository exists, git works, and the remote is set up.
    pub async fn ensure_repository(&self) -> Result<(), PublishError> {
        let repo = &self.config.repo_path;
        if !repo.exists() {
            return Err(PublishError::RepoPathMissing { path: repo.clone() });
        }

        match self.run_git(&["--version"], LOCAL_GIT_TIMEOUT).await {
            Ok(out) if out.success() => {}
            Ok(out) => {
                return Err(PublishError::GitUnavailable {
                    reason: out.stderr.trim().to_string(),
                });
            }
            Err(err) => {
                return Err(PublishError::GitUnavailable {
                    reason: err.to_string(),
                });
            }
        }

        if !repo.join(".git").exists() {
            info!(path = %repo.display(), "Initializing git repository");
            let init = self
                .run_git(
                    &["init", "--initial-branch", &self.config.branch],
                    LOCAL_GIT_TIMEOUT,
                )
                .await?;
            if !init.success() {
                // Older git without --initial-branch.
                let fallback = self.run_git(&["init"], LOCAL_GIT_TIMEOUT).await?;
                if !fallback.success() {
                    return Err(PublishError::InitFailed {
                        path: repo.clone(),
                        stderr: fallback.stderr.trim().to_string(),
                    });
                }
            }
        }

        self.ensure_remote().await
    }

    /// Ensure the configured remote exists, re-pointing it when a URL is
    /// configured and it already exists under another URL.
    async fn ensure_remote(&self) -> Result<(), PublishError> {
        let remote = &self.config.remote;
        let list = self.run_git(&["remote"], LOCAL_GIT_TIMEOUT).await?;
        if !list.success() {
            return Err(PublishError::RemoteSetupFailed {
                remote: remote.clone(),
                stderr: list.stderr.trim().to_string(),
            });
        }
        let exists = list.stdout.lines().any(|l| l.trim() == remote.as_str());

        let args: [&str; 4] = match (&self.config.remote_url, exists) {
            (None, true) => return Ok(()),
            (None, false) => {
                return Err(PublishError::RemoteMissing {
                    remote: remote.clone(),
                });
            }
            (Some(url), true) => ["remote", "set-url", remote, url],
            (Some(url), false) => ["remote", "add", remote, url],
        };

        debug!(remote = %remote, action = args[1], "Configuring remote");
        let out = self.run_git(&args, LOCAL_GIT_TIMEOUT).await?;
        if !out.success() {
            return Err(PublishError::RemoteSetupFailed {
                remote: remote.clone(),
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    /// Whether the results file has uncommitted changes.
    pub async fn has_pending_changes(&self) -> Result<bool, PublishError> {
        let file = self.config.results_file.to_string_lossy();
        let out = self
            .run_git(
                &["status", "--porcelain", "--", file.as_ref()],
                LOCAL_GIT_TIMEOUT,
            )
            .await?;
        if !out.success() {
            return Err(PublishError::StatusFailed {
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(!out.stdout.trim().is_empty())
    }

    /// Stage the results file and commit with a timestamped message.
    ///
    /// The caller must have confirmed pending changes; committing a clean
    /// tree would fail.
    pub async fn stage_and_commit(&self) -> Result<(), PublishError> {
        let file = self.config.results_file.to_string_lossy();
        let add = self
            .run_git(&["add", file.as_ref()], LOCAL_GIT_TIMEOUT)
            .await?;
        if !add.success() {
            return Err(PublishError::AddFailed {
                path: self.config.results_file.clone(),
                stderr: add.stderr.trim().to_string(),
            });
        }

        let message = commit_message(&Local::now());
        let commit = self
            .run_git(&["commit", "-m", &message], LOCAL_GIT_TIMEOUT)
            .await?;
        if !commit.success() {
            return Err(PublishError::CommitFailed {
                stderr: commit.stderr.trim().to_string(),
            });
        }

        info!(message = %message, "Committed results file");
        Ok(())
    }

    /// Push to the configured remote and branch with bounded retries.
    ///
    /// Returns the number of attempts consumed and whether the upstream
    /// tracking branch was configured along the way.
    pub async fn push(&self) -> Result<(u32, bool), PublishError> {
        let remote = self.config.remote.as_str();
        let branch = self.config.branch.as_str();
        let timeout = Duration::from_secs(self.config.push_timeout_secs);
        let max_attempts = self.policy.max_attempts();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            debug!(attempt, max_attempts, "Attempting git push");

            match self.run_git(&["push", remote, branch], timeout).await {
                Ok(out) if out.success() => {
                    info!(attempt, "Push succeeded");
                    return Ok((attempt, false));
                }
                Ok(out) if is_upstream_error(&out.stderr) => {
                    // Retry immediately with --set-upstream; only if that
                    // also fails does this attempt count as failed.
                    info!("No upstream branch; retrying with --set-upstream");
                    match self
                        .run_git(&["push", "--set-upstream", remote, branch], timeout)
                        .await
                    {
                        Ok(up) if up.success() => {
                            info!(attempt, "Push succeeded with upstream configured");
                            return Ok((attempt, true));
                        }
                        Ok(up) => {
                            let stderr = up.stderr.trim();
                            last_error = if stderr.is_empty() {
                                out.stderr.trim().to_string()
                            } else {
                                stderr.to_string()
                            };
                        }
                        Err(err) => last_error = err.to_string(),
                    }
                }
                Ok(out) => last_error = out.stderr.trim().to_string(),
                Err(err) => last_error = err.to_string(),
            }

            warn!(attempt, max_attempts, error = %last_error, "Push attempt failed");
            if attempt < max_attempts {
                let delay = self.policy.backoff_delay(attempt);
                debug!(delay_secs = delay.as_secs_f64(), "Backing off before retry");
                tokio::time::sleep(delay).await;
            }
        }

        Err(PublishError::PushExhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    /// Full publish flow: ensure repository, skip when clean, otherwise
    /// stage, commit, and push.
    pub async fn publish(&self) -> Result<PublishOutcome, PublishError> {
        self.ensure_repository().await?;

        if !self.has_pending_changes().await? {
            info!(
                file = %self.config.results_file.display(),
                "No changes to results file; skipping publish"
            );
            return Ok(PublishOutcome::NoChanges);
        }

        self.stage_and_commit().await?;

        match self.push().await {
            Ok((attempts, upstream_configured)) => Ok(PublishOutcome::Published {
                attempts,
                upstream_configured,
            }),
            Err(err) => {
                warn!("Push failed; the local commit is preserved for manual recovery");
                Err(err)
            }
        }
    }
}

// =============================================================================
// MockGit - scripted runner for tests
// =============================================================================

/// Scripted git result for [`MockGit`].
#[derive(Debug, Clone, Default)]
pub struct MockGitResult {
    /// Exit code (0 = success).
    pub exit_code: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl MockGitResult {
    /// Successful result with stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed result with exit code and stderr.
    pub fn err(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Mock git runner with scripted responses.
///
/// Responses are keyed by a substring of the joined argument list; the
/// longest matching pattern wins, so `"push --set-upstream"` can be
/// scripted independently of `"push"`. Each pattern holds a queue of
/// results; the last one repeats once the queue is down to a single entry.
#[derive(Debug, Default)]
pub struct MockGit {
    responses: std::sync::Mutex<Vec<(String, std::collections::VecDeque<MockGitResult>)>>,
    default: MockGitResult,
    calls: std::sync::Mutex<Vec<String>>,
}

impl MockGit {
    /// Mock whose every command succeeds with empty output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a single repeating response for commands matching `pattern`.
    pub fn with_response(self, pattern: impl Into<String>, result: MockGitResult) -> Self {
        self.with_sequence(pattern, [result])
    }

    /// Script a sequence of responses for commands matching `pattern`.
    pub fn with_sequence(
        self,
        pattern: impl Into<String>,
        results: impl IntoIterator<Item = MockGitResult>,
    ) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push((pattern.into(), results.into_iter().collect()));
        self
    }

    /// Replace the default result for unmatched commands.
    pub fn with_default(mut self, result: MockGitResult) -> Self {
        self.default = result;
        self
    }

    /// Joined argument lists of every invocation, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of invocations whose arguments contain `pattern`.
    pub fn call_count(&self, pattern: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }
}

impl GitRunner for MockGit {
    async fn run(
        &self,
        _repo: &Path,
        args: &[&str],
        _timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        let joined = args.join(" ");
        self.calls.lock().unwrap().push(joined.clone());

        let mut responses = self.responses.lock().unwrap();
        let result = responses
            .iter_mut()
            .filter(|(pattern, queue)| joined.contains(pattern.as_str()) && !queue.is_empty())
            .max_by_key(|(pattern, _)| pattern.len())
            .map(|(_, queue)| {
                if queue.len() > 1 {
                    queue.pop_front().unwrap()
                } else {
                    queue.front().cloned().unwrap()
                }
            })
            .unwrap_or_else(|| self.default.clone());

        Ok(CommandOutput {
            exit_code: result.exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
            duration_ms: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_config(repo: &Path) -> CfstConfig {
        CfstConfig {
            repo_path: repo.to_path_buf(),
            remote_url: Some("git@example.com:speed/results.git".to_string()),
            ..CfstConfig::default()
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: 0.0,
        }
    }

    #[test]
    fn commit_message_contains_timestamp() {
        let ts = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 42).unwrap();
        assert_eq!(commit_message(&ts), "CFST results update 2024-03-07 09:05:42");
    }

    #[test]
    fn upstream_error_classification() {
        assert!(is_upstream_error(
            "fatal: The current branch main has no upstream branch."
        ));
        assert!(is_upstream_error(
            "To push the current branch and set the remote as upstream, use\n\n    git push --set-upstream genequ main"
        ));
        assert!(!is_upstream_error(
            "fatal: unable to access 'https://example.com/': Could not resolve host"
        ));
        assert!(!is_upstream_error(""));
    }

    #[tokio::test]
    async fn clean_tree_skips_commit_and_push() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let git = MockGit::new().with_response("status --porcelain", MockGitResult::ok(""));

        let client = PublishClient::new(&config, git).with_policy(fast_policy());
        let outcome = client.publish().await.unwrap();
        assert_eq!(outcome, PublishOutcome::NoChanges);

        let calls = client.git.calls();
        assert!(calls.iter().all(|c| !c.starts_with("add")));
        assert!(calls.iter().all(|c| !c.starts_with("commit")));
        assert!(calls.iter().all(|c| !c.starts_with("push")));
    }

    #[tokio::test]
    async fn push_attempts_capped_at_policy_max() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let git = MockGit::new()
            .with_response("status --porcelain", MockGitResult::ok(" M result.csv"))
            .with_response("push", MockGitResult::err(1, "connection reset by peer"));

        let client = PublishClient::new(&config, git).with_policy(fast_policy());
        let err = client.publish().await.unwrap_err();
        match err {
            PublishError::PushExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(client.git.call_count("push"), 3);
        assert_eq!(client.git.call_count("commit"), 1);
    }

    #[tokio::test]
    async fn push_recovers_on_second_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let git = MockGit::new()
            .with_response("status --porcelain", MockGitResult::ok(" M result.csv"))
            .with_sequence(
                "push",
                [
                    MockGitResult::err(1, "connection timed out"),
                    MockGitResult::ok(""),
                ],
            );

        let client = PublishClient::new(&config, git).with_policy(fast_policy());
        let outcome = client.publish().await.unwrap();
        assert_eq!(
            outcome,
            PublishOutcome::Published {
                attempts: 2,
                upstream_configured: false,
            }
        );
    }

    #[tokio::test]
    async fn upstream_retry_does_not_consume_an_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let git = MockGit::new()
            .with_response("status --porcelain", MockGitResult::ok(" M result.csv"))
            .with_response(
                "push genequ main",
                MockGitResult::err(1, "fatal: The current branch main has no upstream branch."),
            )
            .with_response("push --set-upstream", MockGitResult::ok(""));

        let client = PublishClient::new(&config, git).with_policy(fast_policy());
        let outcome = client.publish().await.unwrap();
        assert_eq!(
            outcome,
            PublishOutcome::Published {
                attempts: 1,
                upstream_configured: true,
            }
        );
        // One generic push, one upstream push, nothing else.
        assert_eq!(client.git.call_count("push"), 2);
        assert_eq!(client.git.call_count("--set-upstream"), 1);
    }

    #[tokio::test]
    async fn existing_remote_is_repointed() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let git = MockGit::new()
            .with_response("remote set-url", MockGitResult::ok(""))
            .with_response("remote", MockGitResult::ok("genequ\norigin\n"))
            .with_response("status --porcelain", MockGitResult::ok(""));

        let client = PublishClient::new(&config, git).with_policy(fast_policy());
        client.publish().await.unwrap();

        assert_eq!(client.git.call_count("remote set-url genequ"), 1);
        assert_eq!(client.git.call_count("remote add"), 0);
    }

    #[tokio::test]
    async fn missing_remote_without_url_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = CfstConfig {
            remote_url: None,
            ..test_config(dir.path())
        };
        let git = MockGit::new().with_response("remote", MockGitResult::ok(""));

        let client = PublishClient::new(&config, git).with_policy(fast_policy());
        let err = client.publish().await.unwrap_err();
        assert!(matches!(err, PublishError::RemoteMissing { .. }));
    }

    #[tokio::test]
    async fn broken_git_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let git =
            MockGit::new().with_response("--version", MockGitResult::err(127, "git: not found"));

        let client = PublishClient::new(&config, git).with_policy(fast_policy());
        let err = client.publish().await.unwrap_err();
        assert!(matches!(err, PublishError::GitUnavailable { .. }));
    }

    #[tokio::test]
    async fn missing_repo_path_is_fatal() {
        let config = CfstConfig {
            repo_path: PathBuf::from("/nonexistent/repo"),
            ..CfstConfig::default()
        };
        let client = PublishClient::new(&config, MockGit::new()).with_policy(fast_policy());
        let err = client.publish().await.unwrap_err();
        assert!(matches!(err, PublishError::RepoPathMissing { .. }));
    }
}
