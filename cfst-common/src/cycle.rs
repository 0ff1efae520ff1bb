//! Cycle orchestration: probe, backup, transform, publish.
//!
//! Every stage failure is caught here and folded into the [`CycleReport`];
//! nothing escapes to crash the scheduler loop. Backup is best-effort and
//! never blocks the remaining stages; a probe or transform failure
//! short-circuits everything after it.

use crate::archive::Archiver;
use crate::config::CfstConfig;
use crate::probe::ProbeRunner;
use crate::publish::{GitRunner, PublishClient, PublishOutcome};
use crate::retry::RetryPolicy;
use crate::transform::Transformer;
use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{error, info, warn};

/// Outcome of one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// The stage did not run (short-circuited or nothing to do).
    Skipped,
    /// The stage completed.
    Succeeded,
    /// The stage ran and failed.
    Failed,
}

/// Outcome of one full cycle, for logging and exit status. Not persisted.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub probe: StageStatus,
    pub backup: StageStatus,
    pub transform: StageStatus,
    pub publish: StageStatus,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl CycleReport {
    fn new(started_at: DateTime<Local>) -> Self {
        Self {
            probe: StageStatus::Skipped,
            backup: StageStatus::Skipped,
            transform: StageStatus::Skipped,
            publish: StageStatus::Skipped,
            started_at,
            finished_at: started_at,
        }
    }

    /// Whether the cycle achieved its goal end to end.
    ///
    /// Backup is advisory and does not participate.
    pub fn success(&self) -> bool {
        self.probe == StageStatus::Succeeded
            && self.transform == StageStatus::Succeeded
            && self.publish == StageStatus::Succeeded
    }
}

/// The full probe → backup → transform → publish pipeline.
pub struct Pipeline<'a, P, G> {
    config: &'a CfstConfig,
    prober: P,
    git: G,
    policy: RetryPolicy,
}

impl<'a, P: ProbeRunner, G: GitRunner> Pipeline<'a, P, G> {
    /// Build a pipeline over the given prober and git runner.
    pub fn new(config: &'a CfstConfig, prober: P, git: G) -> Self {
        Self {
            config,
            prober,
            git,
            policy: RetryPolicy::default(),
        }
    }

    /// Replace the push retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run one complete cycle. Never panics and never returns an error;
    /// every stage outcome lands in the report.
    pub async fn run_cycle(&self) -> CycleReport {
        let started_at = Local::now();
        info!("=== CFST automation cycle started ===");

        let mut report = CycleReport::new(started_at);
        self.run_stages(&mut report).await;
        report.finished_at = Local::now();

        info!(
            success = report.success(),
            probe = ?report.probe,
            backup = ?report.backup,
            transform = ?report.transform,
            publish = ?report.publish,
            "=== CFST automation cycle completed ==="
        );
        report
    }

    async fn run_stages(&self, report: &mut CycleReport) {
        // Probe
        match self.prober.run().await {
            Ok(_) => report.probe = StageStatus::Succeeded,
            Err(err) => {
                error!(error = %err, "Speed test failed; skipping remaining stages");
                report.probe = StageStatus::Failed;
                return;
            }
        }

        let results_path = self.config.results_path();

        // Backup (best-effort, never blocks the cycle)
        let archiver = Archiver::new(self.config.backup_path(), self.config.backup_keep_last);
        report.backup = match archiver.backup(&results_path) {
            Ok(Some(_)) => StageStatus::Succeeded,
            Ok(None) => StageStatus::Skipped,
            Err(err) => {
                warn!(error = %err, "Backup failed; continuing");
                StageStatus::Failed
            }
        };

        // Transform
        let transformer =
            Transformer::new(self.config.max_data_rows, self.config.port_suffix.clone());
        match transformer.transform(&results_path) {
            Ok(_) => report.transform = StageStatus::Succeeded,
            Err(err) => {
                error!(error = %err, "Transform failed; skipping publish");
                report.transform = StageStatus::Failed;
                return;
            }
        }

        // Publish
        let client =
            PublishClient::new(self.config, &self.git).with_policy(self.policy.clone());
        match client.publish().await {
            Ok(PublishOutcome::NoChanges) => {
                report.publish = StageStatus::Succeeded;
            }
            Ok(PublishOutcome::Published {
                attempts,
                upstream_configured,
            }) => {
                info!(attempts, upstream_configured, "Results published");
                report.publish = StageStatus::Succeeded;
            }
            Err(err) => {
                error!(error = %err, "Publish failed");
                report.publish = StageStatus::Failed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_report_is_not_a_success() {
        let report = CycleReport::new(Local::now());
        assert!(!report.success());
    }

    #[test]
    fn backup_failure_does_not_sink_the_cycle() {
        let mut report = CycleReport::new(Local::now());
        report.probe = StageStatus::Succeeded;
        report.backup = StageStatus::Failed;
        report.transform = StageStatus::Succeeded;
        report.publish = StageStatus::Succeeded;
        assert!(report.success());
    }

    #[test]
    fn report_serializes_for_machine_output() {
        let mut report = CycleReport::new(Local::now());
        report.probe = StageStatus::Succeeded;
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"probe\":\"succeeded\""));
        assert!(json.contains("\"publish\":\"skipped\""));
    }
}
