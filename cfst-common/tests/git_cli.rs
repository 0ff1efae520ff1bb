//! Publish round trip against a real git installation.
//!
//! Skips (with a message) when git is not installed, so the suite stays
//! green on minimal environments; the publish logic itself is covered by
//! the mock-based tests either way.

use cfst_common::{CfstConfig, GitCli, PublishClient, PublishOutcome};
use std::path::Path;
use std::process::Command;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

#[tokio::test]
async fn publish_round_trip_with_real_git() {
    if !git_available() {
        eprintln!("Skipping: git not installed");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let remote_dir = dir.path().join("remote.git");
    std::fs::create_dir_all(&remote_dir).unwrap();
    run_git(&remote_dir, &["init", "--bare"]);

    let repo = dir.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    std::fs::write(
        repo.join("result.csv"),
        "IP,Sent,Received\n104.16.0.1:8443,4,4\n",
    )
    .unwrap();

    let config = CfstConfig {
        repo_path: repo.clone(),
        remote_url: Some(remote_dir.to_string_lossy().into_owned()),
        ..CfstConfig::default()
    };

    let client = PublishClient::new(&config, GitCli);
    client.ensure_repository().await.unwrap();

    // Pin the branch name and commit identity for reproducibility across
    // git versions and host configuration.
    run_git(&repo, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    run_git(&repo, &["config", "user.email", "cfst@example.com"]);
    run_git(&repo, &["config", "user.name", "CFST Automation"]);

    assert!(client.has_pending_changes().await.unwrap());

    let outcome = client.publish().await.unwrap();
    match outcome {
        PublishOutcome::Published { attempts, .. } => assert_eq!(attempts, 1),
        other => panic!("expected a publish, got {other:?}"),
    }

    // The commit arrived on the bare remote with the timestamped message.
    let log = Command::new("git")
        .args(["log", "--oneline", "main"])
        .current_dir(&remote_dir)
        .output()
        .unwrap();
    assert!(log.status.success());
    let log = String::from_utf8_lossy(&log.stdout);
    assert!(log.contains("CFST results update"), "log was: {log}");

    // A second publish with a clean tree is a no-op.
    let outcome = client.publish().await.unwrap();
    assert_eq!(outcome, PublishOutcome::NoChanges);
}

#[tokio::test]
async fn ensure_repository_repoints_existing_remote() {
    if !git_available() {
        eprintln!("Skipping: git not installed");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    run_git(&repo, &["init"]);
    run_git(&repo, &["remote", "add", "genequ", "https://old.example.com/x.git"]);

    let config = CfstConfig {
        repo_path: repo.clone(),
        remote_url: Some("https://new.example.com/y.git".to_string()),
        ..CfstConfig::default()
    };

    let client = PublishClient::new(&config, GitCli);
    client.ensure_repository().await.unwrap();

    let url = Command::new("git")
        .args(["remote", "get-url", "genequ"])
        .current_dir(&repo)
        .output()
        .unwrap();
    assert_eq!(
        String::from_utf8_lossy(&url.stdout).trim(),
        "https://new.example.com/y.git"
    );
}
