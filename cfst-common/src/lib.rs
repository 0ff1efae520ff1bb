//! CFST Automation - Common Library
//!
//! Shared components for the cfstd scheduler and the cfst-upload one-shot
//! CLI: configuration, logging, subprocess execution, and the four
//! pipeline stages (probe, backup, transform, publish).

#![deny(unsafe_code)]

pub mod archive;
pub mod config;
pub mod cycle;
pub mod exec;
pub mod logging;
pub mod probe;
pub mod publish;
pub mod retry;
pub mod transform;

pub use archive::{ArchiveError, Archiver, backup_file_name};
pub use config::{CfstConfig, config_dir, load_config};
pub use cycle::{CycleReport, Pipeline, StageStatus};
pub use exec::{CommandOutput, CommandSpec, ExecError};
pub use logging::{LogConfig, LogFormat, LoggingGuard, init_logging};
pub use probe::{PROBE_ARGS, ProbeError, ProbeRunner, Prober};
pub use publish::{
    GitCli, GitRunner, MockGit, MockGitResult, PublishClient, PublishError, PublishOutcome,
    commit_message, is_upstream_error,
};
pub use retry::RetryPolicy;
pub use transform::{TransformError, TransformOutcome, Transformer};
