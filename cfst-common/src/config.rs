//! Configuration loading for the CFST automation pipeline.
//!
//! Settings come from `cfst.toml` (an explicit path or the user config
//! directory), with per-field defaults and `CFST_*` environment overrides
//! applied on top. The loaded value is constructed once at startup and
//! passed into each component; there is no global settings record.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default config directory name.
const CONFIG_DIR_NAME: &str = "cfst";

/// Default config file name.
const CONFIG_FILE_NAME: &str = "cfst.toml";

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfstConfig {
    /// Path to the speed-test executable.
    #[serde(default = "default_executable")]
    pub executable: PathBuf,

    /// Results file produced by the speed test, relative to the repository
    /// path unless absolute.
    #[serde(default = "default_results_file")]
    pub results_file: PathBuf,

    /// Path to the git repository the results are published from.
    #[serde(default = "default_repo_path")]
    pub repo_path: PathBuf,

    /// Hours between scheduled cycles.
    #[serde(default = "default_interval_hours")]
    pub schedule_interval_hours: u64,

    /// Directory for timestamped backups of the results file.
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    /// Keep only the newest K backups; unset keeps everything.
    #[serde(default)]
    pub backup_keep_last: Option<usize>,

    /// Git remote name to push to.
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Git branch to push.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Remote URL; when set, the remote is created or re-pointed on startup.
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Maximum data rows retained in the results file after transformation.
    #[serde(default = "default_max_data_rows")]
    pub max_data_rows: usize,

    /// Suffix appended to each address field.
    #[serde(default = "default_port_suffix")]
    pub port_suffix: String,

    /// Hard timeout for one speed-test run, in seconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Hard timeout for one push attempt, in seconds.
    #[serde(default = "default_push_timeout")]
    pub push_timeout_secs: u64,
}

impl Default for CfstConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            results_file: default_results_file(),
            repo_path: default_repo_path(),
            schedule_interval_hours: default_interval_hours(),
            backup_dir: default_backup_dir(),
            backup_keep_last: None,
            remote: default_remote(),
            branch: default_branch(),
            remote_url: None,
            max_data_rows: default_max_data_rows(),
            port_suffix: default_port_suffix(),
            probe_timeout_secs: default_probe_timeout(),
            push_timeout_secs: default_push_timeout(),
        }
    }
}

impl CfstConfig {
    /// Filesystem location of the results file.
    ///
    /// `results_file` is interpreted relative to `repo_path` unless it is
    /// already absolute; git operations pass it through as configured since
    /// they run with the repository as working directory.
    pub fn results_path(&self) -> PathBuf {
        if self.results_file.is_absolute() {
            self.results_file.clone()
        } else {
            self.repo_path.join(&self.results_file)
        }
    }

    /// Filesystem location of the backup directory (relative to the
    /// repository path unless absolute).
    pub fn backup_path(&self) -> PathBuf {
        if self.backup_dir.is_absolute() {
            self.backup_dir.clone()
        } else {
            self.repo_path.join(&self.backup_dir)
        }
    }

    /// Sanity-check the configuration, returning human-readable warnings.
    ///
    /// Warnings are advisory; the pipeline still runs with them.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.schedule_interval_hours == 0 {
            warnings.push("schedule_interval_hours is 0; cycles will run back to back".to_string());
        }
        if self.max_data_rows == 0 {
            warnings.push("max_data_rows is 0; every data row will be discarded".to_string());
        }
        if self.port_suffix.is_empty() {
            warnings.push("port_suffix is empty; address fields will not be rewritten".to_string());
        }
        if !self.executable.exists() {
            warnings.push(format!(
                "speed-test executable not found at {}; probe will fail until it exists",
                self.executable.display()
            ));
        }

        warnings
    }

    /// Apply `CFST_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_nonempty("CFST_EXECUTABLE") {
            self.executable = PathBuf::from(v);
        }
        if let Some(v) = env_nonempty("CFST_RESULTS_FILE") {
            self.results_file = PathBuf::from(v);
        }
        if let Some(v) = env_nonempty("CFST_REPO_PATH") {
            self.repo_path = PathBuf::from(v);
        }
        if let Some(v) = env_nonempty("CFST_BACKUP_DIR") {
            self.backup_dir = PathBuf::from(v);
        }
        if let Some(v) = env_nonempty("CFST_REMOTE") {
            self.remote = v;
        }
        if let Some(v) = env_nonempty("CFST_BRANCH") {
            self.branch = v;
        }
        if let Some(v) = env_nonempty("CFST_REMOTE_URL") {
            self.remote_url = Some(v);
        }
        if let Some(v) = env_nonempty("CFST_INTERVAL_HOURS")
            && let Ok(hours) = v.parse::<u64>()
        {
            self.schedule_interval_hours = hours;
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get the configuration directory path.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "cfst", CONFIG_DIR_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Load the pipeline configuration.
///
/// Resolution order: explicit `path` if given, else `cfst.toml` in the user
/// config directory, else built-in defaults. `CFST_*` environment overrides
/// apply in every case.
pub fn load_config(path: Option<&Path>) -> Result<CfstConfig> {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => config_dir().map(|dir| dir.join(CONFIG_FILE_NAME)),
    };

    let mut config = match config_path {
        Some(ref p) if p.exists() => {
            info!("Loading configuration from {:?}", p);
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read config from {:?}", p))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {:?}", p))?
        }
        Some(ref p) => {
            debug!("Config not found at {:?}, using defaults", p);
            CfstConfig::default()
        }
        None => CfstConfig::default(),
    };

    config.apply_env_overrides();
    Ok(config)
}

// Default value functions

fn default_executable() -> PathBuf {
    PathBuf::from("./cfst")
}

fn default_results_file() -> PathBuf {
    PathBuf::from("result.csv")
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_interval_hours() -> u64 {
    12
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("cfst_backups")
}

fn default_remote() -> String {
    "genequ".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_max_data_rows() -> usize {
    20
}

fn default_port_suffix() -> String {
    ":8443".to_string()
}

fn default_probe_timeout() -> u64 {
    300
}

fn default_push_timeout() -> u64 {
    120
}
