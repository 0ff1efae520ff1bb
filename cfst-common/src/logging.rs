//! Structured logging initialization shared by cfstd and cfst-upload.

use anyhow::Result;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing_subscriber::{
    EnvFilter, fmt,
    fmt::writer::{BoxMakeWriter, MakeWriterExt},
    util::SubscriberInitExt,
};

/// Logging output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-friendly single-line logs.
    Compact,
    /// Pretty-printed multi-line logs.
    Pretty,
    /// JSON-formatted logs for machine parsing.
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Configuration for logging initialization.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (trace, debug, info, warn, error, off).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Optional file path for daily-rotating logs.
    pub file_path: Option<PathBuf>,
}

impl LogConfig {
    /// Build a logging configuration from the environment.
    ///
    /// Honors `CFST_LOG_LEVEL`, `CFST_LOG_FORMAT` (compact|pretty|json) and
    /// `CFST_LOG_FILE`; `default_level` applies when no level is set.
    pub fn from_env(default_level: &str) -> Self {
        let level =
            std::env::var("CFST_LOG_LEVEL").unwrap_or_else(|_| default_level.to_string());
        let format = std::env::var("CFST_LOG_FORMAT")
            .ok()
            .and_then(|v| LogFormat::parse(&v))
            .unwrap_or(LogFormat::Compact);
        let file_path = std::env::var("CFST_LOG_FILE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Self {
            level,
            format,
            file_path,
        }
    }

    /// Override the base log level.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Build the effective filter, letting `RUST_LOG` win when set.
    fn env_filter(&self) -> EnvFilter {
        if std::env::var_os("RUST_LOG").is_some()
            && let Ok(filter) = EnvFilter::try_from_default_env()
        {
            return filter;
        }
        EnvFilter::new(&self.level)
    }
}

/// Guard that keeps the background log writer alive.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialize tracing for the current process.
///
/// The returned guard must be kept alive for the duration of the program
/// when file logging is enabled.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuard> {
    let filter = config.env_filter();

    let (writer, file_guard) = match config.file_path.as_ref() {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path.file_name().unwrap_or_else(|| OsStr::new("cfst.log"));
            let appender = tracing_appender::rolling::daily(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let writer = BoxMakeWriter::new(std::io::stdout.and(non_blocking));
            (writer, Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stdout), None),
    };
    let ansi = file_guard.is_none();

    let builder = fmt::Subscriber::builder()
        .with_writer(writer)
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(ansi);

    let init_result = match config.format {
        LogFormat::Compact => builder.compact().finish().try_init(),
        LogFormat::Pretty => builder.pretty().finish().try_init(),
        LogFormat::Json => builder.with_ansi(false).json().finish().try_init(),
    };

    if let Err(err) = init_result {
        // A second init in the same process (tests) is not an error.
        if !err.to_string().contains("already") {
            return Err(anyhow::anyhow!(err));
        }
    }

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
