use crate::config::AppConfig;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Configuration for the logging system
pub struct LogConfig {
    /// Directory where log files will be stored
    pub log_dir: PathBuf,
    /// Prefix for log file names
    pub file_prefix: String,
    /// Maximum number of log files to keep (rotation)
    pub max_files: usize,
    /// Whether to write logs to file
    pub log_to_file: bool,
    /// Log level filter string
    pub log_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: AppConfig::log_dir(),
            file_prefix: "bigfile-uploader".to_string(),
            max_files: 5,
            log_to_file: false,
            log_level: "info".to_string(),
        }
    }
}

impl LogConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            log_dir: AppConfig::log_dir(),
            file_prefix: "bigfile-uploader".to_string(),
            max_files: config.log_max_files,
            log_to_file: config.log_to_file,
            log_level: config.log_level.clone(),
        }
    }
}

/// Initialize the logging system
///
/// Logs go to stderr and, when enabled, to a daily-rotated file.
///
/// # Log Targets
/// - `uploader::hasher` - Content hashing
/// - `uploader::worker` - Chunk transfers
/// - `uploader::orchestrator` - Task state changes
/// - `uploader::manager` - Task registry
/// - `remote::http` / `remote::memory` - Remote store calls
/// - `api` - HTTP requests and responses
/// - `events` - Event publishing
/// - `config` - Configuration loading
/// - `main` - Application lifecycle
///
/// # Example
/// ```bash
/// RUST_LOG=uploader::worker=debug,api=trace bigfile-upload movie.mp4
/// ```
pub fn init_logging(config: LogConfig) -> Result<LogGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // Separate branches due to tracing-subscriber's layer types
    let worker_guard = if config.log_to_file {
        std::fs::create_dir_all(&config.log_dir).context("Failed to create log directory")?;

        let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_prefix(&config.file_prefix)
            .filename_suffix("log")
            .max_log_files(config.max_files)
            .build(&config.log_dir)
            .context("Failed to create file appender")?;

        let (non_blocking_file, worker_guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = fmt::layer()
            .compact()
            .with_writer(non_blocking_file)
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

        // Console layer (human-readable with colors)
        let console_layer = fmt::layer()
            .compact()
            .with_target(true)
            .with_thread_ids(false)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .with_ansi(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(console_layer)
            .try_init()
            .context("Failed to install tracing subscriber")?;

        Some(worker_guard)
    } else {
        let console_layer = fmt::layer()
            .compact()
            .with_target(true)
            .with_thread_ids(false)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .with_ansi(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()
            .context("Failed to install tracing subscriber")?;

        None
    };

    tracing::info!(
        target: "main",
        log_dir = %config.log_dir.display(),
        max_files = config.max_files,
        log_to_file = config.log_to_file,
        log_level = %config.log_level,
        "Logging system initialized"
    );

    Ok(LogGuard {
        _worker_guard: worker_guard,
    })
}

/// Keeps the file appender's worker alive; logs are flushed when dropped
pub struct LogGuard {
    _worker_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        tracing::debug!(target: "main", "Flushing logs before shutdown");
    }
}
