//! Scheduler logging: INFO and above to the console, everything down to DEBUG into a timestamped file.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, fmt};

use autotest_common::GlobalConfig;

use super::{SchedulerError, SchedulerResult};

pub const DEFAULT_LOG_PREFIX: &str = "scheduler";
const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H.%M.%S";

#[derive(Debug, Clone)]
pub struct SchedulerLoggingConfig {
    pub log_dir: PathBuf,
    /// Fixed file name; a timestamped one is generated when unset.
    pub log_name: Option<String>,
    pub prefix: String,
    pub console_level: LevelFilter,
    pub file_level: LevelFilter,
}

impl SchedulerLoggingConfig {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            log_name: None,
            prefix: DEFAULT_LOG_PREFIX.to_string(),
            console_level: LevelFilter::INFO,
            file_level: LevelFilter::DEBUG,
        }
    }

    pub fn with_log_name(mut self, log_name: Option<String>) -> Self {
        self.log_name = log_name;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// `<prefix>.log.<YYYY-mm-dd-HH.MM.SS>`, e.g. `scheduler.log.2014-05-12-17.24.02`.
    pub fn get_log_name(prefix: &str) -> String {
        format!("{prefix}.log.{}", chrono::Local::now().format(LOG_TIMESTAMP_FORMAT))
    }

    pub fn log_path(&self) -> PathBuf {
        let name = match self.log_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => Self::get_log_name(&self.prefix),
        };
        self.log_dir.join(name)
    }

    /// Create the log directory and the log file in it.
    pub fn open_log_file(&self) -> SchedulerResult<(PathBuf, File)> {
        let path = self.log_path();
        std::fs::create_dir_all(&self.log_dir).map_err(|e| logging_error(&self.log_dir, e))?;
        let file = File::create(&path).map_err(|e| logging_error(&path, e))?;
        Ok((path, file))
    }

    /// Install the console and file layers as the global subscriber. Returns the log file path.
    pub fn install(&self) -> SchedulerResult<PathBuf> {
        let (path, file) = self.open_log_file()?;
        let console = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(self.console_level);
        let logfile = fmt::layer()
            .with_writer(Arc::new(file))
            .with_ansi(false)
            .with_filter(self.file_level);
        tracing_subscriber::registry()
            .with(console)
            .with(logfile)
            .try_init()
            .map_err(|e| SchedulerError::Logging(e.to_string()))?;
        Ok(path)
    }
}

fn logging_error(path: &Path, e: std::io::Error) -> SchedulerError {
    SchedulerError::Logging(format!("{}: {e}", path.display()))
}

/// Set up scheduler logging. `log_dir` defaults to the `[SCHEDULER]` log directory in `config`.
pub fn setup_logging(
    log_dir: Option<&Path>,
    log_name: Option<String>,
    prefix: &str,
    config: &GlobalConfig,
) -> SchedulerResult<PathBuf> {
    let log_dir = log_dir.map_or_else(|| config.scheduler.log_dir.clone(), Path::to_path_buf);
    SchedulerLoggingConfig::new(log_dir)
        .with_log_name(log_name)
        .with_prefix(prefix)
        .install()
}
