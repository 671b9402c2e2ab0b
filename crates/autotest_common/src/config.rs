//! Global configuration for autotest
//!
//! The configuration lives in a TOML file whose section names follow the historical global config:
//!
//! ```toml
//! [AUTOTEST_WEB]
//! host = "localhost"
//! database = "chromeos_autotest_db"
//! user = "chromeosqa-admin"
//! password = "..."
//! readonly = false
//!
//! [SCHEDULER]
//! log_dir = "/usr/local/autotest/logs"
//!
//! [CLIENT]
//! results_dir = "results"
//! child_timeout_secs = 3600
//! ```
//!
//! Every key is optional; missing keys fall back to `Default`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AutotestError, Result};

/// Environment variable consulted when no explicit config path is given.
pub const CONFIG_ENV_VAR: &str = "AUTOTEST_CONFIG";

/// Name of the database section used by the scheduler.
pub const DB_CONFIG_SECTION: &str = "AUTOTEST_WEB";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    #[serde(rename = "AUTOTEST_WEB")]
    pub database: DatabaseConfig,
    #[serde(rename = "SCHEDULER")]
    pub scheduler: SchedulerConfig,
    #[serde(rename = "CLIENT")]
    pub client: ClientConfig,
}

/// Connection parameters for the results database (`[AUTOTEST_WEB]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Route reads through the readonly replica
    pub readonly: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            database: "chromeos_autotest_db".to_string(),
            user: "chromeosqa-admin".to_string(),
            password: String::new(),
            readonly: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub log_dir: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub results_dir: PathBuf,
    /// Kill an isolated test that runs longer than this
    pub child_timeout_secs: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            child_timeout_secs: None,
        }
    }
}

impl ClientConfig {
    pub fn child_timeout(&self) -> Option<Duration> {
        self.child_timeout_secs.map(Duration::from_secs)
    }
}

impl GlobalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| AutotestError::Config(e.to_string()))
    }

    /// Read a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| AutotestError::Config(format!("cannot read '{}': {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    /// Load the configuration from `path`, else from `$AUTOTEST_CONFIG`, else use the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match env::var_os(CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => Self::from_file(Path::new(&path)),
            _ => {
                tracing::debug!("no configuration file given, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn with_database(mut self, database: DatabaseConfig) -> Self {
        self.database = database;
        self
    }

    pub fn with_results_dir(mut self, results_dir: impl Into<PathBuf>) -> Self {
        self.client.results_dir = results_dir.into();
        self
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.scheduler.log_dir = log_dir.into();
        self
    }
}
