//! Scheduler support: the per-process database connection manager and scheduler logging.
//!
//! The scheduler never talks to the database directly. It asks the process-wide [`ConnectionManager`] for a
//! connection, which is opened lazily from the `[AUTOTEST_WEB]` config section on first use and kept until
//! [`ConnectionManager::disconnect`].

pub mod logging;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use miette::Diagnostic;
use thiserror::Error;

use autotest_common::AutotestError;
use autotest_common::config::{DB_CONFIG_SECTION, DatabaseConfig};

pub use logging::{SchedulerLoggingConfig, setup_logging};

#[derive(Debug, Error, Diagnostic)]
pub enum SchedulerError {
    /// The scheduler found itself in a state it cannot continue from.
    #[error("inconsistent scheduler state: {0}")]
    #[diagnostic(code(autotest::scheduler::state))]
    InconsistentState(String),

    #[error("database [{section}]: {message}")]
    #[diagnostic(code(autotest::scheduler::database))]
    Database { section: String, message: String },

    #[error("scheduler logging: {0}")]
    #[diagnostic(code(autotest::scheduler::logging))]
    Logging(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Autotest(#[from] AutotestError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// How the connection manager sets up connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Globally disable readonly connections
    pub readonly: bool,
    pub autocommit: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            readonly: false,
            autocommit: true,
        }
    }
}

/// An open (or openable) database connection.
pub trait DatabaseConnection: Send + Sync + fmt::Debug {
    fn connect(&self) -> SchedulerResult<()>;
    fn disconnect(&self) -> SchedulerResult<()>;
    fn is_connected(&self) -> bool;
    /// Human readable connection target, without credentials.
    fn describe(&self) -> String;
}

/// Creates connections for a config section.
pub trait Connector: Send + Sync {
    fn open(&self, section: &str, options: &ConnectionOptions) -> SchedulerResult<Arc<dyn DatabaseConnection>>;
}

/// Connection handle described by the `[AUTOTEST_WEB]` section of the global config.
#[derive(Debug)]
pub struct ConfigConnection {
    config: DatabaseConfig,
    options: ConnectionOptions,
    connected: AtomicBool,
}

impl DatabaseConnection for ConfigConnection {
    fn connect(&self) -> SchedulerResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!("connected to {}", self.describe());
        Ok(())
    }

    fn disconnect(&self) -> SchedulerResult<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Err(SchedulerError::InconsistentState(format!(
                "{} is not connected",
                self.describe()
            )));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn describe(&self) -> String {
        let mut target = format!("{}@{}/{}", self.config.user, self.config.host, self.config.database);
        if self.config.readonly && !self.options.readonly {
            target.push_str(" (readonly)");
        }
        if self.options.autocommit {
            target.push_str(" (autocommit)");
        }
        target
    }
}

/// Opens [`ConfigConnection`]s from a [`DatabaseConfig`].
#[derive(Debug, Clone)]
pub struct ConfigConnector {
    config: DatabaseConfig,
}

impl ConfigConnector {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }
}

impl Connector for ConfigConnector {
    fn open(&self, section: &str, options: &ConnectionOptions) -> SchedulerResult<Arc<dyn DatabaseConnection>> {
        let invalid = |message: &str| SchedulerError::Database {
            section: section.to_string(),
            message: message.to_string(),
        };
        if section != DB_CONFIG_SECTION {
            return Err(invalid("no such config section"));
        }
        if self.config.host.trim().is_empty() {
            return Err(invalid("host is not set"));
        }
        if self.config.database.trim().is_empty() {
            return Err(invalid("database is not set"));
        }
        Ok(Arc::new(ConfigConnection {
            config: self.config.clone(),
            options: *options,
            connected: AtomicBool::new(false),
        }))
    }
}

static INSTANCE: OnceLock<ConnectionManager> = OnceLock::new();

/// Owner of the scheduler's database connection. One per process, see [`ConnectionManager::instance`].
pub struct ConnectionManager {
    options: ConnectionOptions,
    connector: Box<dyn Connector>,
    connection: Mutex<Option<Arc<dyn DatabaseConnection>>>,
}

impl ConnectionManager {
    /// A standalone manager. Most callers want [`ConnectionManager::instance`].
    pub fn new(options: ConnectionOptions, connector: impl Connector + 'static) -> Self {
        Self {
            options,
            connector: Box::new(connector),
            connection: Mutex::new(None),
        }
    }

    /// The process-wide manager. The first call creates it; the arguments of later calls are ignored.
    pub fn instance(options: ConnectionOptions, connector: impl Connector + 'static) -> &'static ConnectionManager {
        INSTANCE.get_or_init(|| Self::new(options, connector))
    }

    pub fn options(&self) -> ConnectionOptions {
        self.options
    }

    /// Open a new connection to the `[AUTOTEST_WEB]` database.
    pub fn open_connection(&self) -> SchedulerResult<Arc<dyn DatabaseConnection>> {
        let db = self.connector.open(DB_CONFIG_SECTION, &self.options)?;
        db.connect()?;
        Ok(db)
    }

    /// The cached connection, opened on first use.
    pub fn get_connection(&self) -> SchedulerResult<Arc<dyn DatabaseConnection>> {
        let mut slot = self
            .connection
            .lock()
            .map_err(|_| SchedulerError::InconsistentState("connection lock poisoned".into()))?;
        if let Some(db) = slot.as_ref() {
            return Ok(Arc::clone(db));
        }
        let db = self.open_connection()?;
        *slot = Some(Arc::clone(&db));
        Ok(db)
    }

    /// Close the connection. Failures are logged, never raised.
    pub fn disconnect(&self) {
        let db = match self.connection.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => {
                tracing::debug!("Could not close the db connection. connection lock poisoned");
                return;
            }
        };
        match db {
            Some(db) => {
                if let Err(e) = db.disconnect() {
                    tracing::debug!("Could not close the db connection. {}", e);
                }
            }
            None => tracing::debug!("Could not close the db connection. no connection open"),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        opened: Arc<AtomicUsize>,
    }

    impl Connector for Counting {
        fn open(&self, section: &str, options: &ConnectionOptions) -> SchedulerResult<Arc<dyn DatabaseConnection>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            ConfigConnector::new(DatabaseConfig::default()).open(section, options)
        }
    }

    #[test]
    fn test_connection_is_opened_once_and_cached() {
        let opened = Arc::new(AtomicUsize::new(0));
        let manager = ConnectionManager::new(
            ConnectionOptions::default(),
            Counting {
                opened: Arc::clone(&opened),
            },
        );
        let a = manager.get_connection().unwrap();
        let b = manager.get_connection().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_connected());
        assert_eq!(opened.load(Ordering::SeqCst), 1);

        manager.disconnect();
        assert!(!a.is_connected());
        let c = manager.get_connection().unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_disconnect_without_connection_is_harmless() {
        let manager = ConnectionManager::new(ConnectionOptions::default(), ConfigConnector::new(DatabaseConfig::default()));
        manager.disconnect();
        manager.disconnect();
    }

    #[test]
    fn test_config_connector_validates_section() {
        let connector = ConfigConnector::new(DatabaseConfig {
            host: String::new(),
            ..DatabaseConfig::default()
        });
        let err = connector.open(DB_CONFIG_SECTION, &ConnectionOptions::default()).unwrap_err();
        assert_eq!(err.to_string(), "database [AUTOTEST_WEB]: host is not set");

        let err = ConfigConnector::new(DatabaseConfig::default())
            .open("CLIENT", &ConnectionOptions::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "database [CLIENT]: no such config section");
    }

    #[test]
    fn test_describe_hides_password() {
        let db = ConfigConnector::new(DatabaseConfig {
            password: "hunter2".into(),
            readonly: true,
            ..DatabaseConfig::default()
        })
        .open(
            DB_CONFIG_SECTION,
            &ConnectionOptions {
                readonly: false,
                autocommit: false,
            },
        )
        .unwrap();
        assert_eq!(db.describe(), "chromeosqa-admin@localhost/chromeos_autotest_db (readonly)");
    }

    #[test]
    fn test_readonly_option_overrides_config() {
        let db = ConfigConnector::new(DatabaseConfig {
            readonly: true,
            ..DatabaseConfig::default()
        })
        .open(
            DB_CONFIG_SECTION,
            &ConnectionOptions {
                readonly: true,
                autocommit: true,
            },
        )
        .unwrap();
        assert_eq!(db.describe(), "chromeosqa-admin@localhost/chromeos_autotest_db (autocommit)");
    }

    #[test]
    fn test_instance_is_a_singleton() {
        let first = ConnectionManager::instance(
            ConnectionOptions::default(),
            ConfigConnector::new(DatabaseConfig::default()),
        );
        let second = ConnectionManager::instance(
            ConnectionOptions {
                readonly: true,
                autocommit: false,
            },
            ConfigConnector::new(DatabaseConfig::default()),
        );
        assert!(std::ptr::eq(first, second));
        assert_eq!(second.options(), ConnectionOptions::default());
    }
}
