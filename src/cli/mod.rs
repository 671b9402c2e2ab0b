//! CLI module for autotest
//!
//! ## Commands
//!
//! - `run <test> [params...]` - Run one test in its own process and write its status
//! - `job <control>` - Run every test of a TOML control file into one results directory
//! - `list` - List the tests in the catalog
//! - `status <testdir>` - Print the status a finished test left behind
//! - `scheduler` - Set up scheduler logging and check the database connection
//!
//! The hidden `__exec-test` subcommand is the child side of process isolation and is not meant to be typed by hand.
//!
//! ## Design
//!
//! Command functions return `CliResult<T>` instead of calling `process::exit`.
//! Only the top-level `run()` function handles errors and exits.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod commands;

use std::fmt;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use autotest_common::AutotestError;

use crate::scheduler::SchedulerError;

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
}

/// Error type for CLI operations: a user-facing message and the exit code to leave with.
#[derive(Debug)]
pub struct CliError {
    pub message: String,
    pub exit_code: ExitCode,
}

impl CliError {
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    /// Create a failure error (exit code 1).
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }

    pub fn with_code(message: impl Into<String>, code: i32) -> Self {
        Self::new(message, ExitCode(code))
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<AutotestError> for CliError {
    fn from(e: AutotestError) -> Self {
        CliError::failure(format!("Error: {e}"))
    }
}

impl From<SchedulerError> for CliError {
    fn from(e: SchedulerError) -> Self {
        CliError::failure(format!("Error: {e}"))
    }
}

pub type CliResult<T> = Result<T, CliError>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run hardware tests on a ChromeOS device
#[derive(Parser, Debug)]
#[command(name = "autotest")]
#[command(version = VERSION)]
#[command(about = "Run hardware tests on a ChromeOS device", long_about = None)]
pub struct Cli {
    /// Global config file (default: $AUTOTEST_CONFIG, then built-in defaults)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one test in an isolated process
    Run {
        /// Test name, see `autotest list`
        #[arg(value_name = "TEST")]
        test: String,
        /// Results directory (default: [CLIENT] results_dir)
        #[arg(short = 'r', long = "results", value_name = "DIR")]
        results_dir: Option<PathBuf>,
        /// Name the test directory after this tag instead of the test
        #[arg(long)]
        tag: Option<String>,
        /// Run the test body in this process
        #[arg(long)]
        in_process: bool,
        /// Kill the test after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
        /// Parameters passed to the test
        #[arg(value_name = "PARAMS", trailing_var_arg = true, allow_hyphen_values = true)]
        params: Vec<String>,
    },

    /// Run the tests of a control file
    Job {
        /// TOML control file
        #[arg(value_name = "CONTROL")]
        control: PathBuf,
        /// Results directory (default: [CLIENT] results_dir)
        #[arg(short = 'r', long = "results", value_name = "DIR")]
        results_dir: Option<PathBuf>,
        /// Stop on first failure
        #[arg(short = 'x', long = "exitfirst")]
        stop_on_fail: bool,
        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
        /// Run test bodies in this process
        #[arg(long)]
        in_process: bool,
        /// Kill each test after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
        /// Only run tests whose name or tag contains this keyword
        #[arg(short = 'k', value_name = "KEYWORD")]
        filter: Option<String>,
    },

    /// List the available tests
    List,

    /// Print the status of a finished test
    Status {
        #[arg(value_name = "TESTDIR")]
        testdir: PathBuf,
    },

    /// Start scheduler logging and open the database connection
    Scheduler {
        /// Log directory (default: [SCHEDULER] log_dir)
        #[arg(long, value_name = "DIR")]
        log_dir: Option<PathBuf>,
        /// Log file name (default: timestamped)
        #[arg(long, value_name = "NAME")]
        log_name: Option<String>,
    },

    #[command(name = "__exec-test", hide = true)]
    ExecTest {
        #[arg(long, value_name = "DIR")]
        testdir: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(last = true)]
        params: Vec<String>,
    },
}

/// Main CLI entry point.
///
/// This is the only place where `process::exit` is called.
pub fn run() {
    let cli = Cli::parse();

    // The scheduler installs its own subscriber with a log file.
    if !matches!(cli.command, Command::Scheduler { .. }) {
        init_console_logging();
    }

    match execute(cli) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

fn init_console_logging() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Execute the CLI command and return result.
pub fn execute(cli: Cli) -> CliResult<ExitCode> {
    let config = autotest_common::GlobalConfig::load(cli.config.as_deref());
    let config_path = cli.config;
    match cli.command {
        Command::Run {
            test,
            results_dir,
            tag,
            in_process,
            timeout,
            params,
        } => commands::run_test(
            &config?,
            commands::RunArgs {
                test,
                params,
                tag,
                results_dir,
                in_process,
                timeout,
                config_path,
            },
        ),
        Command::Job {
            control,
            results_dir,
            stop_on_fail,
            verbose,
            in_process,
            timeout,
            filter,
        } => commands::run_job(
            &config?,
            commands::JobArgs {
                control,
                results_dir,
                stop_on_fail,
                verbose,
                in_process,
                timeout,
                filter,
                config_path,
            },
        ),
        Command::List => commands::list_tests(),
        Command::Status { testdir } => commands::show_status(&testdir),
        Command::Scheduler { log_dir, log_name } => commands::start_scheduler(&config?, log_dir, log_name),
        // A config error in the child is recorded for the parent like any other test failure.
        Command::ExecTest { testdir, name, params } => commands::exec_test(config, &name, &testdir, params),
    }
}
