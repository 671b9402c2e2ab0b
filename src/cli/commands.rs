//! CLI command implementations
//!
//! All command functions return `CliResult<ExitCode>` instead of calling
//! `process::exit`. Error handling and exits happen in the top-level `run()`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use autotest_common::GlobalConfig;
use autotest_common::config::DB_CONFIG_SECTION;

use crate::catalog::Catalog;
use crate::harness::{ChildProcessExecutor, InProcessExecutor, StatusRecord, TestExecutor, child_abort, child_main};
use crate::job::{ConsoleReporter, ControlFile, Job, RunOptions, TestSpec};
use crate::scheduler::logging::DEFAULT_LOG_PREFIX;
use crate::scheduler::{ConfigConnector, ConnectionManager, ConnectionOptions, setup_logging};

use super::{CliError, CliResult, ExitCode};

#[derive(Debug, Clone)]
pub struct RunArgs {
    pub test: String,
    pub params: Vec<String>,
    pub tag: Option<String>,
    pub results_dir: Option<PathBuf>,
    pub in_process: bool,
    pub timeout: Option<u64>,
    /// Forwarded to isolated test processes
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct JobArgs {
    pub control: PathBuf,
    pub results_dir: Option<PathBuf>,
    pub stop_on_fail: bool,
    pub verbose: bool,
    pub in_process: bool,
    pub timeout: Option<u64>,
    pub filter: Option<String>,
    /// Forwarded to isolated test processes
    pub config_path: Option<PathBuf>,
}

/// Pick the executor for a run. The timeout on the command line wins over the config.
fn executor<'c>(
    catalog: &'c Catalog,
    config: &GlobalConfig,
    in_process: bool,
    timeout: Option<u64>,
    config_path: Option<PathBuf>,
) -> CliResult<Box<dyn TestExecutor + 'c>> {
    if in_process {
        return Ok(Box::new(InProcessExecutor::new(catalog)));
    }
    let timeout = timeout.map(Duration::from_secs).or_else(|| config.client.child_timeout());
    Ok(Box::new(
        ChildProcessExecutor::current_exe()?
            .with_timeout(timeout)
            .with_config(config_path),
    ))
}

fn results_dir(config: &GlobalConfig, results_dir: Option<PathBuf>) -> PathBuf {
    results_dir.unwrap_or_else(|| config.client.results_dir.clone())
}

/// Run one test and print its status line.
pub fn run_test(config: &GlobalConfig, args: RunArgs) -> CliResult<ExitCode> {
    let catalog = Catalog::builtin();
    if !catalog.contains(&args.test) {
        return Err(CliError::failure(format!("Error: test {} not found in catalog", args.test)));
    }
    let executor = executor(&catalog, config, args.in_process, args.timeout, args.config_path)?;
    let mut job = Job::new(results_dir(config, args.results_dir), &*executor)?;

    let mut spec = TestSpec::new(&args.test).with_args(args.params);
    if let Some(tag) = args.tag {
        spec = spec.with_tag(tag);
    }
    let outcome = job.run_test(&spec)?;
    println!("{}\t{}", outcome.status, outcome.testdir.display());
    Ok(if outcome.passed() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Run every test of a control file.
pub fn run_job(config: &GlobalConfig, args: JobArgs) -> CliResult<ExitCode> {
    let control = ControlFile::from_file(&args.control)?;
    if control.tests.is_empty() {
        return Err(CliError::failure(format!(
            "Error: no tests in control file {}",
            args.control.display()
        )));
    }
    let catalog = Catalog::builtin();
    let executor = executor(&catalog, config, args.in_process, args.timeout, args.config_path)?;
    let mut job = Job::new(results_dir(config, args.results_dir), &*executor)?;

    let opts = RunOptions {
        stop_on_fail: args.stop_on_fail,
        filter: args.filter,
    };
    let mut reporter = ConsoleReporter::new(args.verbose);
    let (summary, _) = job.run_all(&control.tests, &opts, &mut reporter)?;
    Ok(if summary.success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

pub fn list_tests() -> CliResult<ExitCode> {
    for name in Catalog::builtin().names() {
        println!("{name}");
    }
    Ok(ExitCode::SUCCESS)
}

/// Print the `status` file of a test directory. Exits non-zero for anything but `GOOD`.
pub fn show_status(testdir: &Path) -> CliResult<ExitCode> {
    let status = StatusRecord::read(testdir)?;
    println!("{status}");
    Ok(if status.is_good() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Set up scheduler logging, then open and close the scheduler's database connection.
pub fn start_scheduler(config: &GlobalConfig, log_dir: Option<PathBuf>, log_name: Option<String>) -> CliResult<ExitCode> {
    let log_path = setup_logging(log_dir.as_deref(), log_name, DEFAULT_LOG_PREFIX, config)?;
    tracing::info!("scheduler logging to {}", log_path.display());

    let manager = ConnectionManager::instance(
        ConnectionOptions::default(),
        ConfigConnector::new(config.database.clone()),
    );
    let db = manager.get_connection()?;
    tracing::info!("[{}] connected to {}", DB_CONFIG_SECTION, db.describe());
    manager.disconnect();
    Ok(ExitCode::SUCCESS)
}

/// Child side of process isolation.
pub fn exec_test(
    config: autotest_common::Result<GlobalConfig>,
    name: &str,
    testdir: &Path,
    params: Vec<String>,
) -> CliResult<ExitCode> {
    let code = match config {
        Ok(_) => child_main(&Catalog::builtin(), name, testdir, params),
        Err(e) => child_abort(name, testdir, &e),
    };
    match code {
        0 => Ok(ExitCode::SUCCESS),
        // The error is already recorded for the parent.
        code => Err(CliError::new("", ExitCode(code))),
    }
}
