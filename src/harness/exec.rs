//! Test executors.
//!
//! An executor turns a [`TestInvocation`] into a pass (`Ok`) or the error the test failed with. It does not touch
//! the status file; that is [`super::TestRunner`]'s job.

use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{self, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use autotest_common::{AutotestError, Result};

use super::dirs::TestDirs;
use super::record;
use super::{TestContext, run_body};
use crate::catalog::Catalog;

/// Hidden subcommand the child process is started with.
pub const EXEC_TEST_SUBCOMMAND: &str = "__exec-test";

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One test to run: which test, with what parameters, in which directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestInvocation {
    pub name: String,
    pub params: Vec<String>,
    pub dirs: TestDirs,
}

impl TestInvocation {
    pub fn new(name: impl Into<String>, params: Vec<String>, dirs: TestDirs) -> Self {
        Self {
            name: name.into(),
            params,
            dirs,
        }
    }
}

/// Strategy for executing a test body.
pub trait TestExecutor {
    fn execute(&self, invocation: &TestInvocation) -> Result<()>;
}

impl<E: TestExecutor + ?Sized> TestExecutor for &E {
    fn execute(&self, invocation: &TestInvocation) -> Result<()> {
        (**self).execute(invocation)
    }
}

/// Runs each test in a fresh process by re-executing `program` with the hidden `__exec-test` subcommand.
#[derive(Debug, Clone)]
pub struct ChildProcessExecutor {
    program: PathBuf,
    timeout: Option<Duration>,
    config: Option<PathBuf>,
}

impl ChildProcessExecutor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
            config: None,
        }
    }

    /// An executor that re-executes the running binary.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(env::current_exe()?))
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pass `--config <path>` to the child so it loads the same configuration as the parent.
    pub fn with_config(mut self, config: Option<PathBuf>) -> Self {
        self.config = config;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn wait(&self, child: &mut process::Child, name: &str) -> Result<ExitStatus> {
        let Some(timeout) = self.timeout else {
            return Ok(child.wait()?);
        };
        let start = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if start.elapsed() >= timeout {
                if let Err(e) = child.kill() {
                    tracing::warn!("could not kill pid {}: {}", child.id(), e);
                }
                if let Err(e) = child.wait() {
                    tracing::warn!("could not reap pid {}: {}", child.id(), e);
                }
                return Err(AutotestError::Timeout(format!(
                    "test {name} did not complete within {:.1}s",
                    timeout.as_secs_f64()
                )));
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }
}

impl TestExecutor for ChildProcessExecutor {
    fn execute(&self, invocation: &TestInvocation) -> Result<()> {
        let name = &invocation.name;
        // Flush before the child starts writing to the same streams.
        io::stdout().flush()?;
        io::stderr().flush()?;

        let mut command = Command::new(&self.program);
        if let Some(config) = &self.config {
            command.arg("--config").arg(config);
        }
        let mut child = command
            .arg(EXEC_TEST_SUBCOMMAND)
            .arg("--testdir")
            .arg(&invocation.dirs.testdir)
            .arg("--name")
            .arg(name)
            .arg("--")
            .args(&invocation.params)
            .spawn()
            .map_err(|e| AutotestError::test_error(format!("could not start test {name}: {e}")))?;
        let pid = child.id();
        tracing::debug!(pid, program = %self.program.display(), "spawned test process");

        let status = self.wait(&mut child, name)?;

        if let Some(err) = record::read_record(&invocation.dirs.debugdir, pid)? {
            return Err(err);
        }
        if !status.success() {
            let rc = status.code().map_or_else(|| "killed".to_string(), |c| c.to_string());
            return Err(AutotestError::test_error(format!("test {name} failed rc={rc}")));
        }
        Ok(())
    }
}

/// Runs the test body in the calling process. No isolation: the working directory is left alone and a crash takes
/// the caller down with it.
#[derive(Clone, Copy)]
pub struct InProcessExecutor<'c> {
    catalog: &'c Catalog,
}

impl<'c> InProcessExecutor<'c> {
    pub fn new(catalog: &'c Catalog) -> Self {
        Self { catalog }
    }
}

impl TestExecutor for InProcessExecutor<'_> {
    fn execute(&self, invocation: &TestInvocation) -> Result<()> {
        let mut test = self.catalog.create(&invocation.name)?;
        let mut ctx = TestContext::new(invocation.dirs.clone(), invocation.params.clone());
        run_body(&invocation.name, test.as_mut(), &mut ctx)
    }
}

/// Child side of [`ChildProcessExecutor`]. Returns the process exit code.
///
/// On failure the error is recorded under this process's pid so the parent can pick it up.
#[tracing::instrument(skip(catalog, params))]
pub fn child_main(catalog: &Catalog, name: &str, testdir: &Path, params: Vec<String>) -> i32 {
    let dirs = match TestDirs::open(testdir) {
        Ok(dirs) => dirs,
        Err(e) => {
            tracing::error!("{}", e);
            return 1;
        }
    };

    let result = catalog.create(name).and_then(|mut test| {
        env::set_current_dir(&dirs.testdir)?;
        let mut ctx = TestContext::new(dirs.clone(), params);
        run_body(name, test.as_mut(), &mut ctx)
    });

    match result {
        Ok(()) => 0,
        Err(err) => record_failure(&dirs, name, &err),
    }
}

/// Child side failure before the test could start, e.g. an unreadable configuration. Returns the exit code.
pub fn child_abort(name: &str, testdir: &Path, err: &AutotestError) -> i32 {
    match TestDirs::open(testdir) {
        Ok(dirs) => record_failure(&dirs, name, err),
        Err(e) => {
            tracing::error!("{}: {}", e, err);
            1
        }
    }
}

fn record_failure(dirs: &TestDirs, name: &str, err: &AutotestError) -> i32 {
    if let Err(e) = record::write_record(&dirs.debugdir, process::id(), err) {
        tracing::error!("could not record error for {}: {}", name, e);
    }
    1
}
