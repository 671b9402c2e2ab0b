//! Test harness: running one test in isolation and recording how it went.
//!
//! ## Flow
//!
//! 1. [`TestDirs::create`] lays out `<resultdir>/<name>/{results,profiling,debug,tmp}`.
//! 2. [`TestRunner::run`] hands a [`TestInvocation`] to a [`TestExecutor`]. The default,
//!    [`ChildProcessExecutor`], re-executes the current binary so the test body runs in its own process with its
//!    own working directory.
//! 3. Inside the child, [`child_main`] runs `setup()` then `execute()` via [`run_body`]. A failure is written to
//!    `debug/error-<pid>` and the child exits 1.
//! 4. The parent re-raises the recorded error (or a generic `TestError` for a bare non-zero exit) and writes the
//!    `status` file, `GOOD` or `FAIL`, whatever happened.
//!
//! ## Modules
//!
//! - `dirs` - per-test directory layout
//! - `status` - the `status` file
//! - `record` - error records exchanged between child and parent
//! - `exec` - executors and the child entry point

pub mod dirs;
pub mod exec;
pub mod record;
pub mod status;

use std::any::Any;
use std::fmt::Display;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};

use autotest_common::{AutotestError, Result};

pub use dirs::TestDirs;
pub use exec::{ChildProcessExecutor, InProcessExecutor, TestExecutor, TestInvocation, child_abort, child_main};
pub use status::{StatusCode, StatusRecord};

/// Name of the keyval file inside a test's `results` directory.
pub const KEYVAL_FILE: &str = "keyval";

/// What a test gets to work with: its directories and the parameters it was invoked with.
#[derive(Debug, Clone)]
pub struct TestContext {
    pub dirs: TestDirs,
    pub params: Vec<String>,
}

impl TestContext {
    pub fn new(dirs: TestDirs, params: Vec<String>) -> Self {
        Self { dirs, params }
    }

    /// Positional parameter `index`, or a `TestError` naming what was expected there.
    pub fn param(&self, index: usize, what: &str) -> Result<&str> {
        self.params
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| AutotestError::test_error(format!("missing parameter {}: {what}", index + 1)))
    }

    /// Append `key=value` lines to `results/keyval`.
    pub fn write_keyval<I, K, V>(&self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Display,
        V: Display,
    {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dirs.resultsdir.join(KEYVAL_FILE))?;
        for (key, value) in pairs {
            writeln!(file, "{key}={value}")?;
        }
        Ok(())
    }
}

/// A test case.
pub trait Test {
    /// One-time preparation before `execute`.
    fn setup(&mut self, _ctx: &mut TestContext) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, ctx: &mut TestContext) -> Result<()>;
}

/// Run `setup()` then `execute()`.
///
/// Autotest errors pass through untouched; a panic is caught and reported as `Unhandled`.
pub fn run_body(name: &str, test: &mut dyn Test, ctx: &mut TestContext) -> Result<()> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        test.setup(ctx)?;
        test.execute(ctx)
    }));
    match outcome {
        Ok(result) => result,
        Err(payload) => Err(AutotestError::Unhandled(format!(
            "running test {name}: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

/// Runs invocations through an executor and records their status.
pub struct TestRunner<'a> {
    executor: Box<dyn TestExecutor + 'a>,
}

impl<'a> TestRunner<'a> {
    pub fn new(executor: impl TestExecutor + 'a) -> Self {
        Self {
            executor: Box::new(executor),
        }
    }

    /// Execute the test and write its `status` file.
    ///
    /// The status file is written whether the test passed or not; on failure the test's own error is returned.
    #[tracing::instrument(skip_all, fields(test = %invocation.name))]
    pub fn run(&self, invocation: &TestInvocation) -> Result<()> {
        let result = self.executor.execute(invocation);
        let status = StatusRecord::from_result(&result);
        match &result {
            Ok(()) => tracing::info!("{}", status),
            Err(e) => tracing::warn!(kind = e.kind(), "{}", status),
        }
        if let Err(e) = status.write(&invocation.dirs.testdir) {
            tracing::error!("could not write status for {}: {}", invocation.name, e);
            return result.and(Err(e));
        }
        result
    }
}
