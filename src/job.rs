//! Jobs: running a list of tests into one results directory.
//!
//! ## Control files
//!
//! A job is described by a TOML control file:
//!
//! ```toml
//! [[test]]
//! name = "platform_UpstartJob"
//! args = ["ui"]
//! tag = "ui_running"
//! ```
//!
//! Each test gets its own directory under the job's results directory, named after its tag, else its name. A name
//! that repeats within the job gets a `.<n>` suffix from the second run on. Every finished test appends one
//! `STATUS\t<dir>\t<message>` line to `status.log`.
//!
//! ## Reporting
//!
//! Progress goes through the [`JobReporter`] trait so output formats can be swapped without touching execution.
//! [`ConsoleReporter`] prints a compact pytest-style report.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Deserialize;

use autotest_common::{AutotestError, Result};

use crate::harness::{StatusRecord, TestDirs, TestExecutor, TestInvocation, TestRunner};

pub const STATUS_LOG: &str = "status.log";

/// One entry of a control file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TestSpec {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub tag: Option<String>,
}

impl TestSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            tag: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    fn base_dir_name(&self) -> &str {
        self.tag.as_deref().unwrap_or(&self.name)
    }

    /// Keyword match against the test name and tag.
    pub fn matches(&self, keyword: &str) -> bool {
        self.name.contains(keyword) || self.tag.as_deref().is_some_and(|t| t.contains(keyword))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ControlFile {
    #[serde(rename = "test", default)]
    pub tests: Vec<TestSpec>,
}

impl ControlFile {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| AutotestError::parse("control file", e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| AutotestError::test_error(format!("cannot read control file {}: {e}", path.display())))?;
        Self::parse(&text)
    }
}

/// What happened to one test of a job.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub spec: TestSpec,
    pub testdir: PathBuf,
    pub status: StatusRecord,
    pub error: Option<AutotestError>,
    pub duration: Duration,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }

    /// Name of the test directory, as written to `status.log`.
    pub fn dir_name(&self) -> String {
        self.testdir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration: Duration,
}

impl JobSummary {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop after the first failing test
    pub stop_on_fail: bool,
    /// Only run tests whose name or tag contains this keyword
    pub filter: Option<String>,
}

/// Receives job progress.
pub trait JobReporter {
    fn on_job_start(&mut self, _resultdir: &Path, _test_count: usize) {}

    fn on_test_start(&mut self, _spec: &TestSpec) {}

    fn on_test_complete(&mut self, outcome: &TestOutcome);

    fn on_job_complete(&mut self, summary: &JobSummary, outcomes: &[TestOutcome]);
}

/// Console reporter (pytest-style).
pub struct ConsoleReporter<W: Write = io::Stderr> {
    out: W,
    pub verbose: bool,
    pub color: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self::with_writer(io::stderr(), verbose, true)
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn with_writer(out: W, verbose: bool, color: bool) -> Self {
        Self { out, verbose, color }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn paint(&self, ansi: &str, text: &str) -> String {
        if self.color {
            format!("\x1b[{ansi}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }
}

// Write errors on the console are ignored.
impl<W: Write> JobReporter for ConsoleReporter<W> {
    fn on_job_start(&mut self, resultdir: &Path, test_count: usize) {
        let banner = self.paint("1", "=================== autotest job starts ===================");
        let _ = writeln!(self.out, "{banner}");
        let _ = writeln!(self.out, "results: {}", resultdir.display());
        let _ = writeln!(self.out, "collected {test_count} test(s)");
        let _ = writeln!(self.out);
    }

    fn on_test_start(&mut self, spec: &TestSpec) {
        if self.verbose {
            let _ = write!(self.out, "{} ... ", spec.base_dir_name());
        }
    }

    fn on_test_complete(&mut self, outcome: &TestOutcome) {
        let status = match (&outcome.error, self.verbose) {
            (None, true) => format!("{} ({}ms)", self.paint("32", "PASSED"), outcome.duration.as_millis()),
            (None, false) => self.paint("32", "."),
            (Some(e), true) => format!(
                "{} {} ({}ms)",
                self.paint("31", "FAILED"),
                e.kind(),
                outcome.duration.as_millis()
            ),
            (Some(_), false) => self.paint("31", "F"),
        };
        if self.verbose {
            let _ = writeln!(self.out, "{status}");
        } else {
            let _ = write!(self.out, "{status}");
        }
    }

    fn on_job_complete(&mut self, summary: &JobSummary, outcomes: &[TestOutcome]) {
        if !self.verbose {
            let _ = writeln!(self.out);
        }

        let failures: Vec<&TestOutcome> = outcomes.iter().filter(|o| !o.passed()).collect();
        if !failures.is_empty() {
            let _ = writeln!(self.out);
            let header = self.paint("1;31", "=================== FAILURES ===================");
            let _ = writeln!(self.out, "{header}");
            for outcome in failures {
                let _ = writeln!(self.out, "___________ {} ___________", outcome.dir_name());
                let _ = writeln!(self.out, "    {}", outcome.status.message);
            }
        }
        let _ = writeln!(self.out);

        let mut parts = Vec::new();
        if summary.passed > 0 {
            parts.push(self.paint("32", &format!("{} passed", summary.passed)));
        }
        if summary.failed > 0 {
            parts.push(self.paint("31", &format!("{} failed", summary.failed)));
        }
        if parts.is_empty() {
            parts.push("no tests ran".to_string());
        }
        let _ = writeln!(
            self.out,
            "====== {} in {:.2}s ======",
            parts.join(", "),
            summary.duration.as_secs_f64()
        );
    }
}

/// A job: a results directory plus the runner its tests go through.
pub struct Job<'a> {
    resultdir: PathBuf,
    runner: TestRunner<'a>,
    runs: HashMap<String, usize>,
}

impl<'a> Job<'a> {
    pub fn new(resultdir: impl Into<PathBuf>, executor: impl TestExecutor + 'a) -> Result<Self> {
        let resultdir = resultdir.into();
        fs::create_dir_all(&resultdir)?;
        Ok(Self {
            resultdir,
            runner: TestRunner::new(executor),
            runs: HashMap::new(),
        })
    }

    pub fn resultdir(&self) -> &Path {
        &self.resultdir
    }

    /// Tag or name for the first run, then `<base>.2`, `<base>.3`, ... Names already present in the results
    /// directory are skipped.
    fn next_dir_name(&mut self, spec: &TestSpec) -> String {
        let base = spec.base_dir_name().to_string();
        let count = self.runs.entry(base.clone()).or_insert(0);
        loop {
            *count += 1;
            let name = if *count == 1 { base.clone() } else { format!("{base}.{count}") };
            if !self.resultdir.join(&name).exists() {
                return name;
            }
        }
    }

    fn append_status_log(&self, dir_name: &str, status: &StatusRecord) -> Result<()> {
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.resultdir.join(STATUS_LOG))?;
        // One line per test, even for multi-line command failures.
        let message = status.message.lines().collect::<Vec<_>>().join(" ");
        writeln!(log, "{}\t{}\t{}", status.code, dir_name, message)?;
        Ok(())
    }

    /// Run one test.
    ///
    /// A failing test is reported through the returned outcome; `Err` means the job itself could not proceed (the
    /// test directory or the status log could not be written).
    pub fn run_test(&mut self, spec: &TestSpec) -> Result<TestOutcome> {
        let dir_name = self.next_dir_name(spec);
        let dirs = TestDirs::create(&self.resultdir, &dir_name)?;
        let invocation = TestInvocation::new(&spec.name, spec.args.clone(), dirs);

        let start = Instant::now();
        let result = self.runner.run(&invocation);
        let duration = start.elapsed();

        let status = StatusRecord::from_result(&result);
        self.append_status_log(&dir_name, &status)?;
        Ok(TestOutcome {
            spec: spec.clone(),
            testdir: invocation.dirs.testdir,
            status,
            error: result.err(),
            duration,
        })
    }

    /// Run `specs` in order, reporting progress to `reporter`.
    #[tracing::instrument(skip_all, fields(resultdir = %self.resultdir.display()))]
    pub fn run_all(
        &mut self,
        specs: &[TestSpec],
        opts: &RunOptions,
        reporter: &mut dyn JobReporter,
    ) -> Result<(JobSummary, Vec<TestOutcome>)> {
        let start = Instant::now();
        let selected: Vec<&TestSpec> = specs
            .iter()
            .filter(|s| opts.filter.as_deref().is_none_or(|k| s.matches(k)))
            .collect();
        reporter.on_job_start(&self.resultdir, selected.len());

        let mut outcomes = Vec::with_capacity(selected.len());
        let mut summary = JobSummary::default();
        for spec in selected {
            reporter.on_test_start(spec);
            let outcome = self.run_test(spec)?;
            reporter.on_test_complete(&outcome);

            summary.total += 1;
            if outcome.passed() {
                summary.passed += 1;
            } else {
                summary.failed += 1;
            }
            let stop = opts.stop_on_fail && !outcome.passed();
            outcomes.push(outcome);
            if stop {
                tracing::info!("stopping after first failure");
                break;
            }
        }

        summary.duration = start.elapsed();
        reporter.on_job_complete(&summary, &outcomes);
        Ok((summary, outcomes))
    }
}
