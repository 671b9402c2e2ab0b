//! Command execution on the device under test.
//!
//! Every device wrapper talks to the system through a [`CommandRunner`], so the same wrapper can run locally, be
//! pointed at a remote host, or be driven by a [`ScriptedRunner`] in tests and dry runs.

use std::collections::VecDeque;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{AutotestError, Result};

/// How often a running command is checked for exit while a timeout is armed.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A command to run, plus how its outcome should be treated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdSpec {
    pub argv: Vec<String>,
    pub timeout: Option<Duration>,
    /// Do not turn a non-zero exit status into an error
    pub ignore_status: bool,
    /// Append stderr to stdout (`2>&1`)
    pub merge_stderr: bool,
}

impl CmdSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            argv: vec![program.into()],
            timeout: None,
            ignore_status: false,
            merge_stderr: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn ignore_status(mut self) -> Self {
        self.ignore_status = true;
        self
    }

    pub fn merge_stderr(mut self) -> Self {
        self.merge_stderr = true;
        self
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    /// Render the command the way it would be typed into a shell, for messages and logs.
    pub fn shell_line(&self) -> String {
        self.argv
            .iter()
            .map(|a| {
                if a.is_empty() || a.contains(|c: char| c.is_whitespace() || c == '"' || c == '\'') {
                    format!("'{}'", a.replace('\'', r"'\''"))
                } else {
                    a.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Outcome of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CmdResult {
    pub command: String,
    /// `None` when the process was terminated by a signal
    pub exit_status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CmdResult {
    /// A successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_status: Some(0),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// A failed result with the given exit status and stderr.
    pub fn failed(exit_status: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_status: Some(exit_status),
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }

    fn into_error(self) -> AutotestError {
        AutotestError::Cmd {
            command: self.command,
            exit_status: self.exit_status,
            stdout: self.stdout,
            stderr: self.stderr,
        }
    }

    /// Apply the `ignore_status` rule of `spec` to this result.
    pub fn check(self, spec: &CmdSpec) -> Result<CmdResult> {
        if self.success() || spec.ignore_status {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }
}

/// Runs commands on a device.
pub trait CommandRunner {
    /// Run a command and return its result.
    ///
    /// Fails with `AutotestError::Cmd` when the command exits non-zero and `spec.ignore_status` is not set, and with
    /// `AutotestError::Timeout` when `spec.timeout` elapses first.
    fn run(&self, spec: &CmdSpec) -> Result<CmdResult>;

    /// Run a command and return its stdout with surrounding whitespace removed.
    fn output(&self, spec: &CmdSpec) -> Result<String> {
        Ok(self.run(spec)?.stdout.trim().to_string())
    }

    /// Run a command for its side effect only.
    fn system(&self, spec: &CmdSpec) -> Result<()> {
        self.run(spec).map(|_| ())
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, spec: &CmdSpec) -> Result<CmdResult> {
        (**self).run(spec)
    }
}

/// Runs commands on the local machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalRunner;

impl LocalRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for LocalRunner {
    fn run(&self, spec: &CmdSpec) -> Result<CmdResult> {
        let command = spec.shell_line();
        tracing::debug!(%command, "running");
        let start = Instant::now();

        let mut child = Command::new(spec.program())
            .args(spec.argv.iter().skip(1))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AutotestError::Cmd {
                command: command.clone(),
                exit_status: None,
                stdout: String::new(),
                stderr: e.to_string(),
            })?;

        // Drain both pipes on their own threads so a chatty command cannot block on a full pipe.
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let status = match spec.timeout {
            None => child.wait()?,
            Some(timeout) => loop {
                if let Some(status) = child.try_wait()? {
                    break status;
                }
                if start.elapsed() >= timeout {
                    if let Err(e) = child.kill() {
                        tracing::warn!("could not kill pid {}: {}", child.id(), e);
                    }
                    if let Err(e) = child.wait() {
                        tracing::warn!("could not reap pid {}: {}", child.id(), e);
                    }
                    return Err(AutotestError::Timeout(format!(
                        "Command <{command}> did not complete within {:.1}s",
                        timeout.as_secs_f64()
                    )));
                }
                thread::sleep(WAIT_POLL_INTERVAL);
            },
        };

        let mut stdout = stdout.map(join_reader).unwrap_or_default();
        let stderr = stderr.map(join_reader).unwrap_or_default();
        if spec.merge_stderr {
            stdout.push_str(&stderr);
        }

        let result = CmdResult {
            command,
            exit_status: status.code(),
            stdout,
            stderr,
            duration: start.elapsed(),
        };
        tracing::debug!(command = %result.command, exit_status = ?result.exit_status, "finished");
        result.check(spec)
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Replays canned results instead of running anything.
///
/// Each expectation pairs an argv prefix with the result to return. Expectations are consumed in order; a command
/// that does not match the next expectation fails with a `TestError` naming both.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    expected: Mutex<VecDeque<(Vec<String>, CmdResult)>>,
    seen: Mutex<Vec<CmdSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a result for the next command whose argv starts with `prefix`.
    pub fn expect<I, S>(self, prefix: I, result: CmdResult) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefix = prefix.into_iter().map(Into::into).collect();
        if let Ok(mut expected) = self.expected.lock() {
            expected.push_back((prefix, result));
        }
        self
    }

    /// Every command run so far, in order.
    pub fn seen(&self) -> Vec<CmdSpec> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Whether every queued expectation has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.expected.lock().map(|e| e.is_empty()).unwrap_or(true)
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CmdSpec) -> Result<CmdResult> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(spec.clone());
        }

        let next = self
            .expected
            .lock()
            .map_err(|_| AutotestError::test_error("scripted runner state poisoned"))?
            .pop_front();

        let Some((prefix, mut result)) = next else {
            return Err(AutotestError::test_error(format!(
                "unexpected command <{}>: no more scripted results",
                spec.shell_line()
            )));
        };
        if !spec.argv.starts_with(&prefix) {
            return Err(AutotestError::test_error(format!(
                "unexpected command <{}>: expected <{}>",
                spec.shell_line(),
                prefix.join(" ")
            )));
        }

        result.command = spec.shell_line();
        if spec.merge_stderr {
            let stderr = result.stderr.clone();
            result.stdout.push_str(&stderr);
        }
        result.check(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_line_quotes_awkward_arguments() {
        let spec = CmdSpec::new("vpd").args(["-s", "region=us west", ""]);
        assert_eq!(spec.shell_line(), "vpd -s 'region=us west' ''");
    }

    #[test]
    fn test_scripted_runner_replays_in_order() {
        let runner = ScriptedRunner::new()
            .expect(["status", "powerd"], CmdResult::ok("powerd start/running, process 42\n"))
            .expect(["stop"], CmdResult::ok(""));

        let out = runner.output(&CmdSpec::new("status").arg("powerd")).unwrap();
        assert_eq!(out, "powerd start/running, process 42");
        runner.system(&CmdSpec::new("stop").arg("powerd")).unwrap();
        assert!(runner.is_exhausted());
        assert_eq!(runner.seen().len(), 2);
    }

    #[test]
    fn test_scripted_runner_honours_ignore_status() {
        let runner = ScriptedRunner::new()
            .expect(["false"], CmdResult::failed(1, "nope"))
            .expect(["false"], CmdResult::failed(1, "nope"));

        let err = runner.run(&CmdSpec::new("false")).unwrap_err();
        assert!(matches!(err, AutotestError::Cmd { exit_status: Some(1), .. }));

        let ok = runner.run(&CmdSpec::new("false").ignore_status()).unwrap();
        assert_eq!(ok.exit_status, Some(1));
    }

    #[test]
    fn test_scripted_runner_merges_stderr() {
        let runner = ScriptedRunner::new().expect(
            ["tpm_manager_client"],
            CmdResult {
                exit_status: Some(0),
                stdout: "out\n".into(),
                stderr: "err\n".into(),
                ..CmdResult::default()
            },
        );
        let out = runner
            .output(&CmdSpec::new("tpm_manager_client").merge_stderr())
            .unwrap();
        assert_eq!(out, "out\nerr");
    }

    #[test]
    fn test_scripted_runner_rejects_unexpected_command() {
        let runner = ScriptedRunner::new().expect(["start"], CmdResult::ok(""));
        let err = runner.run(&CmdSpec::new("stop").arg("ui")).unwrap_err();
        assert_eq!(err.to_string(), "unexpected command <stop ui>: expected <start>");
    }

    #[cfg(unix)]
    #[test]
    fn test_local_runner_captures_output() {
        let out = LocalRunner.output(&CmdSpec::new("echo").arg("hello")).unwrap();
        assert_eq!(out, "hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_local_runner_reports_non_zero_exit() {
        let err = LocalRunner.run(&CmdSpec::new("false")).unwrap_err();
        assert!(matches!(err, AutotestError::Cmd { exit_status: Some(1), .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_local_runner_times_out() {
        let spec = CmdSpec::new("sleep").arg("5").timeout(Duration::from_millis(100));
        let err = LocalRunner.run(&spec).unwrap_err();
        assert!(matches!(err, AutotestError::Timeout(_)), "got {err:?}");
    }

    #[test]
    fn test_local_runner_missing_program() {
        let err = LocalRunner
            .run(&CmdSpec::new("definitely-not-a-real-program-4711"))
            .unwrap_err();
        assert!(matches!(err, AutotestError::Cmd { exit_status: None, .. }));
    }
}
