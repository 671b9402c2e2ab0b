//! Upstart jobs: status, start, stop and events.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use autotest_common::{AutotestError, CmdSpec, CommandRunner, PollOptions, Result, poll_for_condition};

/// Where upstart job definitions are installed.
pub const DEFAULT_INIT_DIR: &str = "/etc/init";

static TRANSITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"start/(pre-start|post-start)").expect("INVARIANT: static regex is valid"));
static PID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"process ([0-9]+)").expect("INVARIANT: static regex is valid"));

pub struct Upstart<'a> {
    runner: &'a dyn CommandRunner,
    init_dir: PathBuf,
    settle: PollOptions,
}

impl<'a> Upstart<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            init_dir: PathBuf::from(DEFAULT_INIT_DIR),
            settle: PollOptions::new()
                .with_timeout(Duration::from_secs(10))
                .with_sleep_interval(Duration::from_secs(1)),
        }
    }

    pub fn with_init_dir(mut self, init_dir: impl Into<PathBuf>) -> Self {
        self.init_dir = init_dir.into();
        self
    }

    /// How long `is_running` waits for a job to leave `pre-start`/`post-start`.
    pub fn with_settle(mut self, settle: PollOptions) -> Self {
        self.settle = settle;
        self
    }

    pub fn init_dir(&self) -> &Path {
        &self.init_dir
    }

    fn status(&self, service: &str) -> Result<String> {
        self.runner.output(&CmdSpec::new("status").arg(service))
    }

    pub fn emit_event(&self, event: &str) -> Result<()> {
        self.runner.system(&CmdSpec::new("initctl").args(["emit", event]))
    }

    /// Fail unless `service` reports `start/running`.
    pub fn ensure_running(&self, service: &str) -> Result<()> {
        let out = self.runner.output(&CmdSpec::new("initctl").args(["status", service]))?;
        if out.contains("start/running") {
            Ok(())
        } else {
            Err(AutotestError::test_fail(format!("{service} is not running: {out}")))
        }
    }

    /// Whether a job definition for `service` is installed.
    pub fn has_service(&self, service: &str) -> bool {
        self.init_dir.join(format!("{service}.conf")).exists()
    }

    /// Whether `service` is running, once it has settled out of any start transition.
    pub fn is_running(&self, service: &str) -> Result<bool> {
        let settle = self
            .settle
            .clone()
            .with_desc(format!("{service} to finish starting"));
        poll_for_condition(|| Ok(!TRANSITION_RE.is_match(&self.status(service)?)), &settle)?;
        Ok(self.status(service)?.contains("start/running"))
    }

    /// Pid of the job's main process, `None` if it has none.
    pub fn get_pid(&self, service: &str) -> Result<Option<u32>> {
        let out = self.status(service)?;
        Ok(PID_RE.captures(&out).and_then(|c| c[1].parse().ok()))
    }

    /// Restart `service` if it is running, start it otherwise.
    pub fn restart_job(&self, service: &str, timeout: Option<Duration>) -> Result<()> {
        let verb = if self.is_running(service)? {
            tracing::debug!("{} is already running: restart instead.", service);
            "restart"
        } else {
            "start"
        };
        let mut spec = CmdSpec::new(verb).arg(service);
        spec.timeout = timeout;
        self.runner.output(&spec).map(|_| ())
    }

    pub fn stop_job(&self, service: &str, timeout: Option<Duration>) -> Result<()> {
        let mut spec = CmdSpec::new("stop").arg(service);
        spec.timeout = timeout;
        self.runner.system(&spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autotest_common::{CmdResult, ScriptedRunner};

    fn quick(upstart: Upstart<'_>) -> Upstart<'_> {
        upstart.with_settle(
            PollOptions::new()
                .with_timeout(Duration::from_millis(50))
                .with_sleep_interval(Duration::from_millis(1)),
        )
    }

    #[test]
    fn test_is_running_waits_out_pre_start() {
        let runner = ScriptedRunner::new()
            .expect(["status", "ui"], CmdResult::ok("ui start/pre-start, process 10"))
            .expect(["status", "ui"], CmdResult::ok("ui start/running, process 10"))
            .expect(["status", "ui"], CmdResult::ok("ui start/running, process 10"));
        assert!(quick(Upstart::new(&runner)).is_running("ui").unwrap());
        assert!(runner.is_exhausted());
    }

    #[test]
    fn test_is_running_false_when_stopped() {
        let runner = ScriptedRunner::new()
            .expect(["status"], CmdResult::ok("powerd stop/waiting"))
            .expect(["status"], CmdResult::ok("powerd stop/waiting"));
        assert!(!quick(Upstart::new(&runner)).is_running("powerd").unwrap());
    }

    #[test]
    fn test_is_running_times_out_in_post_start() {
        let runner = ScriptedRunner::new();
        let runner = (0..200).fold(runner, |r, _| r.expect(["status"], CmdResult::ok("x start/post-start")));
        let err = quick(Upstart::new(&runner)).is_running("x").unwrap_err();
        assert_eq!(err.to_string(), "Timed out waiting for condition: x to finish starting");
    }

    #[test]
    fn test_get_pid() {
        let runner = ScriptedRunner::new()
            .expect(["status"], CmdResult::ok("shill start/running, process 1234"))
            .expect(["status"], CmdResult::ok("shill stop/waiting"));
        let upstart = Upstart::new(&runner);
        assert_eq!(upstart.get_pid("shill").unwrap(), Some(1234));
        assert_eq!(upstart.get_pid("shill").unwrap(), None);
    }

    #[test]
    fn test_restart_job_restarts_running_service() {
        let runner = ScriptedRunner::new()
            .expect(["status"], CmdResult::ok("ui start/running, process 1"))
            .expect(["status"], CmdResult::ok("ui start/running, process 1"))
            .expect(["restart", "ui"], CmdResult::ok(""));
        quick(Upstart::new(&runner)).restart_job("ui", None).unwrap();
        assert!(runner.is_exhausted());
    }

    #[test]
    fn test_restart_job_starts_stopped_service() {
        let runner = ScriptedRunner::new()
            .expect(["status"], CmdResult::ok("ui stop/waiting"))
            .expect(["status"], CmdResult::ok("ui stop/waiting"))
            .expect(["start", "ui"], CmdResult::ok(""));
        let timeout = Some(Duration::from_secs(30));
        quick(Upstart::new(&runner)).restart_job("ui", timeout).unwrap();
        assert_eq!(runner.seen()[2].timeout, timeout);
    }

    #[test]
    fn test_ensure_running() {
        let runner = ScriptedRunner::new()
            .expect(["initctl", "status", "ui"], CmdResult::ok("ui start/running, process 7"))
            .expect(["initctl", "status", "ui"], CmdResult::ok("ui stop/waiting"));
        let upstart = Upstart::new(&runner);
        upstart.ensure_running("ui").unwrap();
        let err = upstart.ensure_running("ui").unwrap_err();
        assert!(matches!(err, AutotestError::TestFail(_)));
    }

    #[test]
    fn test_stop_job_failure_propagates() {
        let runner = ScriptedRunner::new().expect(["stop", "ui"], CmdResult::failed(1, "stop: Unknown instance:"));
        let err = Upstart::new(&runner).stop_job("ui", None).unwrap_err();
        assert!(matches!(err, AutotestError::Cmd { .. }));
    }

    #[test]
    fn test_emit_event() {
        let runner = ScriptedRunner::new().expect(["initctl", "emit", "login-prompt-visible"], CmdResult::ok(""));
        Upstart::new(&runner).emit_event("login-prompt-visible").unwrap();
    }

    #[test]
    fn test_has_service() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("powerd.conf"), "start on started system-services\n").unwrap();
        let runner = ScriptedRunner::new();
        let upstart = Upstart::new(&runner).with_init_dir(dir.path());
        assert!(upstart.has_service("powerd"));
        assert!(!upstart.has_service("shill"));
    }
}
