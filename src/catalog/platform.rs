//! Platform tests: TPM, upstart jobs, DLCs.

use std::path::PathBuf;

use autotest_common::{AutotestError, CommandRunner, LocalRunner, Result};
use autotest_cros::dlc::DlcUtil;
use autotest_cros::tpm;
use autotest_cros::upstart::{DEFAULT_INIT_DIR, Upstart};

use crate::harness::{Test, TestContext};

/// The TPM must be enabled and owned. Records the dictionary attack state.
pub struct TpmStatusTest<R = LocalRunner> {
    runner: R,
}

impl<R: CommandRunner> TpmStatusTest<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner> Test for TpmStatusTest<R> {
    fn execute(&mut self, ctx: &mut TestContext) -> Result<()> {
        let status = tpm::get_tpm_status(&self.runner)?;
        if !status.enabled {
            return Err(AutotestError::test_fail("TPM is not enabled"));
        }
        if !status.owned {
            return Err(AutotestError::test_fail("TPM is not owned"));
        }

        let da = tpm::get_tpm_da_info(&self.runner)?;
        if da.lockout_in_effect() == Some(true) {
            tracing::warn!(
                "dictionary attack lockout in effect, {}s remaining",
                da.lockout_seconds_remaining().unwrap_or_default()
            );
        }
        ctx.write_keyval(da.0.iter().map(|(key, value)| (format!("tpm_{key}"), value)))
    }
}

/// An upstart job must be installed and running. Params: `<service>`.
pub struct UpstartJobTest<R = LocalRunner> {
    runner: R,
    init_dir: PathBuf,
}

impl<R: CommandRunner> UpstartJobTest<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            init_dir: PathBuf::from(DEFAULT_INIT_DIR),
        }
    }

    pub fn with_init_dir(mut self, init_dir: impl Into<PathBuf>) -> Self {
        self.init_dir = init_dir.into();
        self
    }

    fn upstart(&self) -> Upstart<'_> {
        Upstart::new(&self.runner).with_init_dir(&self.init_dir)
    }
}

impl<R: CommandRunner> Test for UpstartJobTest<R> {
    fn setup(&mut self, ctx: &mut TestContext) -> Result<()> {
        let service = ctx.param(0, "service")?;
        if !self.upstart().has_service(service) {
            return Err(AutotestError::test_na(format!("{service} is not installed")));
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &mut TestContext) -> Result<()> {
        let service = ctx.param(0, "service")?;
        let upstart = self.upstart();
        upstart.ensure_running(service)?;
        let pid = upstart
            .get_pid(service)?
            .ok_or_else(|| AutotestError::test_fail(format!("{service} has no main process")))?;
        ctx.write_keyval([("upstart_pid", pid)])
    }
}

/// A DLC installs from the given update server and shows up as installed. Params: `<dlc-id> <omaha-url>`.
pub struct DlcInstallTest<R = LocalRunner> {
    runner: R,
}

impl<R: CommandRunner> DlcInstallTest<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner> Test for DlcInstallTest<R> {
    fn execute(&mut self, ctx: &mut TestContext) -> Result<()> {
        let dlc_id = ctx.param(0, "DLC id")?;
        let omaha_url = ctx.param(1, "omaha url")?;
        let dlc = DlcUtil::new(&self.runner);

        dlc.purge(dlc_id, true)?;
        dlc.install(dlc_id, omaha_url)?;
        let installed = dlc.list()?;
        let info = installed
            .get(dlc_id)
            .and_then(|infos| infos.first())
            .ok_or_else(|| AutotestError::test_fail(format!("DLC {dlc_id} is not installed after install")))?;
        ctx.write_keyval([("dlc_version", info.version.as_str()), ("dlc_root_mount", info.root_mount.as_str())])?;

        dlc.purge(dlc_id, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing;
    use autotest_common::{CmdResult, ScriptedRunner};
    use std::fs;

    const TPM: &str = "/usr/bin/tpm_manager_client";

    #[test]
    fn test_tpm_ready_records_da_info() {
        let runner = ScriptedRunner::new()
            .expect([TPM, "status"], CmdResult::ok("{\n  is_enabled: true\n  is_owned: true\n}\n"))
            .expect(
                [TPM, "get_da_info"],
                CmdResult::ok(
                    "Message Reply: [tpm_manager.GetDictionaryAttackInfoReply] {\n  \
                     dictionary_attack_counter: 0\n  \
                     dictionary_attack_lockout_in_effect: false\n}\n",
                ),
            );
        let (_tmp, mut ctx) = testing::context(&[]);
        TpmStatusTest::new(&runner).execute(&mut ctx).unwrap();
        insta::assert_snapshot!(testing::keyval(&ctx), @r"
        tpm_dictionary_attack_counter=0
        tpm_dictionary_attack_lockout_in_effect=false
        ");
    }

    #[test]
    fn test_tpm_not_owned_fails() {
        let runner =
            ScriptedRunner::new().expect([TPM, "status"], CmdResult::ok("is_enabled: true\nis_owned: false\n"));
        let (_tmp, mut ctx) = testing::context(&[]);
        let err = TpmStatusTest::new(&runner).execute(&mut ctx).unwrap_err();
        assert_eq!(err, AutotestError::test_fail("TPM is not owned"));
    }

    #[test]
    fn test_upstart_job_missing_is_not_applicable() {
        let init = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let (_tmp, mut ctx) = testing::context(&["shill"]);
        let err = UpstartJobTest::new(&runner)
            .with_init_dir(init.path())
            .setup(&mut ctx)
            .unwrap_err();
        assert_eq!(err, AutotestError::test_na("shill is not installed"));
    }

    #[test]
    fn test_upstart_job_running_records_pid() {
        let init = tempfile::tempdir().unwrap();
        fs::write(init.path().join("ui.conf"), "start on started boot-services\n").unwrap();
        let runner = ScriptedRunner::new()
            .expect(["initctl", "status", "ui"], CmdResult::ok("ui start/running, process 1234\n"))
            .expect(["status", "ui"], CmdResult::ok("ui start/running, process 1234\n"));
        let (_tmp, mut ctx) = testing::context(&["ui"]);
        let mut test = UpstartJobTest::new(&runner).with_init_dir(init.path());
        test.setup(&mut ctx).unwrap();
        test.execute(&mut ctx).unwrap();
        assert_eq!(testing::keyval(&ctx), "upstart_pid=1234\n");
    }

    #[test]
    fn test_upstart_job_stopped_fails() {
        let runner = ScriptedRunner::new().expect(["initctl", "status"], CmdResult::ok("ui stop/waiting\n"));
        let (_tmp, mut ctx) = testing::context(&["ui"]);
        let err = UpstartJobTest::new(&runner).execute(&mut ctx).unwrap_err();
        assert_eq!(err.kind(), "TestFail");
    }

    #[test]
    fn test_dlc_install_round() {
        let list = r#"{"sample-dlc": [{"id": "sample-dlc", "version": "1.0.0", "root_mount": "/run/imageloader/x"}]}"#;
        let runner = ScriptedRunner::new()
            .expect(["dlcservice_util", "--purge"], CmdResult::failed(1, "not installed"))
            .expect(["dlcservice_util", "--install"], CmdResult::ok(""))
            .expect(["dlcservice_util", "--list"], CmdResult::ok(list))
            .expect(["dlcservice_util", "--purge"], CmdResult::ok(""));
        let (_tmp, mut ctx) = testing::context(&["sample-dlc", "http://127.0.0.1:8080/update"]);
        DlcInstallTest::new(&runner).execute(&mut ctx).unwrap();
        assert!(runner.is_exhausted());
        assert_eq!(testing::keyval(&ctx), "dlc_version=1.0.0\ndlc_root_mount=/run/imageloader/x\n");
    }

    #[test]
    fn test_dlc_missing_after_install() {
        let runner = ScriptedRunner::new()
            .expect(["dlcservice_util", "--purge"], CmdResult::ok(""))
            .expect(["dlcservice_util", "--install"], CmdResult::ok(""))
            .expect(["dlcservice_util", "--list"], CmdResult::ok("{}"));
        let (_tmp, mut ctx) = testing::context(&["sample-dlc", "http://omaha"]);
        let err = DlcInstallTest::new(&runner).execute(&mut ctx).unwrap_err();
        assert_eq!(err, AutotestError::test_fail("DLC sample-dlc is not installed after install"));
    }
}
