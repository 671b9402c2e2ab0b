//! Power tests.

use autotest_common::{CommandRunner, LocalRunner, Result};
use autotest_cros::power::{ForceDischarge, ForceDischarger, PowerStatus, SysfsPowerStatus};
use autotest_cros::service_stopper::{POWER_DRAW_SERVICES, ServiceStopper};

use crate::harness::{Test, TestContext};

/// Force the battery to discharge through the EC, then put charging back. Params: `<false|true|optional>`.
///
/// Services that skew power draw are stopped for the duration and restarted afterwards.
pub struct ForceDischargeTest<R = LocalRunner> {
    runner: R,
    ec_present: Option<bool>,
    status: Option<Box<dyn PowerStatus>>,
}

impl<R: CommandRunner> ForceDischargeTest<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            ec_present: None,
            status: None,
        }
    }

    /// Override EC detection.
    pub fn with_ec_present(mut self, ec_present: bool) -> Self {
        self.ec_present = Some(ec_present);
        self
    }

    /// Use `status` instead of reading `/sys/class/power_supply`.
    pub fn with_power_status(mut self, status: impl PowerStatus + 'static) -> Self {
        self.status = Some(Box::new(status));
        self
    }
}

impl<R: CommandRunner> Test for ForceDischargeTest<R> {
    fn setup(&mut self, _ctx: &mut TestContext) -> Result<()> {
        if self.status.is_none() {
            self.status = Some(Box::new(SysfsPowerStatus::new()?));
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &mut TestContext) -> Result<()> {
        let setting: ForceDischarge = ctx.param(0, "force discharge setting")?.parse()?;
        let mut status: Box<dyn PowerStatus> = match self.status.take() {
            Some(status) => status,
            None => Box::new(SysfsPowerStatus::new()?),
        };

        let mut discharger = ForceDischarger::new(&self.runner);
        if let Some(ec_present) = self.ec_present {
            discharger = discharger.with_ec_present(ec_present);
        }

        let mut stopper = ServiceStopper::new(&self.runner, POWER_DRAW_SERVICES);
        stopper.stop_services();
        let forced = discharger.process(setting, status.as_mut());
        let restored = match &forced {
            Ok(success) => discharger.restore(*success),
            Err(_) => Ok(()),
        };
        stopper.restore_services();

        let forced = forced?;
        restored?;
        ctx.write_keyval([("force_discharge", setting.to_string()), ("force_discharge_success", forced.to_string())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing;
    use autotest_common::{AutotestError, CmdResult, ScriptedRunner};

    struct Battery {
        present: bool,
    }

    impl PowerStatus for Battery {
        fn refresh(&mut self) -> Result<()> {
            Ok(())
        }

        fn has_battery(&self) -> bool {
            self.present
        }

        fn battery_discharging(&self) -> bool {
            self.present
        }
    }

    fn services_not_running(runner: ScriptedRunner) -> ScriptedRunner {
        POWER_DRAW_SERVICES.iter().fold(runner, |r, svc| {
            r.expect(["status", *svc], CmdResult::ok(format!("{svc} stop/waiting")))
        })
    }

    #[test]
    fn test_forced_discharge_is_restored() {
        let runner = services_not_running(ScriptedRunner::new())
            .expect(["ectool", "chargeoverride", "dontcharge"], CmdResult::ok(""))
            .expect(["ectool", "chargeoverride", "off"], CmdResult::ok(""));
        let (_tmp, mut ctx) = testing::context(&["true"]);
        let mut test = ForceDischargeTest::new(&runner)
            .with_ec_present(true)
            .with_power_status(Battery { present: true });
        test.setup(&mut ctx).unwrap();
        test.execute(&mut ctx).unwrap();
        assert!(runner.is_exhausted());
        assert_eq!(testing::keyval(&ctx), "force_discharge=true\nforce_discharge_success=true\n");
    }

    #[test]
    fn test_required_without_battery_restarts_services() {
        let runner = ScriptedRunner::new()
            .expect(["status", "powerd"], CmdResult::ok("powerd start/running, process 7"))
            .expect(["stop", "powerd"], CmdResult::ok(""))
            .expect(["status", "update-engine"], CmdResult::ok("update-engine stop/waiting"))
            .expect(["status", "bluetoothd"], CmdResult::ok("bluetoothd stop/waiting"))
            .expect(["start", "powerd"], CmdResult::ok(""));
        let (_tmp, mut ctx) = testing::context(&["TRUE"]);
        let err = ForceDischargeTest::new(&runner)
            .with_ec_present(true)
            .with_power_status(Battery { present: false })
            .execute(&mut ctx)
            .unwrap_err();
        assert_eq!(err, AutotestError::test_na("DUT does not have battery. Could not force discharge."));
        assert!(runner.is_exhausted());
    }

    #[test]
    fn test_false_setting_touches_nothing_but_services() {
        let runner = services_not_running(ScriptedRunner::new());
        let (_tmp, mut ctx) = testing::context(&["false"]);
        ForceDischargeTest::new(&runner)
            .with_power_status(Battery { present: true })
            .execute(&mut ctx)
            .unwrap();
        assert!(testing::keyval(&ctx).contains("force_discharge_success=false"));
    }
}
