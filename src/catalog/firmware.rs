//! Firmware update tests.

use autotest_common::{AutotestError, CommandRunner, LocalRunner, Result};
use autotest_cros::fwupd;

use crate::harness::{Test, TestContext};

/// fwupd must be running and the given device must be updatable. Params: `<device-id>` (DeviceId or GUID).
pub struct FwupdDeviceTest<R = LocalRunner> {
    runner: R,
    fwupd_version: Option<String>,
}

impl<R: CommandRunner> FwupdDeviceTest<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            fwupd_version: None,
        }
    }
}

impl<R: CommandRunner> Test for FwupdDeviceTest<R> {
    fn setup(&mut self, _ctx: &mut TestContext) -> Result<()> {
        let version = fwupd::get_fwupdmgr_version(&self.runner)
            .ok_or_else(|| AutotestError::test_error("fwupd not running"))?;
        tracing::info!("fwupd version: {}", version);
        self.fwupd_version = Some(version);
        Ok(())
    }

    fn execute(&mut self, ctx: &mut TestContext) -> Result<()> {
        let dev_id = ctx.param(0, "device id")?;
        let devices = fwupd::get_devices(&self.runner)?;
        let device = fwupd::check_device(dev_id, &devices)?;
        ctx.write_keyval([
            ("fwupd_version", self.fwupd_version.as_deref().unwrap_or_default()),
            ("device_name", device.display_name()),
            ("device_version", device.version.as_deref().unwrap_or_default()),
        ])
    }
}
