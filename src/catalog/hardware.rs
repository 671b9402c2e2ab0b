//! Hardware identity tests.

use autotest_common::{AutotestError, CommandRunner, LocalRunner, Result};
use autotest_cros::vpd::{Vpd, VpdSection};

use crate::harness::{Test, TestContext};

/// A VPD key must be present and non-empty. Params: `<RO|RW> <key>`.
pub struct VpdFieldTest<R = LocalRunner> {
    runner: R,
}

impl<R: CommandRunner> VpdFieldTest<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner> Test for VpdFieldTest<R> {
    fn execute(&mut self, ctx: &mut TestContext) -> Result<()> {
        let section: VpdSection = ctx.param(0, "VPD section (RO or RW)")?.parse()?;
        let key = ctx.param(1, "VPD key")?;

        let value = Vpd::new(&self.runner)
            .get(section, key)?
            .ok_or_else(|| AutotestError::test_fail(format!("VPD key {key} not found in {section}")))?;
        if value.trim().is_empty() {
            return Err(AutotestError::test_fail(format!("VPD key {key} in {section} is empty")));
        }
        ctx.write_keyval([(format!("vpd_{key}"), value)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing;
    use autotest_common::{CmdResult, ScriptedRunner};

    #[test]
    fn test_present_key_is_recorded() {
        let runner = ScriptedRunner::new().expect(["vpd", "-i", "RO_VPD", "-g", "region"], CmdResult::ok("us"));
        let (_tmp, mut ctx) = testing::context(&["RO", "region"]);
        VpdFieldTest::new(&runner).execute(&mut ctx).unwrap();
        assert_eq!(testing::keyval(&ctx), "vpd_region=us\n");
    }

    #[test]
    fn test_missing_and_empty_keys_fail() {
        let runner = ScriptedRunner::new()
            .expect(["vpd"], CmdResult::failed(3, "key not found"))
            .expect(["vpd"], CmdResult::ok(""));
        let (_tmp, mut ctx) = testing::context(&["RW", "serial_number"]);
        let mut test = VpdFieldTest::new(&runner);
        assert_eq!(
            test.execute(&mut ctx).unwrap_err(),
            AutotestError::test_fail("VPD key serial_number not found in RW_VPD")
        );
        assert_eq!(
            test.execute(&mut ctx).unwrap_err(),
            AutotestError::test_fail("VPD key serial_number in RW_VPD is empty")
        );
    }

    #[test]
    fn test_bad_section() {
        let runner = ScriptedRunner::new();
        let (_tmp, mut ctx) = testing::context(&["XX", "region"]);
        assert_eq!(VpdFieldTest::new(&runner).execute(&mut ctx).unwrap_err().kind(), "TestError");
    }
}
