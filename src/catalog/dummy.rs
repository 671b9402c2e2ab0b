//! Tests that exercise the harness itself.

use std::thread;
use std::time::Duration;

use autotest_common::{AutotestError, Result};

use crate::harness::{Test, TestContext};

/// Always passes.
pub struct DummyPass;

impl Test for DummyPass {
    fn execute(&mut self, ctx: &mut TestContext) -> Result<()> {
        tracing::info!("dummy_Pass params: {:?}", ctx.params);
        ctx.write_keyval([("dummy_pass", ctx.params.len())])
    }
}

/// Always fails with `TestFail`, using the first parameter as the message when given.
pub struct DummyFail;

impl Test for DummyFail {
    fn execute(&mut self, ctx: &mut TestContext) -> Result<()> {
        let message = ctx.params.first().map_or("This test always fails.", String::as_str);
        Err(AutotestError::test_fail(message))
    }
}

/// Always panics, so the unhandled-failure path can be checked end to end.
pub struct DummyPanic;

impl Test for DummyPanic {
    fn execute(&mut self, ctx: &mut TestContext) -> Result<()> {
        let message = ctx.params.first().map_or("This test always panics.", String::as_str);
        panic!("{message}");
    }
}

/// Sleeps for the number of seconds in the first parameter (default 1), then passes.
pub struct DummySleep;

impl Test for DummySleep {
    fn execute(&mut self, ctx: &mut TestContext) -> Result<()> {
        let secs: f64 = match ctx.params.first() {
            Some(secs) => secs
                .parse()
                .map_err(|_| AutotestError::test_error(format!("invalid sleep duration '{secs}'")))?,
            None => 1.0,
        };
        let duration = Duration::try_from_secs_f64(secs)
            .map_err(|_| AutotestError::test_error(format!("invalid sleep duration '{secs}'")))?;
        thread::sleep(duration);
        ctx.write_keyval([("dummy_slept_secs", secs)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing;
    use crate::harness::run_body;

    #[test]
    fn test_pass_records_param_count() {
        let (_tmp, mut ctx) = testing::context(&["a", "b"]);
        DummyPass.execute(&mut ctx).unwrap();
        assert_eq!(testing::keyval(&ctx), "dummy_pass=2\n");
    }

    #[test]
    fn test_fail_default_message() {
        let (_tmp, mut ctx) = testing::context(&[]);
        assert_eq!(
            DummyFail.execute(&mut ctx),
            Err(AutotestError::test_fail("This test always fails."))
        );
    }

    #[test]
    fn test_panic_is_unhandled() {
        let (_tmp, mut ctx) = testing::context(&["boom"]);
        let err = run_body("dummy_Panic", &mut DummyPanic, &mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "Unhandled running test dummy_Panic: boom");
    }

    #[test]
    fn test_sleep_rejects_bad_duration() {
        let (_tmp, mut ctx) = testing::context(&["-1"]);
        assert_eq!(DummySleep.execute(&mut ctx).unwrap_err().kind(), "TestError");
        let (_tmp, mut ctx) = testing::context(&["soon"]);
        assert_eq!(DummySleep.execute(&mut ctx).unwrap_err().kind(), "TestError");
    }

    #[test]
    fn test_sleep_records_duration() {
        let (_tmp, mut ctx) = testing::context(&["0"]);
        DummySleep.execute(&mut ctx).unwrap();
        assert_eq!(testing::keyval(&ctx), "dummy_slept_secs=0\n");
    }
}
