//! The catalog of tests the harness can run, by name.
//!
//! Tests are created fresh for every run through a plain factory function. The built-in tests drive the device
//! through a [`autotest_common::CommandRunner`] (a [`autotest_common::LocalRunner`] when created from the catalog),
//! so each can also be exercised against a scripted runner.

pub mod dummy;
pub mod firmware;
pub mod hardware;
pub mod platform;
pub mod power;

use std::collections::BTreeMap;
use std::fmt;

use autotest_common::{AutotestError, LocalRunner, Result};

use crate::harness::Test;

pub type TestFactory = fn() -> Box<dyn Test>;

#[derive(Clone, Default)]
pub struct Catalog {
    tests: BTreeMap<String, TestFactory>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every test that ships with autotest.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog
            .register("dummy_Pass", || Box::new(dummy::DummyPass))
            .register("dummy_Fail", || Box::new(dummy::DummyFail))
            .register("dummy_Panic", || Box::new(dummy::DummyPanic))
            .register("dummy_Sleep", || Box::new(dummy::DummySleep))
            .register("platform_TpmStatus", || Box::new(platform::TpmStatusTest::new(LocalRunner)))
            .register("platform_UpstartJob", || Box::new(platform::UpstartJobTest::new(LocalRunner)))
            .register("platform_DlcInstall", || Box::new(platform::DlcInstallTest::new(LocalRunner)))
            .register("firmware_FwupdDevice", || Box::new(firmware::FwupdDeviceTest::new(LocalRunner)))
            .register("hardware_VpdField", || Box::new(hardware::VpdFieldTest::new(LocalRunner)))
            .register("power_ForceDischarge", || Box::new(power::ForceDischargeTest::new(LocalRunner)));
        catalog
    }

    /// Add a test, replacing any test of the same name.
    pub fn register(&mut self, name: impl Into<String>, factory: TestFactory) -> &mut Self {
        self.tests.insert(name.into(), factory);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tests.contains_key(name)
    }

    /// A fresh instance of test `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn Test>> {
        self.tests
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| AutotestError::test_error(format!("test {name} not found in catalog")))
    }

    /// Registered test names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.tests.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog").field("tests", &self.names()).finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_are_sorted() {
        insta::assert_debug_snapshot!(Catalog::builtin().names(), @r#"
        [
            "dummy_Fail",
            "dummy_Panic",
            "dummy_Pass",
            "dummy_Sleep",
            "firmware_FwupdDevice",
            "hardware_VpdField",
            "platform_DlcInstall",
            "platform_TpmStatus",
            "platform_UpstartJob",
            "power_ForceDischarge",
        ]
        "#);
    }

    #[test]
    fn test_unknown_test() {
        let err = Catalog::builtin().create("nosuch_Test").err().unwrap();
        assert_eq!(err, AutotestError::test_error("test nosuch_Test not found in catalog"));
    }

    #[test]
    fn test_register_replaces() {
        let mut catalog = Catalog::new();
        catalog.register("x", || Box::new(dummy::DummyFail));
        catalog.register("x", || Box::new(dummy::DummyPass));
        assert_eq!(catalog.names(), ["x"]);

        let (_tmp, mut ctx) = testing::context(&[]);
        let mut test = catalog.create("x").unwrap();
        test.execute(&mut ctx).unwrap();
    }
}
