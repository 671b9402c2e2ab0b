//! Vital product data via the `vpd` utility.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use autotest_common::{AutotestError, CmdSpec, CommandRunner, Result};

static ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^"([^"]*)"="(.*)"$"#).expect("INVARIANT: static regex is valid"));

/// VPD partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VpdSection {
    ReadOnly,
    ReadWrite,
}

impl VpdSection {
    pub fn partition(self) -> &'static str {
        match self {
            VpdSection::ReadOnly => "RO_VPD",
            VpdSection::ReadWrite => "RW_VPD",
        }
    }
}

impl fmt::Display for VpdSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.partition())
    }
}

impl FromStr for VpdSection {
    type Err = AutotestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "RO" | "RO_VPD" => Ok(VpdSection::ReadOnly),
            "RW" | "RW_VPD" => Ok(VpdSection::ReadWrite),
            _ => Err(AutotestError::test_error(format!(
                "unknown VPD section '{s}', expected RO or RW"
            ))),
        }
    }
}

pub struct Vpd<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> Vpd<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    fn vpd(&self, section: VpdSection) -> CmdSpec {
        CmdSpec::new("vpd").args(["-i", section.partition()])
    }

    /// Value of `key`, `None` when the key is not set.
    pub fn get(&self, section: VpdSection, key: &str) -> Result<Option<String>> {
        let result = self.runner.run(&self.vpd(section).args(["-g", key]).ignore_status())?;
        if result.success() {
            Ok(Some(result.stdout.trim_end_matches('\n').to_string()))
        } else {
            Ok(None)
        }
    }

    pub fn set(&self, section: VpdSection, key: &str, value: &str) -> Result<()> {
        self.runner
            .system(&self.vpd(section).args(["-s".to_string(), format!("{key}={value}")]))
    }

    pub fn delete(&self, section: VpdSection, key: &str) -> Result<()> {
        self.runner.system(&self.vpd(section).args(["-d", key]))
    }

    /// Every key/value pair in `section`.
    pub fn list(&self, section: VpdSection) -> Result<BTreeMap<String, String>> {
        let out = self.runner.output(&self.vpd(section).arg("-l"))?;
        Ok(parse_vpd_list(&out))
    }
}

/// Parse `vpd -l` output: one `"key"="value"` pair per line. Other lines are ignored.
pub fn parse_vpd_list(out: &str) -> BTreeMap<String, String> {
    out.lines()
        .filter_map(|line| ENTRY_RE.captures(line.trim()))
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}
