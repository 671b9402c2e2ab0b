//! The `status` file a test leaves behind.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use autotest_common::{AutotestError, Result};

pub const STATUS_FILE: &str = "status";
pub const GOOD_MESSAGE: &str = "Completed Successfully";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Good,
    Fail,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatusCode::Good => "GOOD",
            StatusCode::Fail => "FAIL",
        })
    }
}

impl FromStr for StatusCode {
    type Err = AutotestError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GOOD" => Ok(StatusCode::Good),
            "FAIL" => Ok(StatusCode::Fail),
            other => Err(AutotestError::parse("status code", format!("unknown status '{other}'"))),
        }
    }
}

/// Final outcome of a test: a code and a one-line (usually) message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub code: StatusCode,
    pub message: String,
}

impl StatusRecord {
    pub fn good() -> Self {
        Self {
            code: StatusCode::Good,
            message: GOOD_MESSAGE.to_string(),
        }
    }

    pub fn fail(error: &AutotestError) -> Self {
        Self {
            code: StatusCode::Fail,
            message: error.to_string(),
        }
    }

    pub fn from_result(result: &Result<()>) -> Self {
        match result {
            Ok(()) => Self::good(),
            Err(e) => Self::fail(e),
        }
    }

    pub fn is_good(&self) -> bool {
        self.code == StatusCode::Good
    }

    pub fn path(testdir: &Path) -> PathBuf {
        testdir.join(STATUS_FILE)
    }

    pub fn write(&self, testdir: &Path) -> Result<()> {
        fs::write(Self::path(testdir), format!("{self}\n"))?;
        Ok(())
    }

    pub fn read(testdir: &Path) -> Result<Self> {
        let content = fs::read_to_string(Self::path(testdir))?;
        content.parse()
    }
}

impl fmt::Display for StatusRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

impl FromStr for StatusRecord {
    type Err = AutotestError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim_end();
        let (code, message) = s.split_once(' ').unwrap_or((s, ""));
        Ok(Self {
            code: code.parse()?,
            message: message.trim().to_string(),
        })
    }
}
