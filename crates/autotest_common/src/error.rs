//! Error types shared by the harness, the device wrappers and the tests themselves.
//!
//! `AutotestError` is the one error type a test may fail with. It is serializable because a failure raised inside an
//! isolated test process has to be written to disk by the child and re-raised by the parent.
//!
//! ## Classes
//!
//! | Variant      | Meaning                                                     |
//! |--------------|-------------------------------------------------------------|
//! | `TestError`  | the test (or harness) could not do its job                  |
//! | `TestFail`   | the device behaved incorrectly                              |
//! | `TestNA`     | the test does not apply to this device                      |
//! | `Unhandled`  | anything that was not raised as an autotest error (panics)  |
//! | `Cmd`        | a command exited non-zero                                   |
//! | `Timeout`    | a command or a polled condition ran out of time             |

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout autotest.
pub type Result<T> = std::result::Result<T, AutotestError>;

#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum AutotestError {
    #[error("{0}")]
    #[diagnostic(code(autotest::test_error))]
    TestError(String),

    #[error("{0}")]
    #[diagnostic(code(autotest::test_fail))]
    TestFail(String),

    #[error("{0}")]
    #[diagnostic(code(autotest::test_na), help("the test does not apply to this device"))]
    TestNA(String),

    #[error("Unhandled {0}")]
    #[diagnostic(code(autotest::unhandled))]
    Unhandled(String),

    #[error("Command <{command}> failed, rc={}{}", fmt_rc(.exit_status), fmt_stderr(.stderr))]
    #[diagnostic(code(autotest::cmd))]
    Cmd {
        command: String,
        exit_status: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("{0}")]
    #[diagnostic(code(autotest::timeout))]
    Timeout(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(autotest::io))]
    Io(String),

    #[error("could not parse {what}: {detail}")]
    #[diagnostic(code(autotest::parse))]
    Parse { what: String, detail: String },

    #[error("configuration error: {0}")]
    #[diagnostic(code(autotest::config))]
    Config(String),
}

impl AutotestError {
    pub fn test_error(message: impl Into<String>) -> Self {
        Self::TestError(message.into())
    }

    pub fn test_fail(message: impl Into<String>) -> Self {
        Self::TestFail(message.into())
    }

    pub fn test_na(message: impl Into<String>) -> Self {
        Self::TestNA(message.into())
    }

    pub fn parse(what: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            detail: detail.into(),
        }
    }

    /// Short class name, as recorded in job status logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TestError(_) => "TestError",
            Self::TestFail(_) => "TestFail",
            Self::TestNA(_) => "TestNA",
            Self::Unhandled(_) => "UnhandledError",
            Self::Cmd { .. } => "CmdError",
            Self::Timeout(_) => "TimeoutError",
            Self::Io(_) => "IOError",
            Self::Parse { .. } => "ParseError",
            Self::Config(_) => "ConfigError",
        }
    }

    /// Whether this error was raised deliberately by autotest code.
    ///
    /// Only `Unhandled` wraps a foreign failure.
    pub fn is_autotest_error(&self) -> bool {
        !matches!(self, Self::Unhandled(_))
    }
}

impl From<std::io::Error> for AutotestError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

fn fmt_rc(rc: &Option<i32>) -> String {
    match rc {
        Some(code) => code.to_string(),
        None => "killed".to_string(),
    }
}

fn fmt_stderr(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!("\n* stderr: {stderr}")
    }
}
