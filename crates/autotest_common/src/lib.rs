#![forbid(unsafe_code)]
//! Shared building blocks for autotest: the error type every test fails with, command execution, polling, and
//! configuration.
//!
//! ## Notes
//!
//! - Nothing here knows about the test harness or about specific device utilities. Those live in the `autotest` and
//!   `autotest_cros` crates.
//! - Device access always goes through [`cmd::CommandRunner`]; nothing in this crate shells out on its own except
//!   [`cmd::LocalRunner`].

pub mod cmd;
pub mod config;
pub mod config_vars;
pub mod error;
pub mod poll;

pub use cmd::{CmdResult, CmdSpec, CommandRunner, LocalRunner, ScriptedRunner};
pub use config::GlobalConfig;
pub use error::{AutotestError, Result};
pub use poll::{PollOptions, poll_for_condition};
