#![forbid(unsafe_code)]
//! autotest: run hardware tests on a ChromeOS device.
//!
//! Each test runs in its own process, in its own results directory, and leaves a `status` file behind whatever
//! happened to it. This crate provides the test harness, the catalog of built-in tests, jobs (many tests into one
//! results directory), the CLI, and the scheduler's database connection and logging setup.
//!
//! Device utilities live in `autotest_cros`; errors, command execution and configuration in `autotest_common`.
//!
//! ## Panic Policy
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. The `cli` module enforces
//!   `#![deny(clippy::unwrap_used)]`.
//!
//! - **Test bodies**: a panic inside a test's `setup()` or `execute()` is caught by the harness and reported as an
//!   unhandled failure; it never takes the job down.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.
//!
//! - **True invariants**: If a panic represents a harness bug (logic error), use `.expect("INVARIANT: reason")` with
//!   a clear explanation.

pub mod catalog;
pub mod cli;
pub mod harness;
pub mod job;
pub mod scheduler;

pub use autotest_common::{AutotestError, GlobalConfig, Result};
pub use catalog::Catalog;
pub use harness::{Test, TestContext, TestRunner};
pub use job::{ControlFile, Job, TestSpec};
