#![forbid(unsafe_code)]
//! Thin wrappers around ChromeOS system utilities.
//!
//! Each module drives one tool (`tpm_manager_client`, `initctl`, `dlcservice_util`, `fwupdmgr`, `vpd`, `ectool`,
//! `crossystem`) through a borrowed [`autotest_common::CommandRunner`] and turns its output into typed values.
//! Failures surface as [`autotest_common::AutotestError`], usually `TestError` or `TestFail`, so tests can bubble them
//! up unchanged.

pub mod crossystem;
pub mod dlc;
pub mod fwupd;
pub mod power;
pub mod service_stopper;
pub mod tpm;
pub mod upstart;
pub mod vpd;

pub use crossystem::Crossystem;
pub use dlc::DlcUtil;
pub use power::{ForceDischarge, ForceDischarger, PowerStatus, SysfsPowerStatus};
pub use service_stopper::ServiceStopper;
pub use upstart::Upstart;
pub use vpd::{Vpd, VpdSection};
