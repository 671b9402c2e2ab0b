//! Error records: how a failing child hands its error to the parent.
//!
//! The child serializes its [`AutotestError`] to `debug/error-<pid>` before exiting. The parent knows the pid it
//! spawned and only ever looks at that one file.

use std::fs;
use std::path::{Path, PathBuf};

use autotest_common::{AutotestError, Result};

pub fn record_path(debugdir: &Path, pid: u32) -> PathBuf {
    debugdir.join(format!("error-{pid}"))
}

/// Serialize `error` into `debugdir` under `pid`.
pub fn write_record(debugdir: &Path, pid: u32, error: &AutotestError) -> Result<()> {
    let json = serde_json::to_string_pretty(error)
        .map_err(|e| AutotestError::parse("error record", e.to_string()))?;
    fs::write(record_path(debugdir, pid), json)?;
    Ok(())
}

/// Load the record `pid` left in `debugdir`, if any.
pub fn read_record(debugdir: &Path, pid: u32) -> Result<Option<AutotestError>> {
    let path = record_path(debugdir, pid);
    if !path.exists() {
        return Ok(None);
    }
    let json = fs::read_to_string(&path)?;
    serde_json::from_str(&json)
        .map(Some)
        .map_err(|e| AutotestError::parse(format!("error record {}", path.display()), e.to_string()))
}
