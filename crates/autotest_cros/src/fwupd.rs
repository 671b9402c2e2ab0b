//! Firmware update daemon queries via `fwupdmgr`.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use autotest_common::{AutotestError, CmdSpec, CommandRunner, Result};

static CLIENT_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"client version:\s+([\d.]+)").expect("INVARIANT: static regex is valid"));

/// A device as reported by `fwupdmgr get-devices --json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FwupdDevice {
    pub name: Option<String>,
    pub device_id: Option<String>,
    #[serde(default)]
    pub guid: Vec<String>,
    pub version: Option<String>,
    pub flags: Option<Vec<String>>,
}

impl FwupdDevice {
    /// Whether the device is identified by `dev_id`, either as its fwupd instance id or as one of its GUIDs.
    pub fn matches_id(&self, dev_id: &str) -> bool {
        self.device_id.as_deref() == Some(dev_id) || self.guid.iter().any(|g| g == dev_id)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown Device")
    }
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    #[serde(rename = "Devices")]
    devices: Option<Vec<FwupdDevice>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VersionEntry {
    appstream_id: Option<String>,
    #[serde(rename = "Type")]
    kind: Option<String>,
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VersionList {
    #[serde(rename = "Versions", default)]
    versions: Vec<VersionEntry>,
}

/// Every device fwupd currently detects.
pub fn get_devices(runner: &dyn CommandRunner) -> Result<Vec<FwupdDevice>> {
    let output = runner
        .output(&CmdSpec::new("fwupdmgr").args(["get-devices", "--json"]))
        .map_err(|e| AutotestError::test_error(e.to_string()))?;
    let list: DeviceList = serde_json::from_str(&output)
        .map_err(|e| AutotestError::test_error(format!("Error parsing <fwupdmgr get-devices> output: {e}")))?;
    list.devices
        .ok_or_else(|| AutotestError::test_error("No devices found"))
}

/// Find `dev_id` in `devices` and make sure it can be updated.
pub fn check_device<'d>(dev_id: &str, devices: &'d [FwupdDevice]) -> Result<&'d FwupdDevice> {
    let Some(dev) = devices.iter().find(|d| d.matches_id(dev_id)) else {
        return Err(AutotestError::test_error(format!("Device {dev_id} not found")));
    };
    let name = dev.display_name();
    if dev.device_id.is_none() {
        return Err(AutotestError::test_error(format!("Device {dev_id} ({name}) has no DeviceId")));
    }
    if dev.version.is_none() {
        return Err(AutotestError::test_error(format!(
            "Device {dev_id} ({name}) has no FW version info"
        )));
    }
    let Some(flags) = &dev.flags else {
        return Err(AutotestError::test_error(format!(
            "Device {dev_id} ({name}) has no 'Flags' attribute"
        )));
    };
    if flags.iter().any(|f| f == "updatable") {
        Ok(dev)
    } else {
        Err(AutotestError::test_error(format!("Device {dev_id} ({name}) is not updatable")))
    }
}

/// The fwupd version, `None` if fwupd is not running or the version cannot be read.
///
/// `fwupdmgr` connects to the daemon to report versions, so this doubles as a liveness check.
pub fn get_fwupdmgr_version(runner: &dyn CommandRunner) -> Option<String> {
    let output = match runner.output(&CmdSpec::new("fwupdmgr").args(["--version", "--json"])) {
        Ok(output) => output,
        Err(e) => {
            tracing::error!("fwupd not running, not found or broken");
            tracing::error!("{}", e);
            return None;
        }
    };
    let version = match serde_json::from_str::<VersionList>(&output) {
        Ok(list) => list
            .versions
            .into_iter()
            .find(|v| {
                v.appstream_id.as_deref() == Some("org.freedesktop.fwupd") && v.kind.as_deref() == Some("runtime")
            })
            .and_then(|v| v.version),
        // Older fwupdmgr has no JSON output.
        Err(_) => CLIENT_VERSION_RE.captures(&output).map(|c| c[1].to_string()),
    };
    if version.is_none() {
        tracing::error!("Error parsing fwupd version info");
        tracing::error!("{}", output);
    }
    version
}
