//! Forcing the battery to discharge through the EC while the charger is plugged in.
//!
//! Power tests measure drain from the battery, so on devices with a CrOS EC they ask it to stop charging for the
//! duration of the measurement and restore charging afterwards.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use autotest_common::{AutotestError, CmdSpec, CommandRunner, Result};

/// `ectool chargecontrol` is flaky right after boot; give it a few tries.
pub const ECTOOL_CHARGECONTROL_RETRY_TIMES: usize = 3;

pub const CROS_EC_DEV: &str = "/dev/cros_ec";
pub const POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";

/// Whether to force discharge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceDischarge {
    /// Leave charging alone
    False,
    /// Force discharge and fail when that is impossible
    True,
    /// Force discharge when possible; devices without a battery or EC just skip it
    Optional,
}

impl FromStr for ForceDischarge {
    type Err = AutotestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "false" => Ok(Self::False),
            "true" => Ok(Self::True),
            "optional" => Ok(Self::Optional),
            _ => Err(AutotestError::test_error(format!(
                "Force discharge setting '{s}' need to be one of ['false', 'true', 'optional']."
            ))),
        }
    }
}

impl fmt::Display for ForceDischarge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::False => "false",
            Self::True => "true",
            Self::Optional => "optional",
        })
    }
}

/// Battery state of the device.
pub trait PowerStatus {
    /// Re-read the state.
    fn refresh(&mut self) -> Result<()>;
    fn has_battery(&self) -> bool;
    fn battery_discharging(&self) -> bool;
}

/// Battery state read from the kernel's power supply class.
#[derive(Debug, Clone)]
pub struct SysfsPowerStatus {
    root: PathBuf,
    battery: Option<PathBuf>,
    discharging: bool,
}

impl SysfsPowerStatus {
    pub fn new() -> Result<Self> {
        Self::with_root(POWER_SUPPLY_DIR)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Result<Self> {
        let mut status = Self {
            root: root.into(),
            battery: None,
            discharging: false,
        };
        status.refresh()?;
        Ok(status)
    }

    fn find_battery(root: &Path) -> Result<Option<PathBuf>> {
        if !root.is_dir() {
            return Ok(None);
        }
        let mut supplies: Vec<PathBuf> = fs::read_dir(root)?.flatten().map(|e| e.path()).collect();
        supplies.sort();
        Ok(supplies
            .into_iter()
            .find(|p| read_attr(p, "type").as_deref() == Some("Battery")))
    }
}

fn read_attr(supply: &Path, attr: &str) -> Option<String> {
    fs::read_to_string(supply.join(attr)).ok().map(|s| s.trim().to_string())
}

impl PowerStatus for SysfsPowerStatus {
    fn refresh(&mut self) -> Result<()> {
        self.battery = Self::find_battery(&self.root)?;
        self.discharging = self
            .battery
            .as_deref()
            .and_then(|b| read_attr(b, "status"))
            .is_some_and(|s| s == "Discharging");
        Ok(())
    }

    fn has_battery(&self) -> bool {
        self.battery.is_some()
    }

    fn battery_discharging(&self) -> bool {
        self.discharging
    }
}

pub struct ForceDischarger<'a> {
    runner: &'a dyn CommandRunner,
    ec_present: bool,
    poll_interval: Duration,
}

impl<'a> ForceDischarger<'a> {
    /// A discharger for the local device; the EC is detected from `/dev/cros_ec`.
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            ec_present: Path::new(CROS_EC_DEV).exists(),
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn with_ec_present(mut self, ec_present: bool) -> Self {
        self.ec_present = ec_present;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn ectool_once(&self, is_charge: bool, ignore_status: bool) -> Result<bool> {
        let mode = if is_charge { "off" } else { "dontcharge" };
        match self.runner.system(&CmdSpec::new("ectool").args(["chargeoverride", mode])) {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!("Unable to use ectool: {}", e);
                if ignore_status { Ok(false) } else { Err(e) }
            }
        }
    }

    /// Ask the EC to charge (`is_charge`) or to stop charging. Returns whether the EC accepted.
    pub fn charge_control_by_ectool(&self, is_charge: bool, ignore_status: bool) -> Result<bool> {
        for _ in 0..ECTOOL_CHARGECONTROL_RETRY_TIMES {
            if self.ectool_once(is_charge, ignore_status)? {
                return Ok(true);
            }
            thread::sleep(self.poll_interval);
        }
        Ok(false)
    }

    /// Poll for up to 20 intervals (about two seconds) for the battery to report discharging.
    fn wait_for_battery_discharge(&self, status: &mut dyn PowerStatus) -> Result<bool> {
        for _ in 0..20 {
            status.refresh()?;
            if status.battery_discharging() {
                return Ok(true);
            }
            thread::sleep(self.poll_interval);
        }
        Ok(false)
    }

    /// Apply `setting`. Returns whether the device is now force discharging.
    ///
    /// With `True`, a device without battery or EC is `TestNA` and an EC refusal is a `TestError`. With `Optional`
    /// the same conditions are logged and `false` is returned.
    pub fn process(&self, setting: ForceDischarge, status: &mut dyn PowerStatus) -> Result<bool> {
        let required = match setting {
            ForceDischarge::False => return Ok(false),
            ForceDischarge::True => true,
            ForceDischarge::Optional => false,
        };

        let skip = |reason: &str| -> Result<bool> {
            if required {
                Err(AutotestError::test_na(format!("{reason} Could not force discharge.")))
            } else {
                tracing::warn!("{} Do not force discharge.", reason);
                Ok(false)
            }
        };
        if !status.has_battery() {
            return skip("DUT does not have battery.");
        }
        if !self.ec_present {
            return skip("DUT does not have CrOS EC.");
        }
        if !self.charge_control_by_ectool(false, true)? {
            if required {
                return Err(AutotestError::test_error("Could not run battery force discharge."));
            }
            tracing::warn!("Could not run battery force discharge. Do not force discharge.");
            return Ok(false);
        }
        if !self.wait_for_battery_discharge(status)? {
            tracing::warn!("Battery does not report discharging state.");
        }
        Ok(true)
    }

    /// Put the device back to charging if `process` forced it to discharge.
    pub fn restore(&self, force_discharge_success: bool) -> Result<()> {
        if force_discharge_success && !self.charge_control_by_ectool(true, true)? {
            tracing::warn!("Can not restore from force discharge.");
        }
        Ok(())
    }
}
