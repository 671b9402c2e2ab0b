//! Downloadable content management via `dlcservice_util`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use autotest_common::{AutotestError, CmdSpec, CommandRunner, Result};

const DLCSERVICE_UTIL_CMD: &str = "dlcservice_util";
pub const SAMPLE_DLC_ID: &str = "sample-dlc";

/// Preloaded DLC images, installable without going through update_engine.
pub const PRELOAD_DIR: &str = "/mnt/stateful_partition/var_overlay/cache/dlc-images/";
pub const DISABLED_PRELOAD_DIR: &str = "/mnt/stateful_partition/var_overlay/cache/dlc-images-disabled/";

const INSTALL_TIMEOUT: Duration = Duration::from_secs(900);

/// One entry of `dlcservice_util --list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct DlcInfo {
    pub id: String,
    pub name: String,
    pub package: String,
    pub version: String,
    pub root_mount: String,
    pub size: String,
    pub preallocated_size: String,
    pub image_type: String,
    pub manifest: String,
    #[serde(rename = "fs-type")]
    pub fs_type: String,
}

/// Installed DLCs keyed by id.
pub type DlcList = BTreeMap<String, Vec<DlcInfo>>;

pub struct DlcUtil<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> DlcUtil<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Point the wrapper at another runner, e.g. a remote host.
    pub fn set_runner(&mut self, runner: &'a dyn CommandRunner) {
        self.runner = runner;
    }

    fn util(&self) -> CmdSpec {
        CmdSpec::new(DLCSERVICE_UTIL_CMD)
    }

    pub fn list(&self) -> Result<DlcList> {
        let status = self.runner.run(&self.util().arg("--list"))?;
        tracing::info!("{}", status.stdout);
        serde_json::from_str(&status.stdout)
            .map_err(|e| AutotestError::parse("dlcservice_util --list output", e.to_string()))
    }

    pub fn install(&self, dlc_id: &str, omaha_url: &str) -> Result<()> {
        self.install_with_timeout(dlc_id, omaha_url, INSTALL_TIMEOUT)
    }

    pub fn install_with_timeout(&self, dlc_id: &str, omaha_url: &str, timeout: Duration) -> Result<()> {
        let spec = self
            .util()
            .args(["--install".to_string(), format!("--id={dlc_id}"), format!("--omaha_url={omaha_url}")])
            .timeout(timeout);
        self.runner.system(&spec)
    }

    /// Uninstall a DLC. It stays on disk unmounted and can be reinstalled without an install request.
    pub fn uninstall(&self, dlc_id: &str, ignore_status: bool) -> Result<()> {
        self.remove("--uninstall", dlc_id, ignore_status)
    }

    /// Remove a DLC from the device completely.
    pub fn purge(&self, dlc_id: &str, ignore_status: bool) -> Result<()> {
        self.remove("--purge", dlc_id, ignore_status)
    }

    fn remove(&self, verb: &str, dlc_id: &str, ignore_status: bool) -> Result<()> {
        let mut spec = self.util().args([verb.to_string(), format!("--id={dlc_id}")]);
        spec.ignore_status = ignore_status;
        self.runner.system(&spec)
    }

    /// Move the preload images of `dlc_ids` aside so an install cannot be satisfied from them.
    ///
    /// After an update, updated DLCs are installed but not mounted, which looks the same as a preloaded DLC. Moving
    /// the preload images out of the way rules preloading out.
    pub fn disable_preloaded(&self, dlc_ids: &[&str]) -> Result<()> {
        self.runner
            .system(&CmdSpec::new("mkdir").args(["-p", DISABLED_PRELOAD_DIR]))?;
        for dlc_id in dlc_ids {
            let preload = format!("{PRELOAD_DIR}{dlc_id}");
            let disabled = format!("{DISABLED_PRELOAD_DIR}{dlc_id}");
            let exists = self
                .runner
                .run(&CmdSpec::new("test").args(["-d", preload.as_str()]).ignore_status())?
                .success();
            if exists {
                self.runner.system(&CmdSpec::new("mv").args([preload, disabled]))?;
            }
        }
        Ok(())
    }

    /// Move preload images disabled by `disable_preloaded` back.
    pub fn restore_preloaded(&self, dlc_ids: &[&str]) -> Result<()> {
        for dlc_id in dlc_ids {
            let spec = CmdSpec::new("mv")
                .args([format!("{DISABLED_PRELOAD_DIR}{dlc_id}"), format!("{PRELOAD_DIR}{dlc_id}")])
                .ignore_status();
            self.runner.system(&spec)?;
        }
        self.runner
            .system(&CmdSpec::new("rm").args(["-r", DISABLED_PRELOAD_DIR]).ignore_status())
    }

    pub fn is_installed(&self, dlc_id: &str) -> Result<bool> {
        Ok(self.list()?.contains_key(dlc_id))
    }
}
