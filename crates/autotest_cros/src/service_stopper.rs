//! Stop system services for the duration of a test and bring them back afterwards.

use autotest_common::{CmdSpec, CommandRunner};

/// Services that disturb power measurements.
pub const POWER_DRAW_SERVICES: [&str; 3] = ["powerd", "update-engine", "bluetoothd"];

pub struct ServiceStopper<'a> {
    runner: &'a dyn CommandRunner,
    pub services_to_stop: Vec<String>,
    services_stopped: Vec<String>,
}

impl<'a> ServiceStopper<'a> {
    pub fn new<I, S>(runner: &'a dyn CommandRunner, services_to_stop: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            runner,
            services_to_stop: services_to_stop.into_iter().map(Into::into).collect(),
            services_stopped: Vec::new(),
        }
    }

    /// Services this stopper has stopped and not yet restored, in stop order.
    pub fn stopped(&self) -> &[String] {
        &self.services_stopped
    }

    /// Stop every running service in `services_to_stop`.
    ///
    /// Services that are not running are skipped. A service that fails to stop is logged and left alone.
    pub fn stop_services(&mut self) {
        for service in &self.services_to_stop {
            let status = self
                .runner
                .output(&CmdSpec::new("status").arg(service).ignore_status())
                .unwrap_or_default();
            if !status.contains("start/running") {
                continue;
            }
            match self.runner.system(&CmdSpec::new("stop").arg(service)) {
                Ok(()) => self.services_stopped.push(service.clone()),
                Err(e) => tracing::warn!("Error stopping service {}. {}", service, e),
            }
        }
    }

    /// Start the services stopped by `stop_services`, most recently stopped first.
    pub fn restore_services(&mut self) {
        for service in self.services_stopped.drain(..).rev() {
            if let Err(e) = self.runner.system(&CmdSpec::new("start").arg(&service).ignore_status()) {
                tracing::warn!("Error restoring service {}. {}", service, e);
            }
        }
    }
}
