//! Polling for device state.

use std::thread;
use std::time::{Duration, Instant};

use crate::error::{AutotestError, Result};

/// Options for [`poll_for_condition`].
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Maximum time to wait
    pub timeout: Duration,
    /// Time to sleep between polls
    pub sleep_interval: Duration,
    /// Description used in the default timeout error
    pub desc: Option<String>,
    /// Error to return instead of the default timeout error
    pub error: Option<AutotestError>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            sleep_interval: Duration::from_millis(100),
            desc: None,
            error: None,
        }
    }
}

impl PollOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sleep_interval(mut self, sleep_interval: Duration) -> Self {
        self.sleep_interval = sleep_interval;
        self
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    pub fn with_error(mut self, error: AutotestError) -> Self {
        self.error = Some(error);
        self
    }

    fn timeout_error(&self) -> AutotestError {
        if let Some(err) = &self.error {
            return err.clone();
        }
        match &self.desc {
            Some(desc) => AutotestError::Timeout(format!("Timed out waiting for condition: {desc}")),
            None => AutotestError::Timeout("Timed out waiting for unnamed condition".to_string()),
        }
    }
}

/// Poll until `condition` returns `true`.
///
/// The condition is checked at least once. The wait gives up before a sleep that would carry it past the timeout, so
/// the total wait never exceeds `timeout`. Errors returned by the condition abort the poll immediately.
pub fn poll_for_condition<F>(mut condition: F, opts: &PollOptions) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    let start = Instant::now();
    loop {
        if condition()? {
            return Ok(());
        }
        if start.elapsed() + opts.sleep_interval > opts.timeout {
            return Err(opts.timeout_error());
        }
        thread::sleep(opts.sleep_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> PollOptions {
        PollOptions::new()
            .with_timeout(Duration::from_millis(50))
            .with_sleep_interval(Duration::from_millis(5))
    }

    #[test]
    fn test_returns_once_condition_holds() {
        let mut calls = 0;
        poll_for_condition(
            || {
                calls += 1;
                Ok(calls == 3)
            },
            &fast(),
        )
        .unwrap();
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_unnamed_timeout_message() {
        let err = poll_for_condition(|| Ok(false), &fast()).unwrap_err();
        assert_eq!(
            err,
            AutotestError::Timeout("Timed out waiting for unnamed condition".to_string())
        );
    }

    #[test]
    fn test_described_timeout_message() {
        let err = poll_for_condition(|| Ok(false), &fast().with_desc("powerd to start")).unwrap_err();
        assert_eq!(err.to_string(), "Timed out waiting for condition: powerd to start");
    }

    #[test]
    fn test_custom_error_replaces_timeout() {
        let opts = fast().with_error(AutotestError::test_fail("battery never discharged"));
        let err = poll_for_condition(|| Ok(false), &opts).unwrap_err();
        assert_eq!(err, AutotestError::test_fail("battery never discharged"));
    }

    #[test]
    fn test_condition_error_propagates() {
        let mut calls = 0;
        let err = poll_for_condition(
            || {
                calls += 1;
                Err(AutotestError::test_error("status unreadable"))
            },
            &fast(),
        )
        .unwrap_err();
        assert_eq!(calls, 1);
        assert_eq!(err, AutotestError::test_error("status unreadable"));
    }

    #[test]
    fn test_checks_at_least_once_with_zero_timeout() {
        let opts = PollOptions::new()
            .with_timeout(Duration::ZERO)
            .with_sleep_interval(Duration::from_millis(1));
        poll_for_condition(|| Ok(true), &opts).unwrap();
    }
}
