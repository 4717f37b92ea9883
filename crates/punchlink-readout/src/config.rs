//! Pipeline timing and output settings.

use chrono::NaiveTime;
use punchlink_core::{
    DeviceFamily,
    clock::default_zero_time,
    constants::{
        DEFAULT_MAX_CONSECUTIVE_ERRORS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_QUEUE_WAIT_MS,
        SFR_POLL_INTERVAL_MS,
    },
};
use punchlink_hardware::config::millis;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Settings shared by the two workers of one controller.
///
/// Cancellation latency of a controller is bounded by
/// `max(poll_interval, queue_wait)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pause between two presence polls.
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Longest the normalization worker waits on an empty queue before it
    /// re-checks the stop flag.
    #[serde(with = "millis")]
    pub queue_wait: Duration,
    /// Pause before the first connect attempt.
    #[serde(with = "millis")]
    pub startup_delay: Duration,
    /// Recoverable errors in a row after which the device counts as failed.
    pub max_consecutive_errors: u32,
    /// Directory of the `si<YYYYMMDD>.log` backup files. `None` disables
    /// the backup.
    pub backup_dir: Option<PathBuf>,
    /// Fallback zero time when no race clock is supplied.
    pub zero_time: NaiveTime,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            queue_wait: Duration::from_millis(DEFAULT_QUEUE_WAIT_MS),
            startup_delay: Duration::ZERO,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            backup_dir: None,
            zero_time: default_zero_time(),
        }
    }
}

impl PipelineConfig {
    /// Defaults tuned for a reader family.
    ///
    /// # Examples
    ///
    /// ```
    /// use punchlink_core::DeviceFamily;
    /// use punchlink_readout::PipelineConfig;
    /// use std::time::Duration;
    ///
    /// let sfr = PipelineConfig::for_family(DeviceFamily::Sfr);
    /// assert_eq!(sfr.poll_interval, Duration::from_millis(200));
    /// ```
    pub fn for_family(family: DeviceFamily) -> Self {
        let poll_interval = if family.is_hid() {
            Duration::from_millis(SFR_POLL_INTERVAL_MS)
        } else {
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
        };
        Self {
            poll_interval,
            ..Self::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_queue_wait(mut self, wait: Duration) -> Self {
        self.queue_wait = wait;
        self
    }

    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max;
        self
    }

    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    pub fn with_zero_time(mut self, zero_time: NaiveTime) -> Self {
        self.zero_time = zero_time;
        self
    }
}
