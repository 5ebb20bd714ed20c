//! Time cluster trigger.
//!
//! Finds dense regions in a sorted time series. A trigger fires when at
//! least `min_count` points fall within `window` ns; the trigger time is
//! the midpoint of the first and last contributing point. After a trigger
//! every point within `dead_time` of the last contributing point is
//! skipped.
//!
//! Single forward pass, O(n).

use crate::error::{Error, Result};
use cbmreco_core::check_time_sorted;
use serde::{Deserialize, Serialize};

/// Trigger parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeClusterTriggerConfig {
    /// Window size, ns.
    pub window: f64,
    /// Minimum number of points in the window.
    pub min_count: usize,
    /// Dead time after a trigger, ns.
    #[serde(default)]
    pub dead_time: f64,
}

impl TimeClusterTriggerConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] unless `window > 0`, `min_count >= 1`
    /// and `dead_time >= 0`.
    pub fn new(window: f64, min_count: usize, dead_time: f64) -> Result<Self> {
        let config = Self {
            window,
            min_count,
            dead_time,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the parameter ranges.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if !(self.window.is_finite() && self.window > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "trigger window must be positive, got {}",
                self.window
            )));
        }
        if self.min_count == 0 {
            return Err(Error::InvalidConfig("trigger min_count must be at least 1".into()));
        }
        if self.dead_time.is_nan() || self.dead_time < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "trigger dead time must not be negative, got {}",
                self.dead_time
            )));
        }
        Ok(())
    }
}

/// Counters of one trigger call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TriggerMonitor {
    /// Points in the input.
    pub num: usize,
    /// Points attributed to some trigger.
    pub num_in_trigger: usize,
    /// Triggers emitted.
    pub num_triggers: usize,
}

/// Sliding-window multiplicity trigger.
#[derive(Clone, Debug)]
pub struct TimeClusterTrigger {
    config: TimeClusterTriggerConfig,
}

impl TimeClusterTrigger {
    /// Creates a trigger.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if the configuration is invalid.
    pub fn new(config: TimeClusterTriggerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &TimeClusterTriggerConfig {
        &self.config
    }

    /// Finds trigger times in `times`.
    ///
    /// # Errors
    /// Returns an unsorted-input error if `times` is not ascending.
    pub fn run(&self, times: &[f64]) -> Result<(Vec<f64>, TriggerMonitor)> {
        check_time_sorted(times, "trigger input")?;
        let TimeClusterTriggerConfig {
            window,
            min_count,
            dead_time,
        } = self.config;

        let mut triggers = Vec::new();
        let mut monitor = TriggerMonitor {
            num: times.len(),
            ..TriggerMonitor::default()
        };

        let n = times.len();
        let mut win_start = 0;
        let mut current = 0;
        while current < n {
            while times[current] - times[win_start] > window {
                win_start += 1;
            }
            let count = current - win_start + 1;
            if count >= min_count {
                triggers.push(0.5 * (times[win_start] + times[current]));
                monitor.num_in_trigger += count;

                let dead_end = times[current] + dead_time;
                current += 1;
                while current < n && times[current] <= dead_end {
                    current += 1;
                }
                win_start = current;
            } else {
                current += 1;
            }
        }

        monitor.num_triggers = triggers.len();
        Ok((triggers, monitor))
    }
}
