//! Time-window event builder.
//!
//! For every trigger time `t` and every configured system, an event gets a
//! copy of the system's digis with times in `[t + min, t + max]`. Windows of
//! neighbouring triggers may overlap, in which case a digi is copied into
//! more than one event.
//!
//! Triggers and digis must be sorted by time; both are checked. Since both
//! are sorted, the window bounds of consecutive triggers only move forward,
//! so one sweep per system finds every range.

use crate::error::{Error, Result};
use crate::event::DigiEvent;
use crate::selector::DigiEventSelector;
use cbmreco_core::{check_time_sorted, DetectorSystem, DigiData, SystemDigi, SystemVisitor, Timed};
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

/// Window around the trigger time, ns.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start offset relative to the trigger.
    pub min: f64,
    /// End offset relative to the trigger.
    pub max: f64,
}

impl TimeWindow {
    /// Creates a window.
    #[must_use]
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

/// Per-system windows.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventBuilderConfig {
    /// Systems to copy and their windows.
    pub windows: BTreeMap<DetectorSystem, TimeWindow>,
}

impl EventBuilderConfig {
    /// Adds a system window.
    #[must_use]
    pub fn with_window(mut self, system: DetectorSystem, min: f64, max: f64) -> Self {
        self.windows.insert(system, TimeWindow::new(min, max));
        self
    }

    /// Checks that every window is finite and not inverted.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] naming the first bad window.
    pub fn validate(&self) -> Result<()> {
        for (system, w) in &self.windows {
            if !(w.min.is_finite() && w.max.is_finite()) || w.min > w.max {
                return Err(Error::InvalidConfig(format!(
                    "event window for {system} is [{}, {}]",
                    w.min, w.max
                )));
            }
        }
        Ok(())
    }
}

/// Digi counts of one system.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SystemMonitor {
    /// Digis in the time-slice.
    pub n_digis: usize,
    /// Digis copied into the returned events; overlapping windows count a
    /// digi once per event.
    pub n_digis_in_events: usize,
}

impl SystemMonitor {
    /// Fraction of time-slice digis that ended up in events.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn selection_ratio(&self) -> f64 {
        if self.n_digis == 0 {
            0.0
        } else {
            self.n_digis_in_events as f64 / self.n_digis as f64
        }
    }
}

/// Counters of one event builder call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventBuilderMonitor {
    /// Per configured system.
    pub systems: BTreeMap<DetectorSystem, SystemMonitor>,
    /// Triggers passed in.
    pub num_triggers: usize,
    /// Events returned.
    pub num_events: usize,
    /// Events removed by the selector.
    pub num_events_rejected: usize,
}

/// Index ranges of `items` inside `window` around each trigger.
fn window_ranges<T: Timed>(items: &[T], triggers: &[f64], window: TimeWindow) -> Vec<Range<usize>> {
    let mut lo = 0;
    let mut hi = 0;
    triggers
        .iter()
        .map(|&t| {
            let (start, end) = (t + window.min, t + window.max);
            while lo < items.len() && items[lo].time() < start {
                lo += 1;
            }
            hi = hi.max(lo);
            while hi < items.len() && items[hi].time() <= end {
                hi += 1;
            }
            lo..hi
        })
        .collect()
}

struct Ranges<'a> {
    data: &'a DigiData,
    triggers: &'a [f64],
    window: TimeWindow,
}

impl SystemVisitor for Ranges<'_> {
    type Output = Vec<Range<usize>>;

    fn visit<D: SystemDigi>(&mut self) -> Vec<Range<usize>> {
        window_ranges(D::column(self.data), self.triggers, self.window)
    }
}

struct CopyRange<'a> {
    src: &'a DigiData,
    dst: &'a mut DigiData,
    range: Range<usize>,
}

impl SystemVisitor for CopyRange<'_> {
    type Output = ();

    fn visit<D: SystemDigi>(&mut self) {
        D::column_mut(self.dst).extend_from_slice(&D::column(self.src)[self.range.clone()]);
    }
}

/// Builds digi events around trigger times.
#[derive(Clone, Debug)]
pub struct EventBuilder {
    config: EventBuilderConfig,
}

impl EventBuilder {
    /// Creates an event builder.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for an invalid window.
    pub fn new(config: EventBuilderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &EventBuilderConfig {
        &self.config
    }

    /// Builds one event per trigger, then drops events the selector rejects.
    ///
    /// Returned events keep trigger order.
    ///
    /// # Errors
    /// Returns an unsorted-input error if `triggers` or the digis of a
    /// configured system are not sorted by time.
    pub fn run(
        &self,
        digis: &DigiData,
        triggers: &[f64],
        selector: Option<&DigiEventSelector>,
    ) -> Result<(Vec<DigiEvent>, EventBuilderMonitor)> {
        check_time_sorted(triggers, "triggers")?;
        for &system in self.config.windows.keys() {
            digis.check_sorted(system)?;
        }

        let ranges: Vec<(DetectorSystem, Vec<Range<usize>>)> = self
            .config
            .windows
            .iter()
            .map(|(&system, &window)| {
                let mut visitor = Ranges {
                    data: digis,
                    triggers,
                    window,
                };
                (system, system.visit(&mut visitor))
            })
            .collect();

        let built: Vec<DigiEvent> = triggers
            .par_iter()
            .enumerate()
            .map(|(i, &time)| {
                let mut data = DigiData::new();
                for (system, system_ranges) in &ranges {
                    let mut copy = CopyRange {
                        src: digis,
                        dst: &mut data,
                        range: system_ranges[i].clone(),
                    };
                    system.visit(&mut copy);
                }
                DigiEvent {
                    time,
                    data,
                    ..DigiEvent::default()
                }
            })
            .collect();

        let n_built = built.len();
        let events: Vec<DigiEvent> = match selector {
            Some(selector) => built.into_par_iter().filter(|ev| selector.select(ev)).collect(),
            None => built,
        };

        let systems = self
            .config
            .windows
            .keys()
            .map(|&system| {
                let monitor = SystemMonitor {
                    n_digis: digis.len(system),
                    n_digis_in_events: events.iter().map(|ev| ev.data.len(system)).sum(),
                };
                (system, monitor)
            })
            .collect();
        let monitor = EventBuilderMonitor {
            systems,
            num_triggers: triggers.len(),
            num_events: events.len(),
            num_events_rejected: n_built - events.len(),
        };
        debug!(
            "event builder: {} triggers, {} events, {} rejected",
            monitor.num_triggers, monitor.num_events, monitor.num_events_rejected
        );
        Ok((events, monitor))
    }
}
