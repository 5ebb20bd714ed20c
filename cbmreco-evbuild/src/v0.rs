//! V0 trigger on reconstructed tracks.
//!
//! Looks for pairs of tracks that are close in time and pass close to each
//! other downstream of the target, the signature of a neutral particle
//! decaying into two charged daughters. Tracks are straight lines given by
//! a position and slopes `tx = dx/dz`, `ty = dy/dz` at a reference plane.

use crate::error::{Error, Result};
use cbmreco_core::{first_unsorted, Timed};
use log::error;
use serde::{Deserialize, Serialize};

/// Straight-line track parameters at a reference plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Track time, ns.
    pub time: f64,
    /// x at the reference plane, cm.
    pub x: f64,
    /// y at the reference plane, cm.
    pub y: f64,
    /// z of the reference plane, cm.
    pub z: f64,
    /// Slope dx/dz.
    pub tx: f64,
    /// Slope dy/dz.
    pub ty: f64,
}

impl Track {
    /// Transverse position at `z`.
    #[must_use]
    pub fn position_at(&self, z: f64) -> (f64, f64) {
        let dz = z - self.z;
        (self.x + self.tx * dz, self.y + self.ty * dz)
    }
}

impl Timed for Track {
    fn time(&self) -> f64 {
        self.time
    }
}

/// Pair selection cuts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct V0TriggerConfig {
    /// Maximum time difference of a pair, ns.
    pub pair_delta_t_max: f64,
    /// Maximum distance of closest approach, cm.
    pub pair_dist_max: f64,
    /// Lower bound of the z of closest approach, cm.
    pub pair_z_min: f64,
    /// Upper bound of the z of closest approach, cm.
    pub pair_z_max: f64,
    /// Minimum transverse distance of each track from the target at the
    /// target plane, cm. Tracks closer than this are primaries.
    pub track_offset_min: Option<f64>,
    /// Target position, cm.
    pub target: [f64; 3],
}

impl Default for V0TriggerConfig {
    fn default() -> Self {
        Self {
            pair_delta_t_max: 5.0,
            pair_dist_max: 0.5,
            pair_z_min: 5.0,
            pair_z_max: 25.0,
            track_offset_min: None,
            target: [0.0, 0.0, 0.0],
        }
    }
}

impl V0TriggerConfig {
    /// Sets the pair time cut.
    #[must_use]
    pub fn with_pair_delta_t_max(mut self, ns: f64) -> Self {
        self.pair_delta_t_max = ns;
        self
    }

    /// Sets the closest approach cut.
    #[must_use]
    pub fn with_pair_dist_max(mut self, cm: f64) -> Self {
        self.pair_dist_max = cm;
        self
    }

    /// Sets the z window of the closest approach.
    #[must_use]
    pub fn with_pair_z_range(mut self, z_min: f64, z_max: f64) -> Self {
        self.pair_z_min = z_min;
        self.pair_z_max = z_max;
        self
    }

    /// Sets the minimum track offset from the target.
    #[must_use]
    pub fn with_track_offset_min(mut self, cm: f64) -> Self {
        self.track_offset_min = Some(cm);
        self
    }

    /// Checks the cut ranges.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if !(self.pair_delta_t_max >= 0.0 && self.pair_dist_max >= 0.0) {
            return Err(Error::InvalidConfig(
                "V0 pair time and distance cuts must not be negative".into(),
            ));
        }
        if self.pair_z_min > self.pair_z_max {
            return Err(Error::InvalidConfig(format!(
                "V0 z window [{}, {}] is empty",
                self.pair_z_min, self.pair_z_max
            )));
        }
        if self.track_offset_min.is_some_and(|o| o.is_nan() || o < 0.0) {
            return Err(Error::InvalidConfig("V0 track offset cut must not be negative".into()));
        }
        Ok(())
    }
}

/// Counters of one V0 trigger call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct V0TriggerMonitor {
    /// Tracks passed in.
    pub num_tracks: usize,
    /// Tracks passing the offset cut.
    pub num_tracks_displaced: usize,
    /// All pairs of displaced tracks.
    pub num_track_pairs: usize,
    /// Pairs passing the time cut.
    pub num_track_pairs_after_time_cut: usize,
    /// Pairs passing the closest approach cut.
    pub num_track_pairs_after_dist_cut: usize,
    /// Pairs passing the z window; one trigger each.
    pub num_track_pairs_after_z_cut: usize,
    /// The input was not sorted by time and was skipped.
    pub err_tracks_unsorted: bool,
}

/// Closest approach of two straight tracks.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Approach {
    z: f64,
    dist: f64,
}

/// Closest approach of the transverse positions of `a` and `b` as a
/// function of z, or `None` for parallel tracks.
fn closest_approach(a: &Track, b: &Track) -> Option<Approach> {
    // Positions at z = 0.
    let (ax, ay) = a.position_at(0.0);
    let (bx, by) = b.position_at(0.0);
    let (dx, dy) = (ax - bx, ay - by);
    let (dtx, dty) = (a.tx - b.tx, a.ty - b.ty);
    let denom = dtx * dtx + dty * dty;
    if denom < f64::EPSILON {
        return None;
    }
    let z = -(dx * dtx + dy * dty) / denom;
    let (rx, ry) = (dx + dtx * z, dy + dty * z);
    Some(Approach {
        z,
        dist: (rx * rx + ry * ry).sqrt(),
    })
}

/// Pair-based trigger on displaced tracks.
#[derive(Clone, Debug)]
pub struct V0Trigger {
    config: V0TriggerConfig,
}

impl V0Trigger {
    /// Creates a trigger.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if the cuts are invalid.
    pub fn new(config: V0TriggerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &V0TriggerConfig {
        &self.config
    }

    fn is_displaced(&self, track: &Track) -> bool {
        let Some(min) = self.config.track_offset_min else {
            return true;
        };
        let [tx, ty, tz] = self.config.target;
        let (x, y) = track.position_at(tz);
        (x - tx).hypot(y - ty) >= min
    }

    /// Returns one trigger time (the mean pair time) per selected pair,
    /// sorted.
    ///
    /// `tracks` must be sorted by time. Unsorted input produces no
    /// triggers and sets [`V0TriggerMonitor::err_tracks_unsorted`].
    #[must_use]
    pub fn run(&self, tracks: &[Track]) -> (Vec<f64>, V0TriggerMonitor) {
        let mut monitor = V0TriggerMonitor {
            num_tracks: tracks.len(),
            ..V0TriggerMonitor::default()
        };
        if let Some(index) = first_unsorted(tracks) {
            error!("V0 trigger: tracks not sorted by time at index {index}, skipping");
            monitor.err_tracks_unsorted = true;
            return (Vec::new(), monitor);
        }

        let displaced: Vec<&Track> = tracks.iter().filter(|t| self.is_displaced(t)).collect();
        let n = displaced.len();
        monitor.num_tracks_displaced = n;
        monitor.num_track_pairs = n * n.saturating_sub(1) / 2;

        let cfg = &self.config;
        let mut triggers = Vec::new();
        for (i, a) in displaced.iter().enumerate() {
            for b in &displaced[i + 1..] {
                if b.time - a.time > cfg.pair_delta_t_max {
                    break;
                }
                monitor.num_track_pairs_after_time_cut += 1;

                let Some(approach) = closest_approach(a, b) else {
                    continue;
                };
                if approach.dist > cfg.pair_dist_max {
                    continue;
                }
                monitor.num_track_pairs_after_dist_cut += 1;

                if approach.z < cfg.pair_z_min || approach.z > cfg.pair_z_max {
                    continue;
                }
                monitor.num_track_pairs_after_z_cut += 1;
                triggers.push(0.5 * (a.time + b.time));
            }
        }
        triggers.sort_by(f64::total_cmp);
        (triggers, monitor)
    }
}
