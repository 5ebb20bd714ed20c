//! Digi event selection.
//!
//! An event passes if, for every configured system, it has at least the
//! configured number of digis and digis on at least the configured number
//! of distinct tracking stations. Systems without a cut impose nothing.

use crate::error::{Error, Result};
use crate::event::DigiEvent;
use cbmreco_core::DetectorSystem;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Maps hardware addresses to tracking station indices.
pub trait TrackingSetup: Send + Sync {
    /// Station of the digi at `address` in `system`, or `None` if the
    /// address is not part of the tracking geometry.
    fn station(&self, system: DetectorSystem, address: u32) -> Option<u32>;
}

/// Per-system minimum digi and station counts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigiEventSelectorConfig {
    /// Minimum number of digis per system.
    pub min_digis: BTreeMap<DetectorSystem, usize>,
    /// Minimum number of stations with a digi per system.
    pub min_layers: BTreeMap<DetectorSystem, usize>,
}

impl DigiEventSelectorConfig {
    /// Adds a digi count cut.
    #[must_use]
    pub fn with_min_digis(mut self, system: DetectorSystem, n: usize) -> Self {
        self.min_digis.insert(system, n);
        self
    }

    /// Adds a station count cut.
    #[must_use]
    pub fn with_min_layers(mut self, system: DetectorSystem, n: usize) -> Self {
        self.min_layers.insert(system, n);
        self
    }

    /// True if no cut is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min_digis.is_empty() && self.min_layers.is_empty()
    }
}

/// Event filter.
#[derive(Clone)]
pub struct DigiEventSelector {
    config: DigiEventSelectorConfig,
    setup: Option<Arc<dyn TrackingSetup>>,
}

impl fmt::Debug for DigiEventSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigiEventSelector")
            .field("config", &self.config)
            .field("has_tracking_setup", &self.setup.is_some())
            .finish()
    }
}

impl DigiEventSelector {
    /// Creates a selector.
    ///
    /// # Errors
    /// Returns [`Error::MissingTrackingSetup`] if a station cut is
    /// configured without a tracking setup.
    pub fn new(config: DigiEventSelectorConfig, setup: Option<Arc<dyn TrackingSetup>>) -> Result<Self> {
        if setup.is_none() {
            if let Some((&system, _)) = config.min_layers.iter().find(|(_, &n)| n > 0) {
                return Err(Error::MissingTrackingSetup(system));
            }
        }
        Ok(Self { config, setup })
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &DigiEventSelectorConfig {
        &self.config
    }

    /// True if `event` passes every configured cut.
    #[must_use]
    pub fn select(&self, event: &DigiEvent) -> bool {
        let digis_ok = self
            .config
            .min_digis
            .iter()
            .all(|(&system, &min)| event.data.len(system) >= min);
        digis_ok
            && self
                .config
                .min_layers
                .iter()
                .all(|(&system, &min)| self.count_layers(event, system) >= min)
    }

    /// Distinct stations of `system` with at least one digi in `event`.
    fn count_layers(&self, event: &DigiEvent, system: DetectorSystem) -> usize {
        let Some(setup) = &self.setup else {
            return 0;
        };
        event
            .data
            .addresses(system)
            .into_iter()
            .filter_map(|addr| setup.station(system, addr))
            .collect::<HashSet<u32>>()
            .len()
    }
}
