//! Event-build chain: trigger, build, select.
//!
//! One [`EventbuildChain`] call turns a time-slice of digis into events:
//!
//! 1. Trigger times from the configured [`TriggerSource`]
//! 2. One event per trigger from the [`EventBuilder`] windows
//! 3. Optional [`DigiEventSelector`] cuts
//!
//! Inputs other than digis (hits, tracks) come in through [`RecoInput`].

use crate::builder::{EventBuilder, EventBuilderMonitor};
use crate::config::{EventbuildConfig, TriggerSource};
use crate::error::{Error, Result};
use crate::event::{DigiEvent, SelectionTrigger};
use crate::selector::{DigiEventSelector, TrackingSetup};
use crate::trigger::{TimeClusterTrigger, TriggerMonitor};
use crate::v0::{Track, V0Trigger, V0TriggerMonitor};
use cbmreco_core::{DetectorSystem, DigiData, PartitionedSlice, PartitionedVec, Timed};
use log::debug;
use std::sync::Arc;

/// Time-ordered hit times of one system.
pub trait HitTimes {
    /// Times of all hits, sorted ascending.
    fn hit_times(&self) -> Vec<f64>;
}

impl<T: Timed> HitTimes for PartitionedSlice<'_, T> {
    fn hit_times(&self) -> Vec<f64> {
        let mut times: Vec<f64> = self.data().iter().map(Timed::time).collect();
        times.sort_unstable_by(f64::total_cmp);
        times
    }
}

impl<T: Timed> HitTimes for PartitionedVec<T> {
    fn hit_times(&self) -> Vec<f64> {
        self.as_slice().hit_times()
    }
}

/// Reconstructed objects available to the trigger besides digis.
#[derive(Clone, Copy, Default)]
pub struct RecoInput<'a> {
    hits: Option<(DetectorSystem, &'a dyn HitTimes)>,
    tracks: Option<&'a [Track]>,
}

impl<'a> RecoInput<'a> {
    /// Adds the hits of `system`.
    #[must_use]
    pub fn with_hits(mut self, system: DetectorSystem, hits: &'a dyn HitTimes) -> Self {
        self.hits = Some((system, hits));
        self
    }

    /// Adds reconstructed tracks, sorted by time.
    #[must_use]
    pub fn with_tracks(mut self, tracks: &'a [Track]) -> Self {
        self.tracks = Some(tracks);
        self
    }

    fn hits_of(&self, system: DetectorSystem) -> Option<&'a dyn HitTimes> {
        self.hits.filter(|(s, _)| *s == system).map(|(_, hits)| hits)
    }
}

/// Counters of one chain call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventbuildChainMonitor {
    /// Multiplicity trigger counters, for digi or hit sources.
    pub trigger: Option<TriggerMonitor>,
    /// V0 trigger counters.
    pub v0: Option<V0TriggerMonitor>,
    /// Event builder counters.
    pub builder: EventBuilderMonitor,
}

enum Trigger {
    Digis(DetectorSystem, TimeClusterTrigger),
    Hits(DetectorSystem, TimeClusterTrigger),
    V0(V0Trigger),
}

/// Trigger, event builder and selector bound to one configuration.
pub struct EventbuildChain {
    config: EventbuildConfig,
    trigger: Trigger,
    builder: EventBuilder,
    setup: Option<Arc<dyn TrackingSetup>>,
    selector: Option<DigiEventSelector>,
}

impl std::fmt::Debug for EventbuildChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventbuildChain")
            .field("config", &self.config)
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

impl EventbuildChain {
    /// Creates a chain.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for invalid parameters and
    /// [`Error::MissingTrackingSetup`] if the selector has layer cuts; use
    /// [`EventbuildChain::with_tracking_setup`] for those.
    pub fn new(config: EventbuildConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Creates a chain whose selector counts layers through `setup`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for invalid parameters.
    pub fn with_tracking_setup(config: EventbuildConfig, setup: Arc<dyn TrackingSetup>) -> Result<Self> {
        Self::build(config, Some(setup))
    }

    /// Replaces the tracking setup and rebuilds the selector.
    ///
    /// # Errors
    /// Propagates selector construction errors.
    pub fn register_tracking_setup(&mut self, setup: Arc<dyn TrackingSetup>) -> Result<()> {
        self.selector = self
            .config
            .selector
            .clone()
            .map(|c| DigiEventSelector::new(c, Some(Arc::clone(&setup))))
            .transpose()?;
        self.setup = Some(setup);
        Ok(())
    }

    fn build(config: EventbuildConfig, setup: Option<Arc<dyn TrackingSetup>>) -> Result<Self> {
        config.validate()?;
        let trigger = match &config.trigger {
            TriggerSource::DigiMultiplicity { system, trigger } => {
                Trigger::Digis(*system, TimeClusterTrigger::new(trigger.clone())?)
            }
            TriggerSource::HitMultiplicity { system, trigger } => {
                Trigger::Hits(*system, TimeClusterTrigger::new(trigger.clone())?)
            }
            TriggerSource::V0 { trigger } => Trigger::V0(V0Trigger::new(trigger.clone())?),
        };
        let builder = EventBuilder::new(config.builder.clone())?;
        let selector = config
            .selector
            .clone()
            .map(|c| DigiEventSelector::new(c, setup.clone()))
            .transpose()?;
        debug!(
            "eventbuild chain: {} trigger, {} systems, selector {}",
            config.trigger.name(),
            config.builder.windows.len(),
            if selector.is_some() { "on" } else { "off" }
        );
        Ok(Self {
            config,
            trigger,
            builder,
            setup,
            selector,
        })
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &EventbuildConfig {
        &self.config
    }

    /// True if a tracking setup is registered.
    #[must_use]
    pub fn has_tracking_setup(&self) -> bool {
        self.setup.is_some()
    }

    /// Builds the events of one time-slice.
    ///
    /// # Errors
    /// Returns [`Error::MissingInput`] if the trigger source needs hits or
    /// tracks that `input` does not carry, and an unsorted-input error if
    /// trigger input, triggers or digis are out of order.
    pub fn run(&self, digis: &DigiData, input: &RecoInput<'_>) -> Result<(Vec<DigiEvent>, EventbuildChainMonitor)> {
        let mut monitor = EventbuildChainMonitor::default();

        let triggers = match &self.trigger {
            Trigger::Digis(system, trigger) => {
                let (triggers, mon) = trigger.run(&digis.times(*system))?;
                monitor.trigger = Some(mon);
                triggers
            }
            Trigger::Hits(system, trigger) => {
                let hits = input
                    .hits_of(*system)
                    .ok_or_else(|| Error::MissingInput(format!("{system} hits")))?;
                let (triggers, mon) = trigger.run(&hits.hit_times())?;
                monitor.trigger = Some(mon);
                triggers
            }
            Trigger::V0(trigger) => {
                let tracks = input
                    .tracks
                    .ok_or_else(|| Error::MissingInput("tracks".into()))?;
                let (triggers, mon) = trigger.run(tracks);
                monitor.v0 = Some(mon);
                triggers
            }
        };

        let (mut events, builder_monitor) = self.builder.run(digis, &triggers, self.selector.as_ref())?;
        monitor.builder = builder_monitor;

        if matches!(self.trigger, Trigger::V0(_)) {
            for event in &mut events {
                event.triggers.set(SelectionTrigger::Lambda);
            }
        }

        debug!(
            "eventbuild chain: {} triggers, {} events ({} rejected)",
            triggers.len(),
            monitor.builder.num_events,
            monitor.builder.num_events_rejected
        );
        Ok((events, monitor))
    }
}
