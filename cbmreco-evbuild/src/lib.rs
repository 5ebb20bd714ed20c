//! cbmreco-evbuild: Triggering and event building for CBM time-slices.
//!
//! - [`TimeClusterTrigger`] - multiplicity trigger on a sorted time series
//! - [`V0Trigger`] - displaced track pair trigger
//! - [`EventBuilder`] - per-system time windows around trigger times
//! - [`DigiEventSelector`] - minimum digi and station counts per event
//! - [`EventbuildChain`] - the three above bound to one JSON configuration
//!
//! All time series passed in must be sorted; unsorted input is an error.
#![warn(missing_docs)]

mod builder;
mod chain;
mod config;
mod error;
mod event;
mod selector;
mod trigger;
mod v0;

pub use builder::{EventBuilder, EventBuilderConfig, EventBuilderMonitor, SystemMonitor, TimeWindow};
pub use chain::{EventbuildChain, EventbuildChainMonitor, HitTimes, RecoInput};
pub use config::{EventbuildConfig, TriggerSource};
pub use error::{Error, Result};
pub use event::{DigiEvent, EventTriggers, SelectionTrigger};
pub use selector::{DigiEventSelector, DigiEventSelectorConfig, TrackingSetup};
pub use trigger::{TimeClusterTrigger, TimeClusterTriggerConfig, TriggerMonitor};
pub use v0::{Track, V0Trigger, V0TriggerConfig, V0TriggerMonitor};
