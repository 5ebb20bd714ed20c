//! Event-build configuration.
//!
//! Loaded from JSON, for example:
//!
//! ```json
//! {
//!   "trigger": {
//!     "type": "digi_multiplicity",
//!     "system": "sts",
//!     "trigger": { "window": 50.0, "min_count": 20, "dead_time": 100.0 }
//!   },
//!   "builder": { "windows": { "sts": { "min": -20.0, "max": 50.0 } } },
//!   "selector": { "min_digis": { "sts": 10 } }
//! }
//! ```

use crate::builder::EventBuilderConfig;
use crate::error::{Error, Result};
use crate::selector::DigiEventSelectorConfig;
use crate::trigger::TimeClusterTriggerConfig;
use crate::v0::V0TriggerConfig;
use cbmreco_core::DetectorSystem;
use serde::{Deserialize, Serialize};

/// Where trigger times come from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSource {
    /// Time cluster trigger on the digi times of one system.
    DigiMultiplicity {
        /// System whose digis are counted.
        system: DetectorSystem,
        /// Trigger parameters.
        trigger: TimeClusterTriggerConfig,
    },
    /// Time cluster trigger on the hit times of one system.
    HitMultiplicity {
        /// System whose hits are counted.
        system: DetectorSystem,
        /// Trigger parameters.
        trigger: TimeClusterTriggerConfig,
    },
    /// V0 trigger on reconstructed tracks.
    V0 {
        /// Pair cuts.
        #[serde(default)]
        trigger: V0TriggerConfig,
    },
}

impl TriggerSource {
    /// Short name used in logs and errors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::DigiMultiplicity { .. } => "digi multiplicity",
            Self::HitMultiplicity { .. } => "hit multiplicity",
            Self::V0 { .. } => "V0",
        }
    }

    /// Checks the trigger parameters.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for invalid parameters.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::DigiMultiplicity { trigger, .. } | Self::HitMultiplicity { trigger, .. } => {
                trigger.validate()
            }
            Self::V0 { trigger } => trigger.validate(),
        }
    }
}

/// Full event-build configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventbuildConfig {
    /// Trigger source.
    pub trigger: TriggerSource,
    /// Event windows.
    pub builder: EventBuilderConfig,
    /// Event selection, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<DigiEventSelectorConfig>,
}

impl EventbuildConfig {
    /// Creates a configuration without event selection.
    #[must_use]
    pub fn new(trigger: TriggerSource, builder: EventBuilderConfig) -> Self {
        Self {
            trigger,
            builder,
            selector: None,
        }
    }

    /// Adds event selection.
    #[must_use]
    pub fn with_selector(mut self, selector: DigiEventSelectorConfig) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    /// Returns [`Error::JsonError`] for malformed JSON and
    /// [`Error::InvalidConfig`] for invalid values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes to pretty JSON.
    ///
    /// # Errors
    /// Returns [`Error::JsonError`] if serialization fails.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks trigger and builder parameters.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        self.trigger.validate()?;
        if self.builder.windows.is_empty() {
            return Err(Error::InvalidConfig("event builder has no system windows".into()));
        }
        self.builder.validate()
    }
}
