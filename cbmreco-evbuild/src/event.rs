//! Digi events and their selection trigger bitmap.

use cbmreco_core::DigiData;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Physics selections an event can be flagged with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionTrigger {
    /// Lambda candidate (V0 with a proton and a pion).
    Lambda,
    /// K-short candidate.
    Ks,
}

impl SelectionTrigger {
    const fn bit(self) -> u32 {
        match self {
            Self::Lambda => 1 << 0,
            Self::Ks => 1 << 1,
        }
    }
}

/// Bitmap of [`SelectionTrigger`]s.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventTriggers(u32);

impl EventTriggers {
    /// Creates a bitmap from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Sets `trigger`.
    pub fn set(&mut self, trigger: SelectionTrigger) {
        self.0 |= trigger.bit();
    }

    /// Clears `trigger`.
    pub fn reset(&mut self, trigger: SelectionTrigger) {
        self.0 &= !trigger.bit();
    }

    /// True if `trigger` is set.
    #[must_use]
    pub fn test(self, trigger: SelectionTrigger) -> bool {
        self.0 & trigger.bit() != 0
    }

    /// True if no trigger is set.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EventTriggers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06b}", self.0)
    }
}

/// Digis of all systems around one trigger.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DigiEvent {
    /// Trigger time, ns.
    pub time: f64,
    /// Digis inside the per-system windows around `time`.
    pub data: DigiData,
    /// Selections this event was flagged with.
    pub triggers: EventTriggers,
}
