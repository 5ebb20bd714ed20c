//! Digi types and per-detector-system dispatch.
//!
//! Every detector system has its own digi record. Code that only needs a
//! timestamp or an address is written once against [`Timed`] / [`Digi`]
//! and dispatched per system with a [`SystemVisitor`]; the single `match`
//! over [`DetectorSystem`] lives in [`DetectorSystem::visit`].

#![allow(clippy::module_name_repetitions)]

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Anything carrying a timestamp in nanoseconds.
pub trait Timed {
    /// Time in ns.
    fn time(&self) -> f64;
}

impl Timed for f64 {
    #[inline]
    fn time(&self) -> f64 {
        *self
    }
}

/// A decoded hardware measurement.
pub trait Digi: Timed {
    /// Hardware address of the channel's readout unit.
    fn address(&self) -> u32;
}

/// Detector systems that deliver digis to event building.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DetectorSystem {
    /// Silicon Tracking System.
    Sts,
    /// Muon chambers.
    Much,
    /// Transition Radiation Detector.
    Trd,
    /// Two-dimensional TRD.
    Trd2d,
    /// Time-of-Flight wall.
    Tof,
    /// Beam monitor.
    Bmon,
    /// Ring Imaging Cherenkov detector.
    Rich,
    /// Forward Spectator Detector.
    Fsd,
}

impl DetectorSystem {
    /// All systems in canonical order.
    pub const ALL: [Self; 8] = [
        Self::Sts,
        Self::Much,
        Self::Trd,
        Self::Trd2d,
        Self::Tof,
        Self::Bmon,
        Self::Rich,
        Self::Fsd,
    ];

    /// Short lowercase name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sts => "sts",
            Self::Much => "much",
            Self::Trd => "trd",
            Self::Trd2d => "trd2d",
            Self::Tof => "tof",
            Self::Bmon => "bmon",
            Self::Rich => "rich",
            Self::Fsd => "fsd",
        }
    }

    /// Calls `visitor` with the digi type of this system.
    pub fn visit<V: SystemVisitor>(self, visitor: &mut V) -> V::Output {
        match self {
            Self::Sts => visitor.visit::<StsDigi>(),
            Self::Much => visitor.visit::<MuchDigi>(),
            Self::Trd => visitor.visit::<TrdDigi>(),
            Self::Trd2d => visitor.visit::<Trd2dDigi>(),
            Self::Tof => visitor.visit::<TofDigi>(),
            Self::Bmon => visitor.visit::<BmonDigi>(),
            Self::Rich => visitor.visit::<RichDigi>(),
            Self::Fsd => visitor.visit::<FsdDigi>(),
        }
    }
}

impl fmt::Display for DetectorSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DetectorSystem {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|sys| sys.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::ConfigError(format!("unknown detector system '{s}'")))
    }
}

/// Generic operation over one system's digi type.
pub trait SystemVisitor {
    /// Result of the visit.
    type Output;

    /// Runs the operation for digi type `D`.
    fn visit<D: SystemDigi>(&mut self) -> Self::Output;
}

/// A digi type bound to one detector system and its column in [`DigiData`].
pub trait SystemDigi: Digi + Copy + Send + Sync + 'static {
    /// The owning system.
    const SYSTEM: DetectorSystem;

    /// This system's digis in `data`.
    fn column(data: &DigiData) -> &Vec<Self>;

    /// This system's digis in `data`, mutably.
    fn column_mut(data: &mut DigiData) -> &mut Vec<Self>;
}

/// STS strip digi.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StsDigi {
    /// Module address.
    pub address: u32,
    /// Strip channel, `0..2 * n_channels_per_side`.
    pub channel: u16,
    /// ADC value.
    pub charge: u16,
    /// Time in ns.
    pub time: f64,
}

impl StsDigi {
    /// Creates a digi.
    #[must_use]
    pub fn new(address: u32, channel: u16, time: f64, charge: u16) -> Self {
        Self {
            address,
            channel,
            charge,
            time,
        }
    }
}

/// MUCH pad digi.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MuchDigi {
    pub address: u32,
    pub charge: u16,
    pub time: f64,
}

/// TRD (1D) digi.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrdDigi {
    pub address: u32,
    pub charge: f32,
    pub time: f64,
}

/// TRD (2D) digi.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Trd2dDigi {
    pub address: u32,
    pub charge: f32,
    pub time: f64,
}

/// TOF digi.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TofDigi {
    pub address: u32,
    /// Time over threshold.
    pub tot: f32,
    pub time: f64,
}

/// Beam monitor digi.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BmonDigi {
    pub address: u32,
    pub charge: f32,
    pub time: f64,
}

/// RICH digi.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RichDigi {
    pub address: u32,
    /// Time over threshold.
    pub tot: f32,
    pub time: f64,
}

/// FSD digi.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FsdDigi {
    pub address: u32,
    pub charge: f32,
    pub time: f64,
}

macro_rules! impl_system_digi {
    ($ty:ty, $system:ident, $field:ident) => {
        impl Timed for $ty {
            #[inline]
            fn time(&self) -> f64 {
                self.time
            }
        }

        impl Digi for $ty {
            #[inline]
            fn address(&self) -> u32 {
                self.address
            }
        }

        impl SystemDigi for $ty {
            const SYSTEM: DetectorSystem = DetectorSystem::$system;

            fn column(data: &DigiData) -> &Vec<Self> {
                &data.$field
            }

            fn column_mut(data: &mut DigiData) -> &mut Vec<Self> {
                &mut data.$field
            }
        }
    };
}

impl_system_digi!(StsDigi, Sts, sts);
impl_system_digi!(MuchDigi, Much, much);
impl_system_digi!(TrdDigi, Trd, trd);
impl_system_digi!(Trd2dDigi, Trd2d, trd2d);
impl_system_digi!(TofDigi, Tof, tof);
impl_system_digi!(BmonDigi, Bmon, bmon);
impl_system_digi!(RichDigi, Rich, rich);
impl_system_digi!(FsdDigi, Fsd, fsd);

/// Digis of all systems for one time-slice or one event.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DigiData {
    pub sts: Vec<StsDigi>,
    pub much: Vec<MuchDigi>,
    pub trd: Vec<TrdDigi>,
    pub trd2d: Vec<Trd2dDigi>,
    pub tof: Vec<TofDigi>,
    pub bmon: Vec<BmonDigi>,
    pub rich: Vec<RichDigi>,
    pub fsd: Vec<FsdDigi>,
}

impl DigiData {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of digis of `system`.
    #[must_use]
    pub fn len(&self, system: DetectorSystem) -> usize {
        struct Len<'a>(&'a DigiData);
        impl SystemVisitor for Len<'_> {
            type Output = usize;
            fn visit<D: SystemDigi>(&mut self) -> usize {
                D::column(self.0).len()
            }
        }
        system.visit(&mut Len(self))
    }

    /// Number of digis over all systems.
    #[must_use]
    pub fn total_len(&self) -> usize {
        DetectorSystem::ALL.iter().map(|&s| self.len(s)).sum()
    }

    /// True if no system has any digi.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    /// Times of the digis of `system`, in storage order.
    #[must_use]
    pub fn times(&self, system: DetectorSystem) -> Vec<f64> {
        struct Times<'a>(&'a DigiData);
        impl SystemVisitor for Times<'_> {
            type Output = Vec<f64>;
            fn visit<D: SystemDigi>(&mut self) -> Vec<f64> {
                D::column(self.0).iter().map(Timed::time).collect()
            }
        }
        system.visit(&mut Times(self))
    }

    /// Addresses of the digis of `system`, in storage order.
    #[must_use]
    pub fn addresses(&self, system: DetectorSystem) -> Vec<u32> {
        struct Addresses<'a>(&'a DigiData);
        impl SystemVisitor for Addresses<'_> {
            type Output = Vec<u32>;
            fn visit<D: SystemDigi>(&mut self) -> Vec<u32> {
                D::column(self.0).iter().map(Digi::address).collect()
            }
        }
        system.visit(&mut Addresses(self))
    }

    /// Checks that the digis of `system` are sorted by time.
    ///
    /// # Errors
    /// Returns [`Error::NotSorted`] naming the first out-of-order digi.
    pub fn check_sorted(&self, system: DetectorSystem) -> Result<()> {
        struct Check<'a>(&'a DigiData);
        impl SystemVisitor for Check<'_> {
            type Output = Result<()>;
            fn visit<D: SystemDigi>(&mut self) -> Result<()> {
                check_time_sorted(D::column(self.0), &format!("{} digis", D::SYSTEM))
            }
        }
        system.visit(&mut Check(self))
    }

    /// Stable-sorts the digis of every system by time.
    pub fn sort_by_time(&mut self) {
        struct Sort<'a>(&'a mut DigiData);
        impl SystemVisitor for Sort<'_> {
            type Output = ();
            fn visit<D: SystemDigi>(&mut self) {
                D::column_mut(self.0).sort_by(|a, b| a.time().total_cmp(&b.time()));
            }
        }
        for system in DetectorSystem::ALL {
            system.visit(&mut Sort(self));
        }
    }

    /// Removes all digis, keeping allocations.
    pub fn clear(&mut self) {
        struct Clear<'a>(&'a mut DigiData);
        impl SystemVisitor for Clear<'_> {
            type Output = ();
            fn visit<D: SystemDigi>(&mut self) {
                D::column_mut(self.0).clear();
            }
        }
        for system in DetectorSystem::ALL {
            system.visit(&mut Clear(self));
        }
    }
}

/// Index of the first element whose time is not at or above its
/// predecessor's. A NaN time on either side counts as out of order.
#[allow(clippy::neg_cmp_op_on_partial_ord)]
pub fn first_unsorted<T: Timed>(items: &[T]) -> Option<usize> {
    items
        .windows(2)
        .position(|w| !(w[0].time() <= w[1].time()))
        .map(|i| i + 1)
}

/// Checks that `items` are non-decreasing in time.
///
/// # Errors
/// Returns [`Error::NotSorted`] with `what` and the offending index.
pub fn check_time_sorted<T: Timed>(items: &[T], what: &str) -> Result<()> {
    match first_unsorted(items) {
        Some(index) => Err(Error::NotSorted {
            what: what.to_string(),
            index,
        }),
        None => Ok(()),
    }
}
