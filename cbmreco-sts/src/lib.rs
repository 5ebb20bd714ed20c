//! cbmreco-sts: Cluster and hit finding for the Silicon Tracking System.
//!
//! The chain takes one time-slice of raw STS digis and produces 3-D hits:
//! - **Bucketing** - digis grouped by module side in two parallel passes
//! - **Clustering** - chains of adjacent strips within a time cut
//! - **Matching** - front/back cluster crossings, including cross-connected
//!   strips
//! - **Streams** - hits split into time-sorted partitions per module
//!
//! Working memory is either sized once from configured bounds
//! ([`AllocationMode::Static`]) or on every call from the observed input
//! ([`AllocationMode::Dynamic`]).
//!
#![warn(missing_docs)]

pub mod address;
mod arena;
mod chain;
mod cluster;
mod device;
mod digi_map;
mod error;
mod hit;
mod monitor;
mod params;
mod streams;
pub mod verify;

pub use arena::BoundedBucket;
pub use chain::{ChainState, HitfinderChain, HitfinderResult};
pub use cluster::Cluster;
pub use device::{Backend, DeviceContext};
pub use digi_map::DigiMap;
pub use error::{Error, Result};
pub use hit::Hit;
pub use monitor::HitfinderMon;
pub use params::{
    AllocationMode, Asic, ClusterKernel, HitfinderChainPars, HitfinderPars, LandauTable,
    MemoryPars, ModulePars, ModuleTransform, RecoParams,
};
pub use streams::{split_into_streams, MIN_HITS_PER_STREAM};
