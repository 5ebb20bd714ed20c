//! cbmreco-core: Shared containers and data types for CBM online reconstruction.
//!
//! This crate provides the foundational pieces used by the STS hit finder
//! and the event builder:
//!
//! - [`PartitionedVec`] / [`PartitionedSlice`] - flat buffers split into
//!   address-tagged partitions
//! - [`PodVec`] - reusable buffer for plain numeric records
//! - [`BucketCounts`] - two-pass, order-preserving parallel bucketing
//! - [`DigiData`] and the per-system digi types, dispatched through
//!   [`DetectorSystem::visit`]
//!

pub mod bucket;
pub mod digi;
pub mod error;
pub mod partitioned;
pub mod pod;

pub use bucket::BucketCounts;
pub use digi::{
    check_time_sorted, first_unsorted, BmonDigi, DetectorSystem, Digi, DigiData, FsdDigi,
    MuchDigi, RichDigi, StsDigi, SystemDigi, SystemVisitor, Timed, TofDigi, Trd2dDigi, TrdDigi,
};
pub use error::{Error, Result};
pub use partitioned::{split_by_offsets_mut, validate_structure, PartitionedSlice, PartitionedVec};
pub use pod::PodVec;
