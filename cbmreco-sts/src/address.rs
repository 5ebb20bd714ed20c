//! STS hardware address layout.
//!
//! ```text
//! bits  0..4   system id (2 = STS)
//! bits  4..10  unit
//! bits 10..15  ladder
//! bit  15      half-ladder
//! bits 16..21  module
//! bits 21..    sensor / side, ignored for module lookup
//! ```
//!
//! Bits 4..21 form the 17-bit packed module address used as index into
//! the address lookup table.

/// System id of the STS in the low address bits.
pub const SYSTEM_ID: u32 = 2;

/// Width of the packed module address.
pub const PACKED_BITS: u32 = 17;

/// Number of distinct packed module addresses.
pub const PACKED_SIZE: usize = 1 << PACKED_BITS;

const SYSTEM_MASK: u32 = 0xF;
const UNIT_SHIFT: u32 = 4;
const UNIT_MASK: u32 = 0x3F;
const LADDER_SHIFT: u32 = 10;
const LADDER_MASK: u32 = 0x1F;
const HALF_LADDER_SHIFT: u32 = 15;
const MODULE_SHIFT: u32 = 16;
const MODULE_MASK: u32 = 0x1F;
const PACKED_MASK: u32 = (1 << PACKED_BITS) - 1;

/// Builds a module address from its element indices.
#[must_use]
pub fn module_address(unit: u32, ladder: u32, half_ladder: u32, module: u32) -> u32 {
    SYSTEM_ID
        | (unit & UNIT_MASK) << UNIT_SHIFT
        | (ladder & LADDER_MASK) << LADDER_SHIFT
        | (half_ladder & 1) << HALF_LADDER_SHIFT
        | (module & MODULE_MASK) << MODULE_SHIFT
}

/// Packed 17-bit module address.
#[inline]
#[must_use]
pub fn pack(address: u32) -> usize {
    ((address >> UNIT_SHIFT) & PACKED_MASK) as usize
}

/// True if the system id field is the STS.
#[inline]
#[must_use]
pub fn is_sts(address: u32) -> bool {
    address & SYSTEM_MASK == SYSTEM_ID
}

/// Unit (tracking station) of an address.
#[inline]
#[must_use]
pub fn unit(address: u32) -> u32 {
    (address >> UNIT_SHIFT) & UNIT_MASK
}

/// Ladder of an address.
#[inline]
#[must_use]
pub fn ladder(address: u32) -> u32 {
    (address >> LADDER_SHIFT) & LADDER_MASK
}

/// Module within the half-ladder.
#[inline]
#[must_use]
pub fn module(address: u32) -> u32 {
    (address >> MODULE_SHIFT) & MODULE_MASK
}
