//! Bucketing of STS digis by module side.
//!
//! Bucket `m` holds the front side of module `m`, bucket `m + n_modules`
//! its back side. A digi is on the front side if its channel is below the
//! per-side channel count. Back side channels are renumbered to start at 0
//! so both sides share one channel space.

use crate::address;
use crate::error::{Error, Result};
use cbmreco_core::{BucketCounts, StsDigi};
use rayon::prelude::*;

const NO_MODULE: u16 = u16::MAX;

/// Address lookup table and bucketing rules for one setup.
#[derive(Clone, Debug)]
pub struct DigiMap {
    addr_to_index: Vec<u16>,
    n_modules: usize,
    n_channels: u16,
}

impl DigiMap {
    /// Builds the lookup table for `module_addresses` (in module index order).
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameters`] on duplicate or non-STS addresses.
    pub fn new(module_addresses: &[u32], n_channels: u16) -> Result<Self> {
        if module_addresses.len() >= usize::from(NO_MODULE) {
            return Err(Error::InvalidParameters(format!(
                "too many modules: {}",
                module_addresses.len()
            )));
        }
        let mut addr_to_index = vec![NO_MODULE; address::PACKED_SIZE];
        for (idx, &addr) in module_addresses.iter().enumerate() {
            if !address::is_sts(addr) {
                return Err(Error::InvalidParameters(format!(
                    "module address {addr:#x} is not an STS address"
                )));
            }
            let slot = &mut addr_to_index[address::pack(addr)];
            if *slot != NO_MODULE {
                return Err(Error::InvalidParameters(format!(
                    "duplicate module address {addr:#x}"
                )));
            }
            // Bounded by the length check above.
            *slot = u16::try_from(idx).unwrap_or(NO_MODULE);
        }
        Ok(Self {
            addr_to_index,
            n_modules: module_addresses.len(),
            n_channels,
        })
    }

    /// Number of modules.
    #[must_use]
    pub fn n_modules(&self) -> usize {
        self.n_modules
    }

    /// Number of buckets (two per module).
    #[must_use]
    pub fn n_buckets(&self) -> usize {
        2 * self.n_modules
    }

    /// Module index of `address`, if it is a configured module.
    #[must_use]
    pub fn module_index(&self, address: u32) -> Option<usize> {
        if !address::is_sts(address) {
            return None;
        }
        match self.addr_to_index[address::pack(address)] {
            NO_MODULE => None,
            idx => Some(usize::from(idx)),
        }
    }

    /// Bucket of `digi`, or `None` for unknown modules and invalid channels.
    #[inline]
    #[must_use]
    pub fn bucket_of(&self, digi: &StsDigi) -> Option<usize> {
        let module = self.module_index(digi.address)?;
        if digi.channel < self.n_channels {
            Some(module)
        } else if u32::from(digi.channel) < 2 * u32::from(self.n_channels) {
            Some(module + self.n_modules)
        } else {
            None
        }
    }

    /// First bucketing pass: per-worker counts.
    #[must_use]
    pub fn count(&self, digis: &[StsDigi], n_workers: usize) -> BucketCounts {
        BucketCounts::count(digis, self.n_buckets(), n_workers, |d| self.bucket_of(d))
    }

    /// Second pass: scatters `digis` into `out` and renumbers back side channels.
    ///
    /// `offsets` must be `counts.offsets()`.
    ///
    /// # Errors
    /// Propagates scatter precondition failures.
    pub fn flatten(
        &self,
        digis: &[StsDigi],
        counts: &BucketCounts,
        offsets: &[usize],
        out: &mut [StsDigi],
    ) -> Result<()> {
        counts.scatter(digis, |d| self.bucket_of(d), out)?;
        let back_start = offsets[self.n_modules];
        let n_channels = self.n_channels;
        out[back_start..].par_iter_mut().for_each(|d| {
            d.channel -= n_channels;
        });
        Ok(())
    }
}
