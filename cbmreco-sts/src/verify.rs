//! Consistency checks of intermediate hit finder buffers.
//!
//! The chain runs these only when trace logging is enabled; they are also
//! used directly by the tests.

use crate::cluster::Cluster;
use crate::error::{Error, Result};
use crate::hit::Hit;
use cbmreco_core::{first_unsorted, PartitionedSlice, StsDigi};

fn fail(msg: String) -> Result<()> {
    Err(Error::VerificationFailed(msg))
}

/// Digi bucket offsets start at 0, never decrease and end at `n_digis`.
///
/// # Errors
/// Returns [`Error::VerificationFailed`] on the first violation.
pub fn check_digi_offsets(offsets: &[usize], n_digis: usize) -> Result<()> {
    match (offsets.first(), offsets.last()) {
        (Some(0), Some(&last)) if last == n_digis => {}
        _ => return fail(format!("digi offsets {offsets:?} do not span {n_digis} digis")),
    }
    if let Some(i) = offsets.windows(2).position(|w| w[1] < w[0]) {
        return fail(format!("digi offsets decrease at bucket {i}"));
    }
    Ok(())
}

/// Digis of one side are sorted by channel, then time, and all channels
/// are below `n_channels`.
///
/// # Errors
/// Returns [`Error::VerificationFailed`] on the first violation.
pub fn check_digis_sorted(digis: &[StsDigi], n_channels: u16) -> Result<()> {
    if let Some(d) = digis.iter().find(|d| d.channel >= n_channels) {
        return fail(format!("digi channel {} out of range", d.channel));
    }
    let unsorted = digis
        .windows(2)
        .position(|w| (w[1].channel, w[1].time) < (w[0].channel, w[0].time));
    if let Some(i) = unsorted {
        return fail(format!("digis not sorted by channel and time at index {}", i + 1));
    }
    Ok(())
}

/// `offsets[c]` is the first digi on channel `c` or later.
///
/// # Errors
/// Returns [`Error::VerificationFailed`] on the first violation.
pub fn check_channel_offsets(digis: &[StsDigi], offsets: &[u32]) -> Result<()> {
    for (c, w) in offsets.windows(2).enumerate() {
        let (lo, hi) = (w[0] as usize, w[1] as usize);
        if lo > hi || hi > digis.len() {
            return fail(format!("channel offsets out of order at channel {c}"));
        }
        if let Some(d) = digis[lo..hi].iter().find(|d| usize::from(d.channel) != c) {
            return fail(format!("digi on channel {} listed under channel {c}", d.channel));
        }
    }
    if offsets.last().map(|&o| o as usize) != Some(digis.len()) {
        return fail("channel offsets do not end at the digi count".into());
    }
    Ok(())
}

/// Clusters are time-sorted, have finite values, positive size and charge,
/// and a position within one channel of their channel range.
///
/// # Errors
/// Returns [`Error::VerificationFailed`] on the first violation.
pub fn check_clusters(clusters: &[Cluster]) -> Result<()> {
    for (i, c) in clusters.iter().enumerate() {
        let finite = c.time.is_finite()
            && c.time_error.is_finite()
            && c.position.is_finite()
            && c.position_error.is_finite()
            && c.charge.is_finite();
        if !finite || c.size == 0 || c.charge <= 0.0 || c.last_channel < c.first_channel {
            return fail(format!("cluster {i} is malformed: {c:?}"));
        }
        let (lo, hi) = (f32::from(c.first_channel) - 1.0, f32::from(c.last_channel) + 1.0);
        if c.position < lo || c.position > hi {
            return fail(format!("cluster {i} position {} outside [{lo}, {hi}]", c.position));
        }
    }
    if let Some(i) = first_unsorted(clusters) {
        return fail(format!("clusters not sorted by time at index {i}"));
    }
    Ok(())
}

/// Every hit partition is sorted by time.
///
/// # Errors
/// Returns [`Error::VerificationFailed`] on the first violation.
pub fn check_hits_sorted(hits: PartitionedSlice<'_, Hit>) -> Result<()> {
    for (p, (part, address)) in hits.iter().enumerate() {
        if let Some(i) = first_unsorted(part) {
            return fail(format!(
                "hits of partition {p} (module {address:#x}) not sorted at index {i}"
            ));
        }
    }
    Ok(())
}
