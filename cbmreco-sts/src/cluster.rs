//! Cluster finding on one module side.
//!
//! Digis of a side are sorted by `(channel, time)`. A digi on channel `c`
//! is connected to the first digi on channel `c + 1` within the digi time
//! cut, unless another digi already claimed it. Every chain of connected
//! digis is one cluster. Its position is estimated with the head-tail
//! method, using the Landau width table for the charge uncertainty.
//!
//! Two decompositions produce identical results:
//! - [`ClusterKernel::SingleStep`]: one task per side runs every step.
//! - [`ClusterKernel::MultiStage`]: channel offsets, per-digi connection
//!   candidates, claim resolution and cluster assembly run as separate
//!   parallel passes.

#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]

use crate::arena::BoundedBucket;
use crate::params::{Asic, ClusterKernel, HitfinderPars, LandauTable, RecoParams};
use cbmreco_core::{StsDigi, Timed};
use rayon::prelude::*;

/// No connected digi.
pub(crate) const NO_DIGI: u32 = u32::MAX;

/// A cluster of adjacent strips on one module side.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Cluster {
    /// Mean digi time, ns.
    pub time: f64,
    /// Time error, ns.
    pub time_error: f32,
    /// Position in channel units, side-local.
    pub position: f32,
    /// Position error in channel units.
    pub position_error: f32,
    /// Total charge, electrons.
    pub charge: f32,
    /// Number of digis.
    pub size: u32,
    /// First channel.
    pub first_channel: u16,
    /// Last channel.
    pub last_channel: u16,
}

impl Timed for Cluster {
    fn time(&self) -> f64 {
        self.time
    }
}

/// Mutable working set of one module side.
pub(crate) struct SideWork<'a> {
    pub digis: &'a mut [StsDigi],
    pub next: &'a mut [u32],
    pub has_previous: &'a mut [bool],
    pub channel_offsets: &'a mut [u32],
    pub clusters: &'a mut BoundedBucket<Cluster>,
    pub max_time_error: &'a mut f64,
}

/// Read-only constants for cluster finding.
#[derive(Clone, Debug)]
pub(crate) struct ClusterCalculator {
    asic: Asic,
    landau: LandauTable,
    delta_t: f64,
    noise_sq: f64,
    digit_sq: f64,
}

impl ClusterCalculator {
    pub fn new(setup: &HitfinderPars, reco: &RecoParams) -> Self {
        let asic = setup.asic.clone();
        let charge_per_adc = asic.charge_per_adc();
        Self {
            delta_t: reco.digi_time_cut(asic.time_resolution),
            noise_sq: asic.noise * asic.noise,
            digit_sq: charge_per_adc * charge_per_adc / 12.0,
            asic,
            landau: setup.landau.clone(),
        }
    }

    /// Charge variance of one digi.
    fn charge_variance(&self, charge: f64) -> f64 {
        let width = self.landau.width(charge);
        width * width + self.noise_sq + self.digit_sq
    }

    /// Builds the cluster starting at `start` by following `next`.
    pub fn make_cluster(&self, digis: &[StsDigi], next: &[u32], start: usize) -> Cluster {
        let Some(second) = follow(next, start) else {
            return self.single(&digis[start]);
        };
        if follow(next, second).is_none() {
            return self.pair(&digis[start], &digis[second]);
        }
        self.multi(digis, next, start)
    }

    fn single(&self, digi: &StsDigi) -> Cluster {
        Cluster {
            time: digi.time,
            time_error: self.asic.time_resolution as f32,
            position: f32::from(digi.channel),
            position_error: (1.0 / 24f64.sqrt()) as f32,
            charge: self.asic.adc_to_charge(digi.charge) as f32,
            size: 1,
            first_channel: digi.channel,
            last_channel: digi.channel,
        }
    }

    fn pair(&self, d1: &StsDigi, d2: &StsDigi) -> Cluster {
        let q1 = self.asic.adc_to_charge(d1.charge);
        let q2 = self.asic.adc_to_charge(d2.charge);
        let eq1_sq = self.charge_variance(q1);
        let eq2_sq = self.charge_variance(q2);

        let x = f64::from(d1.channel) + 0.5 + (q2 - q1) / 3.0 / q1.max(q2);
        let (ex0, ex1, ex2) = if q1 < q2 {
            (
                (q2 - q1) * (q2 - q1) / (q2 * q2) / 72.0,
                eq1_sq / (q2 * q2) / 9.0,
                eq2_sq * q1 * q1 / q2.powi(4) / 9.0,
            )
        } else {
            (
                (q2 - q1) * (q2 - q1) / (q1 * q1) / 72.0,
                eq1_sq * q2 * q2 / q1.powi(4) / 9.0,
                eq2_sq / (q1 * q1) / 9.0,
            )
        };

        Cluster {
            time: 0.5 * (d1.time + d2.time),
            time_error: (self.asic.time_resolution * std::f64::consts::FRAC_1_SQRT_2) as f32,
            position: x as f32,
            position_error: (ex0 + ex1 + ex2).sqrt() as f32,
            charge: (q1 + q2) as f32,
            size: 2,
            first_channel: d1.channel,
            last_channel: d2.channel,
        }
    }

    fn multi(&self, digis: &[StsDigi], next: &[u32], start: usize) -> Cluster {
        let (mut q_f, mut eq_f, mut chan_f) = (0.0, 0.0, 0u16);
        let (mut q_l, mut eq_l, mut chan_l) = (0.0, 0.0, 0u16);
        let (mut q_m, mut eq_m) = (0.0, 0.0);
        let (mut t_sum, mut t_resol_sum, mut q_sum, mut x_sum) = (0.0, 0.0, 0.0, 0.0);

        let mut idx = Some(start);
        while let Some(i) = idx {
            let digi = &digis[i];
            let q = self.asic.adc_to_charge(digi.charge);
            let eq = self.charge_variance(q);
            t_sum += digi.time;
            t_resol_sum += self.asic.time_resolution;
            q_sum += q;
            x_sum += q * f64::from(digi.channel);

            idx = follow(next, i);
            if i == start {
                (q_f, eq_f, chan_f) = (q, eq, digi.channel);
            } else if idx.is_none() {
                (q_l, eq_l, chan_l) = (q, eq, digi.channel);
            } else {
                q_m += q;
                eq_m += eq;
            }
        }

        let n = f64::from(chan_l - chan_f + 1);
        q_m /= n - 2.0;
        eq_m /= n - 2.0;

        let (first, last) = (f64::from(chan_f), f64::from(chan_l));
        let mut x = 0.5 * (first + last + (q_l - q_f) / q_m);
        let ex_f = eq_f / (q_m * q_m) / 4.0;
        let ex_m = eq_m * (q_l - q_f) * (q_l - q_f) / q_m.powi(4) / 4.0;
        let ex_l = eq_l / (q_m * q_m) / 4.0;
        if x < first || x > last {
            x = x_sum / q_sum;
        }

        Cluster {
            time: t_sum / n,
            time_error: ((t_resol_sum / n) / n.sqrt()) as f32,
            position: x as f32,
            position_error: (ex_f + ex_m + ex_l).sqrt() as f32,
            charge: q_sum as f32,
            size: u32::from(chan_l - chan_f) + 1,
            first_channel: chan_f,
            last_channel: chan_l,
        }
    }
}

#[inline]
fn follow(next: &[u32], i: usize) -> Option<usize> {
    match next[i] {
        NO_DIGI => None,
        j => Some(j as usize),
    }
}

/// Sorts a side's digis by channel, then time.
fn sort_digis(digis: &mut [StsDigi]) {
    digis.sort_by(|a, b| a.channel.cmp(&b.channel).then(a.time.total_cmp(&b.time)));
}

/// Writes the index of the first digi of every channel; the last entry is
/// the number of digis.
pub(crate) fn channel_offsets(digis: &[StsDigi], offsets: &mut [u32]) {
    let mut d = 0usize;
    for (c, off) in offsets.iter_mut().enumerate() {
        while d < digis.len() && usize::from(digis[d].channel) < c {
            d += 1;
        }
        *off = d as u32;
    }
}

/// Connection candidate of digi `i`: the first digi on the next channel
/// not earlier than `t_i - delta_t`, if it is within `delta_t`.
fn next_candidate(digis: &[StsDigi], offsets: &[u32], delta_t: f64, i: usize) -> u32 {
    let digi = &digis[i];
    let c = usize::from(digi.channel);
    if c + 2 >= offsets.len() {
        return NO_DIGI;
    }
    let (lo, hi) = (offsets[c + 1] as usize, offsets[c + 2] as usize);
    let neighbours = &digis[lo..hi];
    let first = neighbours.partition_point(|n| digi.time - n.time > delta_t);
    match neighbours.get(first) {
        Some(n) if (n.time - digi.time).abs() <= delta_t => (lo + first) as u32,
        _ => NO_DIGI,
    }
}

/// Applies candidates in digi order; a digi already claimed stays with its
/// first predecessor.
fn resolve_claims(next: &mut [u32], has_previous: &mut [bool]) {
    for i in 0..next.len() {
        let j = next[i];
        if j == NO_DIGI {
            continue;
        }
        let target = &mut has_previous[j as usize];
        if *target {
            next[i] = NO_DIGI;
        } else {
            *target = true;
        }
    }
}

fn store_clusters(side: &mut SideWork<'_>, clusters: impl Iterator<Item = Cluster>) {
    for cluster in clusters {
        side.clusters.push(cluster);
    }
    side.clusters
        .as_mut_slice()
        .sort_by(|a, b| a.time.total_cmp(&b.time));
    *side.max_time_error = side
        .clusters
        .as_slice()
        .iter()
        .map(|c| f64::from(c.time_error))
        .fold(0.0, f64::max);
}

fn find_single_step(side: &mut SideWork<'_>, calc: &ClusterCalculator) {
    sort_digis(side.digis);
    channel_offsets(side.digis, side.channel_offsets);
    for i in 0..side.digis.len() {
        side.next[i] = next_candidate(side.digis, side.channel_offsets, calc.delta_t, i);
    }
    resolve_claims(side.next, side.has_previous);

    let digis = &*side.digis;
    let next = &*side.next;
    let starts: Vec<usize> = (0..digis.len()).filter(|&i| !side.has_previous[i]).collect();
    let clusters: Vec<Cluster> = starts
        .into_iter()
        .map(|i| calc.make_cluster(digis, next, i))
        .collect();
    store_clusters(side, clusters.into_iter());
}

fn find_multi_stage(sides: &mut [SideWork<'_>], calc: &ClusterCalculator) {
    sides.par_iter_mut().for_each(|side| {
        sort_digis(side.digis);
        channel_offsets(side.digis, side.channel_offsets);
    });

    sides.par_iter_mut().for_each(|side| {
        let digis = &*side.digis;
        let offsets = &*side.channel_offsets;
        side.next
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, n)| *n = next_candidate(digis, offsets, calc.delta_t, i));
    });

    sides
        .par_iter_mut()
        .for_each(|side| resolve_claims(side.next, side.has_previous));

    sides.par_iter_mut().for_each(|side| {
        let digis = &*side.digis;
        let next = &*side.next;
        let has_previous = &*side.has_previous;
        let clusters: Vec<Cluster> = (0..digis.len())
            .into_par_iter()
            .filter(|&i| !has_previous[i])
            .map(|i| calc.make_cluster(digis, next, i))
            .collect();
        store_clusters(side, clusters.into_iter());
    });
}

/// Finds clusters on every side. `next` must be filled with [`NO_DIGI`]
/// and `has_previous` with `false`; buckets must be cleared.
pub(crate) fn find_clusters(mut sides: Vec<SideWork<'_>>, calc: &ClusterCalculator, kernel: ClusterKernel) {
    match kernel {
        ClusterKernel::SingleStep => sides
            .par_iter_mut()
            .for_each(|side| find_single_step(side, calc)),
        ClusterKernel::MultiStage => find_multi_stage(&mut sides, calc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address;
    use crate::params::ModulePars;
    use approx::assert_relative_eq;

    fn setup(n_channels: u16) -> HitfinderPars {
        HitfinderPars {
            n_channels,
            asic: Asic::default(),
            landau: LandauTable::default(),
            modules: vec![ModulePars::standard(address::module_address(0, 0, 0, 0))],
        }
    }

    struct Buffers {
        digis: Vec<StsDigi>,
        next: Vec<u32>,
        has_previous: Vec<bool>,
        offsets: Vec<u32>,
        clusters: BoundedBucket<Cluster>,
        max_terr: f64,
    }

    impl Buffers {
        fn new(digis: Vec<StsDigi>, n_channels: usize, capacity: usize) -> Self {
            let n = digis.len();
            Self {
                digis,
                next: vec![NO_DIGI; n],
                has_previous: vec![false; n],
                offsets: vec![0; n_channels + 1],
                clusters: BoundedBucket::new(capacity),
                max_terr: 0.0,
            }
        }

        fn work(&mut self) -> SideWork<'_> {
            SideWork {
                digis: &mut self.digis,
                next: &mut self.next,
                has_previous: &mut self.has_previous,
                channel_offsets: &mut self.offsets,
                clusters: &mut self.clusters,
                max_time_error: &mut self.max_terr,
            }
        }
    }

    fn digi(channel: u16, time: f64, adc: u16) -> StsDigi {
        StsDigi::new(address::module_address(0, 0, 0, 0), channel, time, adc)
    }

    fn run(digis: Vec<StsDigi>, kernel: ClusterKernel) -> Buffers {
        let pars = setup(16);
        let calc = ClusterCalculator::new(&pars, &RecoParams::default());
        let mut buf = Buffers::new(digis, 16, 100);
        find_clusters(vec![buf.work()], &calc, kernel);
        buf
    }

    #[test]
    fn test_channel_offsets() {
        let digis = vec![digi(1, 0.0, 0), digi(1, 5.0, 0), digi(3, 0.0, 0)];
        let mut offsets = vec![0u32; 5];
        channel_offsets(&digis, &mut offsets);
        assert_eq!(offsets, vec![0, 0, 2, 2, 3]);
    }

    #[test]
    fn test_single_and_separated_digis() {
        // Channels 2 and 4 are not adjacent; 7 and 8 are too far apart in time.
        let digis = vec![digi(4, 100.0, 10), digi(2, 100.0, 10), digi(7, 0.0, 5), digi(8, 500.0, 5)];
        let buf = run(digis, ClusterKernel::SingleStep);
        assert_eq!(buf.clusters.len(), 4);
        assert!(buf.clusters.as_slice().iter().all(|c| c.size == 1));
        let times: Vec<f64> = buf.clusters.as_slice().iter().map(|c| c.time).collect();
        assert_eq!(times, vec![0.0, 100.0, 100.0, 500.0]);
        let c = &buf.clusters.as_slice()[0];
        assert_relative_eq!(c.position, 7.0);
        assert_relative_eq!(f64::from(c.position_error), 1.0 / 24f64.sqrt(), epsilon = 1e-6);
        assert_relative_eq!(buf.max_terr, 5.0);
    }

    #[test]
    fn test_pair_with_equal_charge_is_centred() {
        let buf = run(vec![digi(5, 10.0, 12), digi(6, 12.0, 12)], ClusterKernel::SingleStep);
        assert_eq!(buf.clusters.len(), 1);
        let c = buf.clusters.as_slice()[0];
        assert_eq!(c.size, 2);
        assert_eq!((c.first_channel, c.last_channel), (5, 6));
        assert_relative_eq!(c.position, 5.5);
        assert_relative_eq!(c.time, 11.0);
        let q = Asic::default().adc_to_charge(12);
        assert_relative_eq!(f64::from(c.charge), 2.0 * q, epsilon = 1e-2);
    }

    #[test]
    fn test_pair_shifts_towards_larger_charge() {
        let buf = run(vec![digi(5, 10.0, 2), digi(6, 10.0, 20)], ClusterKernel::SingleStep);
        let c = buf.clusters.as_slice()[0];
        assert!(c.position > 5.5 && c.position < 5.84, "position {}", c.position);
    }

    #[test]
    fn test_multi_digi_cluster() {
        let digis = vec![digi(3, 0.0, 10), digi(4, 1.0, 20), digi(5, 2.0, 20), digi(6, 3.0, 10)];
        let buf = run(digis, ClusterKernel::SingleStep);
        assert_eq!(buf.clusters.len(), 1);
        let c = buf.clusters.as_slice()[0];
        assert_eq!(c.size, 4);
        // Symmetric charge: head-tail gives the midpoint.
        assert_relative_eq!(c.position, 4.5);
        assert_relative_eq!(c.time, 1.5);
        assert_relative_eq!(f64::from(c.time_error), 5.0 / 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_claimed_digi_is_not_shared() {
        // Both digis on channel 1 are within the window of the one on channel 2.
        let digis = vec![digi(1, 0.0, 5), digi(1, 3.0, 5), digi(2, 2.0, 5)];
        let buf = run(digis, ClusterKernel::SingleStep);
        assert_eq!(buf.clusters.len(), 2);
        let total: u32 = buf.clusters.as_slice().iter().map(|c| c.size).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_kernels_agree() {
        let mut digis = Vec::new();
        for i in 0..200u16 {
            let channel = (i * 7) % 16;
            digis.push(digi(channel, f64::from(i % 13) * 9.0, i % 31));
        }
        let a = run(digis.clone(), ClusterKernel::SingleStep);
        let b = run(digis, ClusterKernel::MultiStage);
        assert_eq!(a.clusters.as_slice(), b.clusters.as_slice());
        assert_eq!(a.next, b.next);
    }

    #[test]
    fn test_overflow_is_counted() {
        let pars = setup(16);
        let calc = ClusterCalculator::new(&pars, &RecoParams::default());
        let digis: Vec<StsDigi> = (0..8).map(|c| digi(c * 2, 0.0, 1)).collect();
        let mut buf = Buffers::new(digis, 16, 3);
        find_clusters(vec![buf.work()], &calc, ClusterKernel::SingleStep);
        assert_eq!(buf.clusters.len(), 3);
        assert_eq!(buf.clusters.overflow(), 5);
    }
}
