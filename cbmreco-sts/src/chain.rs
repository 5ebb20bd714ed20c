//! The STS hit finder chain.
//!
//! One call turns a time-slice of raw STS digis into time-sorted hit
//! streams:
//!
//! 1. bucket digis by module side (count, then scatter),
//! 2. size the working buffers (dynamic) or check them against the
//!    configured bounds (static),
//! 3. find clusters on every side,
//! 4. match front and back clusters of every module into hits,
//! 5. flatten the per-module hits, split large modules into streams and
//!    sort every stream by time.
//!
//! All buffers live in an arena owned by the chain and are reused across
//! calls. The returned hits borrow from it, so they stay valid until the
//! next call.

use crate::arena::BoundedBucket;
use crate::cluster::{self, Cluster, ClusterCalculator, SideWork, NO_DIGI};
use crate::device::DeviceContext;
use crate::digi_map::DigiMap;
use crate::error::{Error, Result};
use crate::hit::{Hit, HitMatcher, MatchCuts, SensorCache};
use crate::monitor::HitfinderMon;
use crate::params::{AllocationMode, HitfinderChainPars, MemoryPars};
use crate::{streams, verify};
use cbmreco_core::{split_by_offsets_mut, PartitionedSlice, PartitionedVec, PodVec, StsDigi};
use log::{debug, error, log_enabled, warn, Level};
use rayon::prelude::*;

/// Lifecycle of a [`HitfinderChain`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainState {
    /// No parameters set.
    Unconfigured,
    /// Parameters set, working buffers not yet allocated.
    Configured,
    /// Working buffers allocated.
    Ready,
}

/// Output of one hit finder call.
#[derive(Debug)]
pub struct HitfinderResult<'a> {
    /// Hits, one partition per stream, time-sorted within each partition.
    pub hits: PartitionedSlice<'a, Hit>,
    /// Clusters per module side (fronts first, then backs), if requested.
    pub clusters: Option<PartitionedVec<Cluster>>,
    /// Counters of this call.
    pub monitor: HitfinderMon,
}

/// Working buffers reused across calls.
#[derive(Debug, Default)]
struct Arena {
    allocated: bool,
    digis: PodVec<StsDigi>,
    digi_offsets: Vec<usize>,
    next: PodVec<u32>,
    has_previous: PodVec<bool>,
    channel_offsets: PodVec<u32>,
    clusters: Vec<BoundedBucket<Cluster>>,
    max_time_error: Vec<f64>,
    hits: Vec<BoundedBucket<Hit>>,
    hits_flat: PodVec<Hit>,
    stream_offsets: Vec<usize>,
    stream_addresses: Vec<u32>,
    max_clusters_per_module: usize,
    hits_allocated_per_module: usize,
}

/// Buffer sizes for one allocation.
#[derive(Clone, Copy, Debug)]
struct Extent {
    n_modules: usize,
    n_channels: usize,
    n_digis: usize,
    max_digis_per_module: usize,
}

impl Arena {
    /// Sizes every buffer for `extent`. With `exact`, storage past the
    /// requested size is released; otherwise buffers only grow.
    fn allocate(&mut self, extent: Extent, memory: &MemoryPars, exact: bool) {
        let n_sides = 2 * extent.n_modules;
        let n_offsets = n_sides * (extent.n_channels + 1);
        self.max_clusters_per_module = memory.max_clusters_per_module(extent.max_digis_per_module);
        self.hits_allocated_per_module = memory.n_hits_upper_bound(extent.max_digis_per_module);

        if exact {
            self.digis.resize_exact(extent.n_digis);
            self.next.resize_exact(extent.n_digis);
            self.has_previous.resize_exact(extent.n_digis);
            self.channel_offsets.resize_exact(n_offsets);
        } else {
            self.digis.reserve_initialized(extent.n_digis);
            self.next.reserve_initialized(extent.n_digis);
            self.has_previous.reserve_initialized(extent.n_digis);
            self.channel_offsets.reserve_initialized(n_offsets);
            self.hits_flat
                .reserve_initialized(extent.n_modules * self.hits_allocated_per_module);
        }

        self.clusters.resize_with(n_sides, BoundedBucket::default);
        for bucket in &mut self.clusters {
            bucket.clear();
            bucket.set_capacity(self.max_clusters_per_module);
        }
        self.max_time_error.resize(n_sides, 0.0);
        self.hits.resize_with(extent.n_modules, BoundedBucket::default);
        for bucket in &mut self.hits {
            bucket.clear();
            bucket.set_capacity(self.hits_allocated_per_module);
        }
        self.allocated = true;
    }
}

/// Everything derived from one parameter set.
#[derive(Debug)]
struct Configured {
    pars: HitfinderChainPars,
    mode: AllocationMode,
    device: DeviceContext,
    digi_map: DigiMap,
    module_addresses: Vec<u32>,
    sensors: Vec<SensorCache>,
    calc: ClusterCalculator,
    cuts: MatchCuts,
    arena: Arena,
}

/// STS cluster and hit finder.
///
/// ```ignore
/// let mut chain = HitfinderChain::new();
/// chain.set_parameters(pars)?;
/// let result = chain.run(&digis, false)?;
/// for (hits, address) in result.hits.iter() { /* ... */ }
/// ```
#[derive(Debug, Default)]
pub struct HitfinderChain {
    configured: Option<Configured>,
}

impl HitfinderChain {
    /// Creates an unconfigured chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChainState {
        match &self.configured {
            None => ChainState::Unconfigured,
            Some(c) if c.arena.allocated => ChainState::Ready,
            Some(_) => ChainState::Configured,
        }
    }

    /// Parameters of the current configuration.
    #[must_use]
    pub fn parameters(&self) -> Option<&HitfinderChainPars> {
        self.configured.as_ref().map(|c| &c.pars)
    }

    /// Allocation mode after resolving [`AllocationMode::Auto`].
    #[must_use]
    pub fn allocation_mode(&self) -> Option<AllocationMode> {
        self.configured.as_ref().map(|c| c.mode)
    }

    /// Configures the chain. A previous configuration is finalized first.
    ///
    /// In static mode every buffer is allocated here from the configured
    /// bounds; in dynamic mode allocation happens per call.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameters`] for an inconsistent setup and
    /// [`Error::DeviceError`] if the worker pool cannot be started.
    pub fn set_parameters(&mut self, pars: HitfinderChainPars) -> Result<()> {
        pars.validate()?;
        self.finalize();

        let mode = pars.memory.resolve_mode();
        let device = DeviceContext::new(pars.backend.clone())?;
        let n_channels = pars.setup.n_channels;
        let module_addresses: Vec<u32> = pars.setup.modules.iter().map(|m| m.address).collect();
        let digi_map = DigiMap::new(&module_addresses, n_channels)?;
        let sensors = pars
            .setup
            .modules
            .iter()
            .map(|m| SensorCache::new(m, n_channels))
            .collect();
        let calc = ClusterCalculator::new(&pars.setup, &pars.reco);
        let cuts = MatchCuts::new(&pars.reco);

        let mut arena = Arena::default();
        if mode == AllocationMode::Static {
            let extent = Extent {
                n_modules: module_addresses.len(),
                n_channels: usize::from(n_channels),
                n_digis: pars.memory.max_n_digis_per_ts,
                max_digis_per_module: pars.memory.max_n_digis_per_module,
            };
            arena.allocate(extent, &pars.memory, false);
        }

        debug!(
            "STS hitfinder configured: {} modules, {} channels per side, backend {}, {:?} allocation",
            module_addresses.len(),
            n_channels,
            device.backend().name(),
            mode
        );
        self.configured = Some(Configured {
            pars,
            mode,
            device,
            digi_map,
            module_addresses,
            sensors,
            calc,
            cuts,
            arena,
        });
        Ok(())
    }

    /// Runs the chain on one time-slice of digis.
    ///
    /// Digis with an unknown module address or an out-of-range channel are
    /// dropped and counted. Bucket overflows lose clusters or hits but do
    /// not fail the call; they show up in the monitor.
    ///
    /// # Errors
    /// Returns [`Error::ParametersNotSet`] before [`set_parameters`],
    /// [`Error::CapacityExceeded`] in static mode if the input exceeds the
    /// configured bounds, and [`Error::VerificationFailed`] if trace-level
    /// verification finds an inconsistency.
    ///
    /// [`set_parameters`]: Self::set_parameters
    pub fn run(&mut self, digis: &[StsDigi], store_clusters: bool) -> Result<HitfinderResult<'_>> {
        let configured = self.configured.as_mut().ok_or(Error::ParametersNotSet)?;
        configured.process(digis, store_clusters)
    }

    /// Releases every buffer and the worker pool.
    pub fn finalize(&mut self) {
        if self.configured.take().is_some() {
            debug!("STS hitfinder finalized");
        }
    }
}

impl Configured {
    #[allow(clippy::too_many_lines)]
    fn process(&mut self, input: &[StsDigi], store_clusters: bool) -> Result<HitfinderResult<'_>> {
        let n_modules = self.digi_map.n_modules();
        let n_sides = 2 * n_modules;
        let n_channels = self.pars.setup.n_channels;
        let side_stride = usize::from(n_channels) + 1;
        let memory = &self.pars.memory;
        let device = &self.device;
        let map = &self.digi_map;

        // Bucket digis by module side.
        let n_workers = device.n_workers();
        let counts = device.install(|| map.count(input, n_workers));
        let n_digis = counts.n_assigned();
        let max_digis_per_module = counts.max_count();
        if counts.n_dropped() > 0 {
            warn!(
                "STS hitfinder: dropped {} of {} digis with unknown address or channel",
                counts.n_dropped(),
                input.len()
            );
        }

        match self.mode {
            AllocationMode::Static => {
                if max_digis_per_module > memory.max_n_digis_per_module {
                    return Err(Error::CapacityExceeded {
                        what: "digis per module",
                        observed: max_digis_per_module,
                        bound: memory.max_n_digis_per_module,
                    });
                }
                if n_digis > memory.max_n_digis_per_ts {
                    return Err(Error::CapacityExceeded {
                        what: "digis per time-slice",
                        observed: n_digis,
                        bound: memory.max_n_digis_per_ts,
                    });
                }
            }
            _ => {
                let extent = Extent {
                    n_modules,
                    n_channels: usize::from(n_channels),
                    n_digis,
                    max_digis_per_module,
                };
                self.arena.allocate(extent, memory, true);
            }
        }
        let arena = &mut self.arena;

        arena.digis.resize(n_digis);
        arena.digi_offsets = counts.offsets();
        {
            let out = &mut *arena.digis;
            let offsets = &arena.digi_offsets;
            device.install(|| map.flatten(input, &counts, offsets, out))?;
        }

        let mut max_hits = memory.n_hits_upper_bound(max_digis_per_module);
        if max_hits > arena.hits_allocated_per_module {
            error!(
                "STS hitfinder: hit bound {} exceeds allocated {} per module, clamping",
                max_hits, arena.hits_allocated_per_module
            );
            max_hits = arena.hits_allocated_per_module;
        }
        let max_clusters = memory
            .max_clusters_per_module(max_digis_per_module)
            .min(arena.max_clusters_per_module);

        for bucket in &mut arena.clusters {
            bucket.clear();
            bucket.set_capacity(max_clusters);
        }
        for bucket in &mut arena.hits {
            bucket.clear();
            bucket.set_capacity(max_hits);
        }
        arena.max_time_error.fill(0.0);
        arena.next.resize(n_digis);
        arena.next.fill(NO_DIGI);
        arena.has_previous.resize(n_digis);
        arena.has_previous.fill(false);
        arena.channel_offsets.resize(n_sides * side_stride);

        // Clusters.
        {
            let digi_parts = split_by_offsets_mut(&mut arena.digis, &arena.digi_offsets)?;
            let next_parts = split_by_offsets_mut(&mut arena.next, &arena.digi_offsets)?;
            let prev_parts = split_by_offsets_mut(&mut arena.has_previous, &arena.digi_offsets)?;
            let sides: Vec<SideWork<'_>> = digi_parts
                .into_iter()
                .zip(next_parts)
                .zip(prev_parts)
                .zip(arena.channel_offsets.chunks_mut(side_stride))
                .zip(arena.clusters.iter_mut())
                .zip(arena.max_time_error.iter_mut())
                .map(
                    |(((((digis, next), has_previous), channel_offsets), clusters), max_time_error)| SideWork {
                        digis,
                        next,
                        has_previous,
                        channel_offsets,
                        clusters,
                        max_time_error,
                    },
                )
                .collect();
            let calc = &self.calc;
            let kernel = self.pars.reco.cluster_kernel;
            device.install(move || cluster::find_clusters(sides, calc, kernel));
        }

        if log_enabled!(Level::Trace) {
            verify::check_digi_offsets(&arena.digi_offsets, n_digis)?;
            for s in 0..n_sides {
                let side = &arena.digis[arena.digi_offsets[s]..arena.digi_offsets[s + 1]];
                let offsets = &arena.channel_offsets[s * side_stride..(s + 1) * side_stride];
                verify::check_digis_sorted(side, n_channels)?;
                verify::check_channel_offsets(side, offsets)?;
                verify::check_clusters(arena.clusters[s].as_slice())?;
            }
        }

        // Hits.
        {
            let clusters = &arena.clusters;
            let max_time_error = &arena.max_time_error;
            let sensors = &self.sensors;
            let cuts = &self.cuts;
            let hits = &mut arena.hits;
            device.install(|| {
                hits.par_iter_mut().enumerate().for_each(|(m, bucket)| {
                    let matcher = HitMatcher {
                        sensor: &sensors[m],
                        cuts,
                    };
                    matcher.find_hits(
                        clusters[m].as_slice(),
                        clusters[m + n_modules].as_slice(),
                        max_time_error[m],
                        max_time_error[m + n_modules],
                        bucket,
                    );
                });
            });
        }

        // Streams.
        let exact = self.mode == AllocationMode::Dynamic;
        let module_offsets = {
            let buckets = &arena.hits;
            let flat = &mut arena.hits_flat;
            device.install(|| streams::flatten_hits(buckets, max_hits, flat, exact))?
        };
        let (stream_offsets, stream_addresses) =
            streams::split_into_streams(&module_offsets, &self.module_addresses, self.pars.reco.n_hit_streams);
        arena.stream_offsets = stream_offsets;
        arena.stream_addresses = stream_addresses;
        {
            let flat = &mut *arena.hits_flat;
            let offsets = &arena.stream_offsets;
            device.install(|| streams::sort_partitions(flat, offsets))?;
        }

        let hits = PartitionedSlice::new(&arena.hits_flat, &arena.stream_offsets, &arena.stream_addresses)?;
        if log_enabled!(Level::Trace) {
            verify::check_hits_sorted(hits)?;
        }

        let n_cluster_overflow: usize = arena.clusters.iter().map(BoundedBucket::overflow).sum();
        let n_hit_overflow: usize = arena.hits.iter().map(BoundedBucket::overflow).sum();
        if n_cluster_overflow > 0 {
            error!(
                "STS hitfinder: cluster bucket overflow, {n_cluster_overflow} clusters lost (capacity {max_clusters} per side)"
            );
        }
        if n_hit_overflow > 0 {
            error!("STS hitfinder: hit bucket overflow, {n_hit_overflow} hits lost (capacity {max_hits} per module)");
        }

        let n_clusters_per_side: Vec<usize> = arena.clusters.iter().map(BoundedBucket::len).collect();
        let monitor = HitfinderMon {
            n_digis: input.len(),
            n_digis_dropped: counts.n_dropped(),
            n_clusters_total: n_clusters_per_side.iter().sum(),
            n_hits_total: hits.n_elements(),
            n_cluster_bucket_overflow: n_cluster_overflow,
            n_hit_bucket_overflow: n_hit_overflow,
            cluster_bucket_capacity: max_clusters,
            hit_bucket_capacity: max_hits,
            n_hits_per_module: module_offsets.windows(2).map(|w| w[1] - w[0]).collect(),
            n_streams: hits.n_partitions(),
            n_clusters_per_side,
        };
        debug!("STS hitfinder: {monitor}");

        let clusters = if store_clusters {
            let data: Vec<Cluster> = arena
                .clusters
                .iter()
                .flat_map(|b| b.as_slice().iter().copied())
                .collect();
            let addresses: Vec<u32> = self
                .module_addresses
                .iter()
                .chain(&self.module_addresses)
                .copied()
                .collect();
            Some(PartitionedVec::from_sizes(data, &monitor.n_clusters_per_side, &addresses)?)
        } else {
            None
        };

        Ok(HitfinderResult {
            hits,
            clusters,
            monitor,
        })
    }
}
