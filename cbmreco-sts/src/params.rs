//! Hit finder parameters.
//!
//! Geometry and calibration ([`HitfinderPars`]) are handed to the chain once
//! and stay read-only; [`RecoParams`] holds the cuts and [`MemoryPars`] the
//! allocation policy and its bounds.

#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use crate::address;
use crate::device::Backend;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Readout ASIC response, shared by all modules.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Asic {
    /// Number of ADC channels.
    pub n_adc: u32,
    /// Dynamic range in electrons.
    pub dynamic_range: f64,
    /// Threshold in electrons.
    pub threshold: f64,
    /// Time resolution in ns.
    pub time_resolution: f64,
    /// Channel dead time in ns.
    pub dead_time: f64,
    /// Equivalent noise charge in electrons.
    pub noise: f64,
}

impl Default for Asic {
    fn default() -> Self {
        Self {
            n_adc: 31,
            dynamic_range: 75_000.0,
            threshold: 3_000.0,
            time_resolution: 5.0,
            dead_time: 800.0,
            noise: 1_000.0,
        }
    }
}

impl Asic {
    /// Charge of one ADC unit in electrons.
    #[must_use]
    pub fn charge_per_adc(&self) -> f64 {
        self.dynamic_range / f64::from(self.n_adc)
    }

    /// Charge in electrons at the centre of an ADC bin.
    #[inline]
    #[must_use]
    pub fn adc_to_charge(&self, adc: u16) -> f64 {
        self.threshold + self.charge_per_adc() * (f64::from(adc) + 0.5)
    }
}

/// Landau distribution width as a function of charge, in equidistant steps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LandauTable {
    /// Charge step between entries, electrons.
    pub step_size: f64,
    /// Widths, entry `i` at charge `i * step_size`.
    pub values: Vec<f64>,
}

impl Default for LandauTable {
    fn default() -> Self {
        Self {
            step_size: 5_000.0,
            values: vec![
                850.0, 1_150.0, 1_430.0, 1_700.0, 1_960.0, 2_210.0, 2_460.0, 2_700.0, 2_940.0,
                3_170.0, 3_400.0, 3_630.0, 3_850.0, 4_070.0, 4_290.0, 4_510.0,
            ],
        }
    }
}

impl LandauTable {
    /// Width for `charge`, linearly interpolated and clamped at both ends.
    #[must_use]
    pub fn width(&self, charge: f64) -> f64 {
        let n = self.values.len();
        if n == 0 {
            return 0.0;
        }
        if charge <= self.step_size {
            return self.values[0];
        }
        if charge > self.step_size * (n - 1) as f64 {
            return self.values[n - 1];
        }
        let idx = (charge / self.step_size).ceil() as usize;
        let idx = idx.min(n - 1);
        let (lo, hi) = (self.values[idx - 1], self.values[idx]);
        let w_hi = (charge - (idx - 1) as f64 * self.step_size) / self.step_size;
        lo + (hi - lo) * w_hi
    }
}

/// Local-to-global rigid transform of a module.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModuleTransform {
    /// Row-major 3x3 rotation.
    pub rotation: [f64; 9],
    /// Translation in cm.
    pub translation: [f64; 3],
}

impl Default for ModuleTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl ModuleTransform {
    /// Identity transform.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            translation: [0.0; 3],
        }
    }

    /// Pure translation.
    #[must_use]
    pub fn translation(x: f64, y: f64, z: f64) -> Self {
        Self {
            translation: [x, y, z],
            ..Self::identity()
        }
    }

    /// Maps a local point to global coordinates.
    #[inline]
    #[must_use]
    pub fn apply(&self, local: [f64; 3]) -> [f64; 3] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            t[0] + r[0] * local[0] + r[1] * local[1] + r[2] * local[2],
            t[1] + r[3] * local[0] + r[4] * local[1] + r[5] * local[2],
            t[2] + r[6] * local[0] + r[7] * local[1] + r[8] * local[2],
        ]
    }
}

/// Geometry of one double-sided strip module.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModulePars {
    /// Module hardware address.
    pub address: u32,
    /// Strip length (sensor height), cm.
    pub dy: f64,
    /// Strip pitch, cm.
    pub pitch: f64,
    /// Front strip stereo angle, degrees.
    pub stereo_front: f64,
    /// Back strip stereo angle, degrees.
    pub stereo_back: f64,
    /// Front side Lorentz shift, cm.
    #[serde(default)]
    pub lorentz_front: f64,
    /// Back side Lorentz shift, cm.
    #[serde(default)]
    pub lorentz_back: f64,
    /// Local-to-global transform.
    #[serde(default)]
    pub transform: ModuleTransform,
}

impl ModulePars {
    /// A standard 6.2 cm module with 58 um pitch and 0 / 7.5 degree stereo angles.
    #[must_use]
    pub fn standard(address: u32) -> Self {
        Self {
            address,
            dy: 6.2,
            pitch: 0.0058,
            stereo_front: 0.0,
            stereo_back: 7.5,
            lorentz_front: 0.0,
            lorentz_back: 0.0,
            transform: ModuleTransform::identity(),
        }
    }

    /// Sets the transform.
    #[must_use]
    pub fn with_transform(mut self, transform: ModuleTransform) -> Self {
        self.transform = transform;
        self
    }
}

/// Static setup: channel count, ASIC, Landau table and module geometry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HitfinderPars {
    /// Channels per module side.
    pub n_channels: u16,
    /// ASIC response.
    #[serde(default)]
    pub asic: Asic,
    /// Landau width table.
    #[serde(default)]
    pub landau: LandauTable,
    /// Modules in lookup order.
    pub modules: Vec<ModulePars>,
}

impl HitfinderPars {
    /// Loads parameters from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or the parameters are invalid.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let pars: Self = serde_json::from_str(json)?;
        pars.validate()?;
        Ok(pars)
    }

    /// Number of modules.
    #[must_use]
    pub fn n_modules(&self) -> usize {
        self.modules.len()
    }

    /// Checks the parameters for structural problems.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameters`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidParameters(msg));
        if self.n_channels == 0 {
            return invalid("n_channels must be positive".into());
        }
        if u32::from(self.n_channels) * 2 > u32::from(u16::MAX) + 1 {
            return invalid(format!("n_channels {} overflows the channel range", self.n_channels));
        }
        if self.modules.is_empty() {
            return invalid("no modules configured".into());
        }
        if self.modules.len() >= usize::from(u16::MAX) {
            return invalid(format!("too many modules: {}", self.modules.len()));
        }
        if self.asic.n_adc == 0 || self.asic.dynamic_range <= 0.0 {
            return invalid("ASIC needs n_adc > 0 and a positive dynamic range".into());
        }
        if self.asic.time_resolution <= 0.0 {
            return invalid("ASIC time resolution must be positive".into());
        }
        if self.landau.step_size <= 0.0 || self.landau.values.is_empty() {
            return invalid("Landau table needs a positive step and at least one value".into());
        }
        let mut seen = HashSet::with_capacity(self.modules.len());
        for m in &self.modules {
            if !address::is_sts(m.address) {
                return invalid(format!("module address {:#x} is not an STS address", m.address));
            }
            if !seen.insert(address::pack(m.address)) {
                return invalid(format!("duplicate module address {:#x}", m.address));
            }
            if m.pitch <= 0.0 || m.dy <= 0.0 {
                return invalid(format!("module {:#x} needs positive pitch and dy", m.address));
            }
        }
        Ok(())
    }
}

/// Cluster finding decomposition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterKernel {
    /// One task per module side doing all steps.
    #[default]
    SingleStep,
    /// Separate passes for channel offsets, connectivity and assembly.
    MultiStage,
}

/// Cuts and processing switches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoParams {
    /// Absolute digi coincidence window, ns. Used if positive.
    pub time_cut_digi_abs: f64,
    /// Digi coincidence window in units of the combined time resolution.
    pub time_cut_digi_sig: f64,
    /// Absolute front/back cluster time cut, ns. Used if positive.
    pub time_cut_cluster_abs: f64,
    /// Front/back cluster time cut in units of the combined time error.
    pub time_cut_cluster_sig: f64,
    /// Maximum front/back charge difference, electrons.
    pub charge_correlation_delta: Option<f64>,
    /// Cluster finding decomposition.
    pub cluster_kernel: ClusterKernel,
    /// Upper limit on the number of output hit streams.
    pub n_hit_streams: usize,
}

impl Default for RecoParams {
    fn default() -> Self {
        Self {
            time_cut_digi_abs: -1.0,
            time_cut_digi_sig: 3.0,
            time_cut_cluster_abs: -1.0,
            time_cut_cluster_sig: 4.0,
            charge_correlation_delta: None,
            cluster_kernel: ClusterKernel::SingleStep,
            n_hit_streams: 100,
        }
    }
}

impl RecoParams {
    /// Sets an absolute digi coincidence window.
    #[must_use]
    pub fn with_time_cut_digi_abs(mut self, ns: f64) -> Self {
        self.time_cut_digi_abs = ns;
        self
    }

    /// Sets an absolute cluster time cut.
    #[must_use]
    pub fn with_time_cut_cluster_abs(mut self, ns: f64) -> Self {
        self.time_cut_cluster_abs = ns;
        self
    }

    /// Enables the front/back charge correlation cut.
    #[must_use]
    pub fn with_charge_correlation(mut self, delta: f64) -> Self {
        self.charge_correlation_delta = Some(delta);
        self
    }

    /// Selects the cluster finding decomposition.
    #[must_use]
    pub fn with_cluster_kernel(mut self, kernel: ClusterKernel) -> Self {
        self.cluster_kernel = kernel;
        self
    }

    /// Sets the maximum number of hit streams.
    ///
    /// Values less than 1 are clamped to 1.
    #[must_use]
    pub fn with_n_hit_streams(mut self, n: usize) -> Self {
        self.n_hit_streams = n.max(1);
        self
    }

    /// Digi coincidence window for the given time resolution.
    #[must_use]
    pub fn digi_time_cut(&self, time_resolution: f64) -> f64 {
        if self.time_cut_digi_abs > 0.0 {
            self.time_cut_digi_abs
        } else {
            self.time_cut_digi_sig * std::f64::consts::SQRT_2 * time_resolution
        }
    }
}

/// Working buffer allocation policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    /// Decide from the backend.
    #[default]
    Auto,
    /// Size once from the configured bounds.
    Static,
    /// Resize to observed counts on every call.
    Dynamic,
}

/// Allocation policy and bounds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryPars {
    /// Allocation policy.
    pub allocation_mode: AllocationMode,
    /// Static bound on digis per time-slice.
    pub max_n_digis_per_ts: usize,
    /// Static bound on digis per module side.
    pub max_n_digis_per_module: usize,
    /// Cluster bucket size relative to the largest digi bucket.
    pub clusters_per_digi: f64,
    /// Hit bucket size relative to the cluster bucket.
    pub hits_per_cluster: f64,
}

impl Default for MemoryPars {
    fn default() -> Self {
        Self {
            allocation_mode: AllocationMode::Auto,
            max_n_digis_per_ts: 1_000_000,
            max_n_digis_per_module: 100_000,
            clusters_per_digi: 1.0,
            hits_per_cluster: 4.0,
        }
    }
}

impl MemoryPars {
    /// Sets the allocation policy.
    #[must_use]
    pub fn with_allocation_mode(mut self, mode: AllocationMode) -> Self {
        self.allocation_mode = mode;
        self
    }

    /// Sets the static digi bounds.
    #[must_use]
    pub fn with_static_bounds(mut self, per_ts: usize, per_module: usize) -> Self {
        self.max_n_digis_per_ts = per_ts;
        self.max_n_digis_per_module = per_module;
        self
    }

    /// Sets the cluster bucket ratio.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameters`] unless `ratio` is positive and finite.
    pub fn try_with_clusters_per_digi(mut self, ratio: f64) -> Result<Self> {
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(Error::InvalidParameters(format!(
                "clusters_per_digi must be positive, got {ratio}"
            )));
        }
        self.clusters_per_digi = ratio;
        Ok(self)
    }

    /// Sets the hit bucket ratio.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameters`] unless `ratio` is positive and finite.
    pub fn try_with_hits_per_cluster(mut self, ratio: f64) -> Result<Self> {
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(Error::InvalidParameters(format!(
                "hits_per_cluster must be positive, got {ratio}"
            )));
        }
        self.hits_per_cluster = ratio;
        Ok(self)
    }

    /// Cluster bucket capacity for a digi bucket of `n_digis`.
    #[must_use]
    pub fn max_clusters_per_module(&self, n_digis: usize) -> usize {
        (n_digis as f64 * self.clusters_per_digi).ceil() as usize
    }

    /// Hit bucket capacity for a digi bucket of `n_digis`.
    #[must_use]
    pub fn n_hits_upper_bound(&self, n_digis: usize) -> usize {
        (self.max_clusters_per_module(n_digis) as f64 * self.hits_per_cluster).ceil() as usize
    }

    /// Resolves [`AllocationMode::Auto`]. Every backend runs on the host,
    /// so `Auto` means dynamic buffers.
    #[must_use]
    pub fn resolve_mode(&self) -> AllocationMode {
        match self.allocation_mode {
            AllocationMode::Auto => AllocationMode::Dynamic,
            mode => mode,
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.clusters_per_digi > 0.0 && self.hits_per_cluster > 0.0) {
            return Err(Error::InvalidParameters(
                "clusters_per_digi and hits_per_cluster must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Everything `HitfinderChain::set_parameters` needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HitfinderChainPars {
    /// Geometry and calibration.
    pub setup: HitfinderPars,
    /// Cuts.
    #[serde(default)]
    pub reco: RecoParams,
    /// Allocation policy.
    #[serde(default)]
    pub memory: MemoryPars,
    /// Execution backend.
    #[serde(default)]
    pub backend: Backend,
}

impl HitfinderChainPars {
    /// Bundles a setup with default cuts, memory policy and backend.
    #[must_use]
    pub fn new(setup: HitfinderPars) -> Self {
        Self {
            setup,
            reco: RecoParams::default(),
            memory: MemoryPars::default(),
            backend: Backend::default(),
        }
    }

    /// Sets the cuts.
    #[must_use]
    pub fn with_reco(mut self, reco: RecoParams) -> Self {
        self.reco = reco;
        self
    }

    /// Sets the memory policy.
    #[must_use]
    pub fn with_memory(mut self, memory: MemoryPars) -> Self {
        self.memory = memory;
        self
    }

    /// Sets the backend.
    #[must_use]
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Loads chain parameters from JSON.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or the parameters are invalid.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let pars: Self = serde_json::from_str(json)?;
        pars.validate()?;
        Ok(pars)
    }

    /// Validates all parts.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameters`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        self.setup.validate()?;
        self.memory.validate()
    }
}
