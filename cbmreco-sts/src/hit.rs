//! Front/back cluster matching and hit creation.
//!
//! Front strips are read out at the top edge (`y = dy`) of the sensor and
//! run at the front stereo angle; back strips likewise. A strip read out
//! at `x0` passes through `x(y) = x0 + (dy - y) * tan(stereo)`. Strips that
//! leave the sensor sideways continue on the opposite edge (cross
//! connection), so every combination of wraps is tried.

#![allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]

use crate::arena::BoundedBucket;
use crate::cluster::Cluster;
use crate::params::{ModulePars, ModuleTransform, RecoParams};
use cbmreco_core::Timed;

/// A 3-D space point from one front and one back cluster.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Hit {
    /// Global x, cm.
    pub x: f64,
    /// Global y, cm.
    pub y: f64,
    /// Global z, cm.
    pub z: f64,
    /// Hit time, ns.
    pub time: f64,
    /// Time error, ns.
    pub time_error: f32,
    /// Local x error, cm.
    pub dx: f32,
    /// Local y error, cm.
    pub dy: f32,
    /// Local x-y covariance, cm^2.
    pub dxy: f32,
    /// Error across front strips, cm.
    pub du: f32,
    /// Error across back strips, cm.
    pub dv: f32,
    /// Module address.
    pub address: u32,
    /// Index of the front cluster in its side's time-sorted list.
    pub front_cluster: u32,
    /// Index of the back cluster in its side's time-sorted list.
    pub back_cluster: u32,
}

impl Timed for Hit {
    fn time(&self) -> f64 {
        self.time
    }
}

/// Per-module geometry derived once at configuration.
#[derive(Clone, Debug)]
pub(crate) struct SensorCache {
    address: u32,
    pitch: f64,
    dx: f64,
    dy: f64,
    stereo_front: f64,
    stereo_back: f64,
    tan_front: f64,
    tan_back: f64,
    cos_front: f64,
    cos_back: f64,
    error_fac: f64,
    lorentz_front: f64,
    lorentz_back: f64,
    transform: ModuleTransform,
}

impl SensorCache {
    pub fn new(module: &ModulePars, n_channels: u16) -> Self {
        let tan_front = module.stereo_front.to_radians().tan();
        let tan_back = module.stereo_back.to_radians().tan();
        let denom = tan_back - tan_front;
        Self {
            address: module.address,
            pitch: module.pitch,
            dx: f64::from(n_channels) * module.pitch,
            dy: module.dy,
            stereo_front: module.stereo_front,
            stereo_back: module.stereo_back,
            tan_front,
            tan_back,
            cos_front: module.stereo_front.to_radians().cos(),
            cos_back: module.stereo_back.to_radians().cos(),
            error_fac: 1.0 / (denom * denom),
            lorentz_front: module.lorentz_front,
            lorentz_back: module.lorentz_back,
            transform: module.transform.clone(),
        }
    }

    /// Distance of a cluster from the sensor's left edge, cm.
    fn cluster_position(&self, centre: f32, front: bool) -> f64 {
        let lorentz = if front { self.lorentz_front } else { self.lorentz_back };
        (f64::from(centre) + 0.5) * self.pitch - lorentz
    }

    fn is_inside(&self, x: f64, y: f64) -> bool {
        x.abs() <= 0.5 * self.dx && y.abs() <= 0.5 * self.dy
    }
}

/// Strip crossing in sensor coordinates with its covariance.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Intersection {
    x: f64,
    y: f64,
    var_x: f64,
    var_y: f64,
    var_xy: f64,
}

/// Time and charge cuts for matching.
#[derive(Clone, Debug)]
pub(crate) struct MatchCuts {
    time_cut_abs: f64,
    time_cut_sig: f64,
    charge_delta: Option<f64>,
}

impl MatchCuts {
    pub fn new(reco: &RecoParams) -> Self {
        Self {
            time_cut_abs: reco.time_cut_cluster_abs,
            time_cut_sig: reco.time_cut_cluster_sig,
            charge_delta: reco.charge_correlation_delta,
        }
    }

    fn time_cut(&self, e_front: f64, e_back: f64) -> f64 {
        if self.time_cut_abs > 0.0 {
            self.time_cut_abs
        } else if self.time_cut_sig > 0.0 {
            self.time_cut_sig * (e_front * e_front + e_back * e_back).sqrt()
        } else {
            f64::INFINITY
        }
    }
}

/// Matches the clusters of one module.
pub(crate) struct HitMatcher<'a> {
    pub sensor: &'a SensorCache,
    pub cuts: &'a MatchCuts,
}

impl HitMatcher<'_> {
    /// Pairs time-sorted front and back clusters into hits.
    ///
    /// `max_terr_*` is the largest cluster time error on each side; it
    /// bounds the search window. Matching stops once twice the bucket's
    /// capacity has been attempted.
    pub fn find_hits(
        &self,
        front: &[Cluster],
        back: &[Cluster],
        max_terr_front: f64,
        max_terr_back: f64,
        hits: &mut BoundedBucket<Hit>,
    ) {
        let Some(first) = front.first() else {
            return;
        };
        let max_sigma_both = 4.0 * (max_terr_front.powi(2) + max_terr_back.powi(2)).sqrt();
        let mut start_b = back.partition_point(|b| first.time - b.time > max_sigma_both);
        let limit = 2 * hits.capacity();

        for (i_f, f) in front.iter().enumerate() {
            let e_f = f64::from(f.time_error);
            let max_sigma = 4.0 * (e_f * e_f + max_terr_back * max_terr_back).sqrt();

            for i_b in start_b..back.len() {
                let b = &back[i_b];
                let dt = f.time - b.time;

                if dt > 0.0 && dt > max_sigma_both {
                    start_b += 1;
                    continue;
                } else if dt > 0.0 && dt > max_sigma {
                    continue;
                } else if dt < 0.0 && dt.abs() > max_sigma {
                    break;
                }

                if let Some(delta) = self.cuts.charge_delta {
                    if f64::from((f.charge - b.charge).abs()) > delta {
                        continue;
                    }
                }

                let e_b = f64::from(b.time_error);
                if dt.abs() > self.cuts.time_cut(e_f, e_b) {
                    continue;
                }

                self.intersect_clusters(f, i_f, b, i_b, hits);
                if hits.attempted() > limit {
                    return;
                }
            }
        }
    }

    fn intersect_clusters(&self, f: &Cluster, i_f: usize, b: &Cluster, i_b: usize, hits: &mut BoundedBucket<Hit>) {
        let s = self.sensor;
        let x_f = s.cluster_position(f.position, true);
        let x_b = s.cluster_position(b.position, false);
        let ex_f = f64::from(f.position_error) * s.pitch;
        let ex_b = f64::from(b.position_error) * s.pitch;
        let du = ex_f * s.cos_front;
        let dv = ex_b * s.cos_back;

        if x_f < 0.0 || x_f > s.dx || x_b < 0.0 || x_b > s.dx {
            return;
        }

        // Number of sensor widths a strip crosses before reaching y = 0.
        let n_f = ((x_f + s.dy * s.tan_front) / s.dx) as i32;
        let n_b = ((x_b + s.dy * s.tan_back) / s.dx) as i32;

        for wrap_f in n_f.min(0)..=n_f.max(0) {
            let x_fi = x_f - f64::from(wrap_f) * s.dx;
            for wrap_b in n_b.min(0)..=n_b.max(0) {
                let x_bi = x_b - f64::from(wrap_b) * s.dx;
                if let Some(p) = self.intersect(x_fi, ex_f, x_bi, ex_b) {
                    let local = Intersection {
                        x: p.x - 0.5 * s.dx,
                        y: p.y - 0.5 * s.dy,
                        ..p
                    };
                    hits.push(self.create_hit(&local, f, i_f, b, i_b, du, dv));
                }
            }
        }
    }

    /// Crossing of a front strip at `x_f` and a back strip at `x_b`, if it
    /// lies inside the active area.
    fn intersect(&self, x_f: f64, ex_f: f64, x_b: f64, ex_b: f64) -> Option<Intersection> {
        let s = self.sensor;
        if (s.stereo_front - s.stereo_back).abs() < 0.5 {
            return None;
        }
        let (ex_f2, ex_b2) = (ex_f * ex_f, ex_b * ex_b);

        let p = if s.stereo_front.abs() < 0.001 {
            Intersection {
                x: x_f,
                y: s.dy - (x_f - x_b) / s.tan_back,
                var_x: ex_f2,
                var_y: (ex_f2 + ex_b2) / (s.tan_back * s.tan_back),
                var_xy: -ex_f2 / s.tan_back,
            }
        } else if s.stereo_back.abs() < 0.001 {
            Intersection {
                x: x_b,
                y: s.dy - (x_b - x_f) / s.tan_front,
                var_x: ex_b2,
                var_y: (ex_f2 + ex_b2) / (s.tan_front * s.tan_front),
                var_xy: -ex_b2 / s.tan_front,
            }
        } else {
            let denom = s.tan_back - s.tan_front;
            Intersection {
                x: (s.tan_back * x_f - s.tan_front * x_b) / denom,
                y: s.dy + (x_b - x_f) / denom,
                var_x: s.error_fac * (ex_f2 * s.tan_back * s.tan_back + ex_b2 * s.tan_front * s.tan_front),
                var_y: s.error_fac * (ex_f2 + ex_b2),
                var_xy: -s.error_fac * (ex_f2 * s.tan_back + ex_b2 * s.tan_front),
            }
        };

        s.is_inside(p.x - 0.5 * s.dx, p.y - 0.5 * s.dy).then_some(p)
    }

    #[allow(clippy::too_many_arguments)]
    fn create_hit(&self, p: &Intersection, f: &Cluster, i_f: usize, b: &Cluster, i_b: usize, du: f64, dv: f64) -> Hit {
        let [x, y, z] = self.sensor.transform.apply([p.x, p.y, 0.0]);
        let (e_f, e_b) = (f64::from(f.time_error), f64::from(b.time_error));
        Hit {
            x,
            y,
            z,
            time: 0.5 * (f.time + b.time),
            time_error: (0.5 * (e_f * e_f + e_b * e_b).sqrt()) as f32,
            dx: p.var_x.sqrt() as f32,
            dy: p.var_y.sqrt() as f32,
            dxy: p.var_xy as f32,
            du: du as f32,
            dv: dv as f32,
            address: self.sensor.address,
            front_cluster: i_f as u32,
            back_cluster: i_b as u32,
        }
    }
}
