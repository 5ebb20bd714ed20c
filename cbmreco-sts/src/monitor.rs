//! Per-call counters of the hit finder chain.

use std::fmt;

/// Counters of one hit finder call.
///
/// Bucket overflows are reported here, not as errors: the call still
/// succeeds with the clusters and hits that fit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HitfinderMon {
    /// Digis passed in.
    pub n_digis: usize,
    /// Digis with an unknown module address or channel.
    pub n_digis_dropped: usize,
    /// Clusters stored over all module sides.
    pub n_clusters_total: usize,
    /// Hits in the output.
    pub n_hits_total: usize,
    /// Clusters dropped because a side's bucket was full.
    pub n_cluster_bucket_overflow: usize,
    /// Hits dropped because a module's bucket was full.
    pub n_hit_bucket_overflow: usize,
    /// Cluster bucket capacity per module side in this call.
    pub cluster_bucket_capacity: usize,
    /// Hit bucket capacity per module in this call.
    pub hit_bucket_capacity: usize,
    /// Stored clusters per module side; fronts first, then backs.
    pub n_clusters_per_side: Vec<usize>,
    /// Stored hits per module.
    pub n_hits_per_module: Vec<usize>,
    /// Output hit partitions.
    pub n_streams: usize,
}

impl HitfinderMon {
    /// True if any cluster or hit was lost to a full bucket.
    #[must_use]
    pub fn has_overflow(&self) -> bool {
        self.n_cluster_bucket_overflow > 0 || self.n_hit_bucket_overflow > 0
    }
}

impl fmt::Display for HitfinderMon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "digis={} (dropped {}), clusters={} (overflow {}), hits={} (overflow {}), streams={}",
            self.n_digis,
            self.n_digis_dropped,
            self.n_clusters_total,
            self.n_cluster_bucket_overflow,
            self.n_hits_total,
            self.n_hit_bucket_overflow,
            self.n_streams
        )
    }
}
