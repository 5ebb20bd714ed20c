//! Flattening of per-module hit buckets and splitting into streams.

use crate::arena::BoundedBucket;
use crate::hit::Hit;
use cbmreco_core::{split_by_offsets_mut, PodVec, Result};
use rayon::prelude::*;

/// Modules with fewer hits than `streams_per_module * MIN_HITS_PER_STREAM`
/// stay in one stream.
pub const MIN_HITS_PER_STREAM: usize = 10;

/// Copies every module's first `max_per_module` hits into `out`.
///
/// With `exact`, `out` is trimmed to the copied hits; otherwise it keeps
/// its high-water mark. Returns the module offsets into `out`.
pub(crate) fn flatten_hits(
    buckets: &[BoundedBucket<Hit>],
    max_per_module: usize,
    out: &mut PodVec<Hit>,
    exact: bool,
) -> Result<Vec<usize>> {
    let mut offsets = Vec::with_capacity(buckets.len() + 1);
    offsets.push(0);
    for bucket in buckets {
        let last = offsets[offsets.len() - 1];
        offsets.push(last + bucket.len().min(max_per_module));
    }
    let n_hits = offsets[offsets.len() - 1];
    if exact {
        out.resize_exact(n_hits);
    } else {
        out.resize(n_hits);
    }

    let parts = split_by_offsets_mut(out, &offsets)?;
    parts
        .into_par_iter()
        .zip(buckets.par_iter())
        .for_each(|(dst, bucket)| dst.copy_from_slice(&bucket.as_slice()[..dst.len()]));
    Ok(offsets)
}

/// Splits module partitions into up to `n_streams_max` streams in total.
///
/// Each module gets exactly `max(1, n_streams_max / n_modules)` streams of
/// `n_hits / streams_per_module` hits, the last one taking the remainder,
/// or a single stream if it has too few hits. Returns the stream offsets
/// and the module address of every stream.
#[must_use]
pub fn split_into_streams(
    module_offsets: &[usize],
    module_addresses: &[u32],
    n_streams_max: usize,
) -> (Vec<usize>, Vec<u32>) {
    let n_modules = module_addresses.len();
    let streams_per_module = (n_streams_max / n_modules.max(1)).max(1);

    let mut offsets = vec![0];
    let mut addresses = Vec::with_capacity(n_modules * streams_per_module);
    for (w, &address) in module_offsets.windows(2).zip(module_addresses) {
        let (start, end) = (w[0], w[1]);
        let n_hits = end - start;
        if n_hits < streams_per_module * MIN_HITS_PER_STREAM {
            offsets.push(end);
            addresses.push(address);
            continue;
        }
        let hits_per_stream = n_hits / streams_per_module;
        for s in 1..streams_per_module {
            offsets.push(start + s * hits_per_stream);
            addresses.push(address);
        }
        offsets.push(end);
        addresses.push(address);
    }
    (offsets, addresses)
}

/// Stable-sorts every partition of `hits` by time.
pub(crate) fn sort_partitions(hits: &mut [Hit], offsets: &[usize]) -> Result<()> {
    split_by_offsets_mut(hits, offsets)?
        .into_par_iter()
        .for_each(|part| part.sort_by(|a, b| a.time.total_cmp(&b.time)));
    Ok(())
}
