//! Two-pass parallel bucketing.
//!
//! Items are grouped into buckets by a key function in two passes:
//!
//! 1. Every worker counts the items of its contiguous chunk per bucket.
//! 2. The counts are prefix-summed into bucket offsets and per-worker
//!    cursors, and every worker scatters its chunk into its own sub-range
//!    of each bucket.
//!
//! No shared counter is incremented. Within a bucket, items keep their
//! input order, so the result does not depend on the worker count.

use crate::error::{Error, Result};
use rayon::prelude::*;

/// Per-worker bucket counts from the first pass.
#[derive(Debug, Clone)]
pub struct BucketCounts {
    n_buckets: usize,
    n_items: usize,
    chunk_len: usize,
    per_worker: Vec<Vec<usize>>,
    totals: Vec<usize>,
}

impl BucketCounts {
    /// Counts `items` per bucket using `n_workers` chunks.
    ///
    /// `key` returns the bucket index, or `None` to drop the item.
    /// Keys `>= n_buckets` are treated as dropped.
    pub fn count<T, F>(items: &[T], n_buckets: usize, n_workers: usize, key: F) -> Self
    where
        T: Sync,
        F: Fn(&T) -> Option<usize> + Sync,
    {
        let chunk_len = items.len().div_ceil(n_workers.max(1)).max(1);
        let per_worker: Vec<Vec<usize>> = items
            .par_chunks(chunk_len)
            .map(|chunk| {
                let mut counts = vec![0usize; n_buckets];
                for item in chunk {
                    if let Some(b) = key(item).filter(|&b| b < n_buckets) {
                        counts[b] += 1;
                    }
                }
                counts
            })
            .collect();

        let mut totals = vec![0usize; n_buckets];
        for counts in &per_worker {
            for (t, c) in totals.iter_mut().zip(counts) {
                *t += c;
            }
        }

        Self {
            n_buckets,
            n_items: items.len(),
            chunk_len,
            per_worker,
            totals,
        }
    }

    /// Number of buckets.
    #[must_use]
    pub fn n_buckets(&self) -> usize {
        self.n_buckets
    }

    /// Items per bucket.
    #[must_use]
    pub fn totals(&self) -> &[usize] {
        &self.totals
    }

    /// Largest bucket.
    #[must_use]
    pub fn max_count(&self) -> usize {
        self.totals.iter().copied().max().unwrap_or(0)
    }

    /// Items that landed in some bucket.
    #[must_use]
    pub fn n_assigned(&self) -> usize {
        self.totals.iter().sum()
    }

    /// Items the key function rejected.
    #[must_use]
    pub fn n_dropped(&self) -> usize {
        self.n_items - self.n_assigned()
    }

    /// Bucket offsets, `n_buckets() + 1` entries.
    #[must_use]
    pub fn offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.n_buckets + 1);
        offsets.push(0);
        let mut acc = 0;
        for &t in &self.totals {
            acc += t;
            offsets.push(acc);
        }
        offsets
    }

    /// Scatters `items` into `out`, grouped by bucket.
    ///
    /// `items` and `key` must be the ones passed to [`BucketCounts::count`].
    ///
    /// # Errors
    /// Returns [`Error::Precondition`] if `out` does not have room for
    /// exactly [`BucketCounts::n_assigned`] items, if `items` changed length,
    /// or if `key` disagrees with the counting pass.
    pub fn scatter<T, F>(&self, items: &[T], key: F, out: &mut [T]) -> Result<()>
    where
        T: Copy + Send + Sync,
        F: Fn(&T) -> Option<usize> + Sync,
    {
        if items.len() != self.n_items {
            return Err(Error::Precondition(format!(
                "scatter got {} items, counted {}",
                items.len(),
                self.n_items
            )));
        }
        if out.len() != self.n_assigned() {
            return Err(Error::Precondition(format!(
                "scatter target holds {} items, expected {}",
                out.len(),
                self.n_assigned()
            )));
        }

        // targets[w][b]: the sub-range of bucket b reserved for worker w.
        let n_workers = self.per_worker.len();
        let mut targets: Vec<Vec<&mut [T]>> = (0..n_workers)
            .map(|_| Vec::with_capacity(self.n_buckets))
            .collect();
        let mut rest = out;
        for b in 0..self.n_buckets {
            for (w, counts) in self.per_worker.iter().enumerate() {
                let (head, tail) = std::mem::take(&mut rest).split_at_mut(counts[b]);
                targets[w].push(head);
                rest = tail;
            }
        }

        items
            .par_chunks(self.chunk_len)
            .zip(targets.par_iter_mut())
            .try_for_each(|(chunk, slots)| {
                let mut cursors = vec![0usize; self.n_buckets];
                for item in chunk {
                    let Some(b) = key(item).filter(|&b| b < self.n_buckets) else {
                        continue;
                    };
                    let slot = slots[b].get_mut(cursors[b]).ok_or_else(|| {
                        Error::Precondition("bucket key changed between count and scatter".into())
                    })?;
                    *slot = *item;
                    cursors[b] += 1;
                }
                Ok(())
            })
    }
}
