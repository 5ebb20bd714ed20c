//! Partitioned flat buffers.
//!
//! A [`PartitionedVec`] stores many logically separate sequences (for
//! example the hits of every STS module) in one contiguous buffer. An
//! `offsets` table of length `n_partitions + 1` marks the partition
//! boundaries and every partition carries a hardware address.
//!
//! [`PartitionedSlice`] is the borrowed counterpart. It is `Copy` and is how
//! downstream stages receive partitioned data without copying it.

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Checks that `offsets` and `addresses` describe `n_elements` elements.
///
/// # Errors
/// Returns [`Error::PartitionStructure`] if `offsets` is empty, does not
/// start at zero, does not end at `n_elements`, decreases anywhere, or has
/// a length other than `addresses.len() + 1`.
pub fn validate_structure(n_elements: usize, offsets: &[usize], addresses: &[u32]) -> Result<()> {
    let Some((&first, _)) = offsets.split_first() else {
        return Err(Error::PartitionStructure("offsets table is empty".into()));
    };
    if offsets.len() != addresses.len() + 1 {
        return Err(Error::PartitionStructure(format!(
            "{} offsets for {} addresses, expected {}",
            offsets.len(),
            addresses.len(),
            addresses.len() + 1
        )));
    }
    if first != 0 {
        return Err(Error::PartitionStructure(format!(
            "first offset is {first}, expected 0"
        )));
    }
    if let Some(i) = offsets.windows(2).position(|w| w[1] < w[0]) {
        return Err(Error::PartitionStructure(format!(
            "offsets decrease between partition {i} and {}",
            i + 1
        )));
    }
    let last = offsets[offsets.len() - 1];
    if last != n_elements {
        return Err(Error::PartitionStructure(format!(
            "last offset is {last}, buffer holds {n_elements} elements"
        )));
    }
    Ok(())
}

/// Splits `data` into disjoint mutable partitions at `offsets`.
///
/// # Errors
/// Returns [`Error::PartitionStructure`] if `offsets` does not describe
/// exactly `data.len()` elements.
pub fn split_by_offsets_mut<'a, T>(data: &'a mut [T], offsets: &[usize]) -> Result<Vec<&'a mut [T]>> {
    let n = offsets.len().saturating_sub(1);
    // Addresses are irrelevant here; validate against a dummy table of the right length.
    validate_structure(data.len(), offsets, &vec![0; n])?;
    Ok(split_unchecked(data, offsets))
}

fn split_unchecked<'a, T>(data: &'a mut [T], offsets: &[usize]) -> Vec<&'a mut [T]> {
    let mut parts = Vec::with_capacity(offsets.len().saturating_sub(1));
    let mut rest = data;
    for w in offsets.windows(2) {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(w[1] - w[0]);
        parts.push(head);
        rest = tail;
    }
    parts
}

fn sizes_to_offsets(sizes: &[usize]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(sizes.len() + 1);
    offsets.push(0);
    let mut total = 0;
    for &s in sizes {
        total += s;
        offsets.push(total);
    }
    offsets
}

/// Owning partitioned buffer.
///
/// Deserialization runs the same structure checks as [`PartitionedVec::from_offsets`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawPartitionedVec<T>"))]
pub struct PartitionedVec<T> {
    data: Vec<T>,
    offsets: Vec<usize>,
    addresses: Vec<u32>,
}

/// Unchecked wire form of [`PartitionedVec`].
#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct RawPartitionedVec<T> {
    data: Vec<T>,
    offsets: Vec<usize>,
    addresses: Vec<u32>,
}

#[cfg(feature = "serde")]
impl<T> TryFrom<RawPartitionedVec<T>> for PartitionedVec<T> {
    type Error = Error;

    fn try_from(raw: RawPartitionedVec<T>) -> Result<Self> {
        Self::from_offsets(raw.data, raw.offsets, raw.addresses)
    }
}

impl<T> Default for PartitionedVec<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            offsets: vec![0],
            addresses: Vec::new(),
        }
    }
}

impl<T> PartitionedVec<T> {
    /// Creates an empty container with zero partitions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a container from a buffer and per-partition sizes.
    ///
    /// Offsets are the prefix sum of `sizes`.
    ///
    /// # Errors
    /// Returns [`Error::PartitionStructure`] if the sizes do not add up to
    /// `data.len()` or if `sizes` and `addresses` differ in length.
    pub fn from_sizes(data: Vec<T>, sizes: &[usize], addresses: &[u32]) -> Result<Self> {
        Self::from_offsets(data, sizes_to_offsets(sizes), addresses.to_vec())
    }

    /// Builds a container from a buffer and an explicit offsets table.
    ///
    /// # Errors
    /// Returns [`Error::PartitionStructure`] if the table is malformed.
    pub fn from_offsets(data: Vec<T>, offsets: Vec<usize>, addresses: Vec<u32>) -> Result<Self> {
        validate_structure(data.len(), &offsets, &addresses)?;
        Ok(Self {
            data,
            offsets,
            addresses,
        })
    }

    /// Returns partition `i` together with its address.
    ///
    /// # Errors
    /// Returns [`Error::PartitionOutOfRange`] if `i >= n_partitions()`.
    pub fn partition(&self, i: usize) -> Result<(&[T], u32)> {
        self.as_slice().partition(i)
    }

    /// Returns partition `i`.
    ///
    /// # Errors
    /// Returns [`Error::PartitionOutOfRange`] if `i >= n_partitions()`.
    pub fn get(&self, i: usize) -> Result<&[T]> {
        self.as_slice().get(i)
    }

    /// Returns partition `i` mutably together with its address.
    ///
    /// # Errors
    /// Returns [`Error::PartitionOutOfRange`] if `i >= n_partitions()`.
    pub fn partition_mut(&mut self, i: usize) -> Result<(&mut [T], u32)> {
        self.check_index(i)?;
        let range = self.offsets[i]..self.offsets[i + 1];
        Ok((&mut self.data[range], self.addresses[i]))
    }

    /// Number of elements in partition `i`.
    ///
    /// # Errors
    /// Returns [`Error::PartitionOutOfRange`] if `i >= n_partitions()`.
    pub fn size(&self, i: usize) -> Result<usize> {
        self.check_index(i)?;
        Ok(self.offsets[i + 1] - self.offsets[i])
    }

    /// Number of partitions.
    #[must_use]
    pub fn n_partitions(&self) -> usize {
        self.addresses.len()
    }

    /// Total number of elements across all partitions.
    #[must_use]
    pub fn n_elements(&self) -> usize {
        self.data.len()
    }

    /// True if there are no elements, regardless of the partition count.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Partition addresses in partition order.
    #[must_use]
    pub fn addresses(&self) -> &[u32] {
        &self.addresses
    }

    /// Offsets table, `n_partitions() + 1` entries.
    #[must_use]
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// The flat buffer.
    #[must_use]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Borrows the container as a view.
    #[must_use]
    pub fn as_slice(&self) -> PartitionedSlice<'_, T> {
        PartitionedSlice {
            data: &self.data,
            offsets: &self.offsets,
            addresses: &self.addresses,
        }
    }

    /// All partitions as disjoint mutable slices, for parallel processing.
    pub fn partitions_mut(&mut self) -> Vec<&mut [T]> {
        split_unchecked(&mut self.data, &self.offsets)
    }

    /// Iterates over `(partition, address)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&[T], u32)> + '_ {
        self.as_slice().iter()
    }

    /// Decomposes the container into buffer, offsets and addresses.
    #[must_use]
    pub fn into_parts(self) -> (Vec<T>, Vec<usize>, Vec<u32>) {
        (self.data, self.offsets, self.addresses)
    }

    fn check_index(&self, i: usize) -> Result<()> {
        if i >= self.n_partitions() {
            return Err(Error::PartitionOutOfRange {
                index: i,
                n_partitions: self.n_partitions(),
            });
        }
        Ok(())
    }
}

impl<T: Clone> From<PartitionedSlice<'_, T>> for PartitionedVec<T> {
    fn from(view: PartitionedSlice<'_, T>) -> Self {
        view.to_partitioned_vec()
    }
}

/// Borrowed view over a partitioned buffer.
#[derive(Debug)]
pub struct PartitionedSlice<'a, T> {
    data: &'a [T],
    offsets: &'a [usize],
    addresses: &'a [u32],
}

impl<T> Clone for PartitionedSlice<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PartitionedSlice<'_, T> {}

impl<'a, T> PartitionedSlice<'a, T> {
    /// Creates a view over borrowed data, offsets and addresses.
    ///
    /// # Errors
    /// Returns [`Error::PartitionStructure`] if the table is malformed.
    pub fn new(data: &'a [T], offsets: &'a [usize], addresses: &'a [u32]) -> Result<Self> {
        validate_structure(data.len(), offsets, addresses)?;
        Ok(Self {
            data,
            offsets,
            addresses,
        })
    }

    /// Returns partition `i` together with its address.
    ///
    /// # Errors
    /// Returns [`Error::PartitionOutOfRange`] if `i >= n_partitions()`.
    pub fn partition(&self, i: usize) -> Result<(&'a [T], u32)> {
        let part = self.get(i)?;
        Ok((part, self.addresses[i]))
    }

    /// Returns partition `i`.
    ///
    /// # Errors
    /// Returns [`Error::PartitionOutOfRange`] if `i >= n_partitions()`.
    pub fn get(&self, i: usize) -> Result<&'a [T]> {
        if i >= self.n_partitions() {
            return Err(Error::PartitionOutOfRange {
                index: i,
                n_partitions: self.n_partitions(),
            });
        }
        Ok(&self.data[self.offsets[i]..self.offsets[i + 1]])
    }

    /// Number of elements in partition `i`.
    ///
    /// # Errors
    /// Returns [`Error::PartitionOutOfRange`] if `i >= n_partitions()`.
    pub fn size(&self, i: usize) -> Result<usize> {
        self.get(i).map(<[T]>::len)
    }

    /// Number of partitions.
    #[must_use]
    pub fn n_partitions(&self) -> usize {
        self.addresses.len()
    }

    /// Total number of elements across all partitions.
    #[must_use]
    pub fn n_elements(&self) -> usize {
        self.data.len()
    }

    /// True if there are no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Partition addresses in partition order.
    #[must_use]
    pub fn addresses(&self) -> &'a [u32] {
        self.addresses
    }

    /// Offsets table.
    #[must_use]
    pub fn offsets(&self) -> &'a [usize] {
        self.offsets
    }

    /// The flat buffer.
    #[must_use]
    pub fn data(&self) -> &'a [T] {
        self.data
    }

    /// Iterates over `(partition, address)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&'a [T], u32)> + 'a {
        let data = self.data;
        self.offsets
            .windows(2)
            .zip(self.addresses.iter())
            .map(move |(w, &addr)| (&data[w[0]..w[1]], addr))
    }
}

impl<T: Clone> PartitionedSlice<'_, T> {
    /// Copies the view into an owning container.
    #[must_use]
    pub fn to_partitioned_vec(&self) -> PartitionedVec<T> {
        PartitionedVec {
            data: self.data.to_vec(),
            offsets: self.offsets.to_vec(),
            addresses: self.addresses.to_vec(),
        }
    }
}

impl<'a, T> From<&'a PartitionedVec<T>> for PartitionedSlice<'a, T> {
    fn from(container: &'a PartitionedVec<T>) -> Self {
        container.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PartitionedVec<i32> {
        PartitionedVec::from_sizes((1..=9).collect(), &[2, 4, 3], &[0x0, 0x100, 0x200]).unwrap()
    }

    #[test]
    fn test_partitions_and_addresses() {
        let container = sample();
        assert_eq!(container.n_partitions(), 3);
        assert_eq!(container.n_elements(), 9);
        assert_eq!(container.offsets(), &[0, 2, 6, 9]);
        assert_eq!(container.partition(0).unwrap(), (&[1, 2][..], 0x0));
        assert_eq!(container.partition(1).unwrap(), (&[3, 4, 5, 6][..], 0x100));
        assert_eq!(container.partition(2).unwrap(), (&[7, 8, 9][..], 0x200));
        assert_eq!(container.size(1).unwrap(), 4);
    }

    #[test]
    fn test_view_round_trip() {
        let container = sample();
        let view = container.as_slice();
        let copy = PartitionedVec::from(view);
        assert_eq!(copy, container);

        let rebuilt = PartitionedSlice::new(copy.data(), copy.offsets(), copy.addresses()).unwrap();
        for i in 0..3 {
            assert_eq!(rebuilt.partition(i).unwrap(), container.partition(i).unwrap());
        }
    }

    #[test]
    fn test_out_of_range() {
        let container = sample();
        let err = container.partition(3).unwrap_err();
        assert_eq!(
            err,
            Error::PartitionOutOfRange {
                index: 3,
                n_partitions: 3
            }
        );
        assert!(container.as_slice().get(3).is_err());
        assert!(container.size(3).is_err());

        let empty = PartitionedVec::<i32>::new();
        assert!(empty.partition(0).is_err());
    }

    #[test]
    fn test_structure_violations() {
        // Last offset past the buffer.
        assert!(matches!(
            PartitionedVec::from_offsets(vec![1, 2, 3], vec![0, 1, 4], vec![0, 1]),
            Err(Error::PartitionStructure(_))
        ));
        // One address too many.
        assert!(matches!(
            PartitionedVec::from_offsets(vec![1, 2, 3], vec![0, 1, 3], vec![0, 1, 2]),
            Err(Error::PartitionStructure(_))
        ));
        // Sizes that do not cover the buffer.
        assert!(PartitionedVec::from_sizes(vec![1, 2, 3], &[1, 1], &[0, 1]).is_err());
        // Decreasing offsets.
        assert!(PartitionedVec::from_offsets(vec![1, 2, 3], vec![0, 2, 1, 3], vec![0, 1, 2]).is_err());
        // Non-zero start.
        assert!(PartitionedSlice::new(&[1, 2, 3], &[1, 3], &[0]).is_err());
    }

    #[test]
    fn test_partitions_mut() {
        let mut container = sample();
        for part in container.partitions_mut() {
            part.reverse();
        }
        assert_eq!(container.get(1).unwrap(), &[6, 5, 4, 3]);
        let (part, addr) = container.partition_mut(2).unwrap();
        part[0] = 0;
        assert_eq!(addr, 0x200);
        assert_eq!(container.data()[6], 0);
    }

    #[test]
    fn test_split_by_offsets_mut() {
        let mut data = [1, 2, 3, 4, 5];
        let parts = split_by_offsets_mut(&mut data, &[0, 0, 3, 5]).unwrap();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].is_empty());
        assert_eq!(parts[2], &mut [4, 5]);
        assert!(split_by_offsets_mut(&mut data, &[0, 3]).is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize_checks_structure() {
        let json = serde_json::to_string(&sample()).unwrap();
        let parsed: PartitionedVec<i32> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, sample());

        // Last offset past the buffer.
        let err = serde_json::from_str::<PartitionedVec<i32>>(r#"{"data":[1,2,3],"offsets":[0,5],"addresses":[7]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("invalid partition structure"), "{err}");
        // Address count does not match.
        assert!(serde_json::from_str::<PartitionedVec<i32>>(r#"{"data":[1,2],"offsets":[0,2],"addresses":[]}"#).is_err());
    }

    #[test]
    fn test_iter() {
        let container = sample();
        let collected: Vec<(usize, u32)> = container.iter().map(|(p, a)| (p.len(), a)).collect();
        assert_eq!(collected, vec![(2, 0x0), (4, 0x100), (3, 0x200)]);
    }
}
