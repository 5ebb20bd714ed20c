//! Fixed-capacity output buckets.

/// Bucket that accepts at most `capacity` items and counts the rest.
///
/// Inserting into a full bucket drops the item; [`BoundedBucket::overflow`]
/// reports how many were dropped since the last [`BoundedBucket::clear`].
#[derive(Clone, Debug, Default)]
pub struct BoundedBucket<T> {
    items: Vec<T>,
    capacity: usize,
    attempted: usize,
}

impl<T> BoundedBucket<T> {
    /// Creates a bucket and reserves its full capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            attempted: 0,
        }
    }

    /// Inserts `item` if there is room. Returns false if it was dropped.
    #[inline]
    pub fn push(&mut self, item: T) -> bool {
        self.attempted += 1;
        if self.items.len() < self.capacity {
            self.items.push(item);
            true
        } else {
            false
        }
    }

    /// Stored items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum number of stored items.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insertions since the last clear, including dropped ones.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.attempted
    }

    /// Dropped insertions since the last clear.
    #[must_use]
    pub fn overflow(&self) -> usize {
        self.attempted - self.items.len()
    }

    /// Empties the bucket and resets the counters, keeping the allocation.
    pub fn clear(&mut self) {
        self.items.clear();
        self.attempted = 0;
    }

    /// Changes the capacity. Stored items past the new capacity are dropped
    /// without being counted as overflow.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.items.truncate(capacity);
        self.items.reserve(capacity - self.items.len());
    }

    /// Stored items.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Stored items, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.items
    }
}
