//! Reusable buffers for plain numeric records.
//!
//! [`PodVec`] keeps every element it has ever initialised. Shrinking only
//! moves the logical length; growing back within the high-water mark does
//! not write the elements again. Stages that overwrite their whole output
//! on every call (digi buffers, connectivity tables, hit buffers) use it to
//! avoid repeated default-construction across time-slices.

use std::ops::{Deref, DerefMut};

/// Growable buffer of `Copy` elements with a sticky high-water mark.
#[derive(Debug, Clone, Default)]
pub struct PodVec<T: Copy + Default> {
    storage: Vec<T>,
    len: usize,
}

impl<T: Copy + Default> PodVec<T> {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            storage: Vec::new(),
            len: 0,
        }
    }

    /// Logical length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the logical length is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of initialised elements available without writing new ones.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Sets the logical length to `n`.
    ///
    /// Elements below the high-water mark keep whatever value they held;
    /// only elements past it are default-initialised.
    pub fn resize(&mut self, n: usize) {
        if n > self.storage.len() {
            self.storage.resize(n, T::default());
        }
        self.len = n;
    }

    /// Sets the logical length to `n` and frees storage past it.
    pub fn resize_exact(&mut self, n: usize) {
        self.resize(n);
        self.storage.truncate(n);
        self.storage.shrink_to_fit();
    }

    /// Sets the logical length to zero without touching the contents.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Ensures at least `n` initialised elements, without changing the length.
    pub fn reserve_initialized(&mut self, n: usize) {
        if n > self.storage.len() {
            self.storage.resize(n, T::default());
        }
    }

    /// Appends one element.
    pub fn push(&mut self, value: T) {
        if self.len == self.storage.len() {
            self.storage.push(value);
        } else {
            self.storage[self.len] = value;
        }
        self.len += 1;
    }

    /// Overwrites every element of the logical range with `value`.
    pub fn fill(&mut self, value: T) {
        self.storage[..self.len].fill(value);
    }

}

impl<T: Copy + Default> Deref for PodVec<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.storage[..self.len]
    }
}

impl<T: Copy + Default> DerefMut for PodVec<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.storage[..self.len]
    }
}

impl<T: Copy + Default> From<Vec<T>> for PodVec<T> {
    fn from(storage: Vec<T>) -> Self {
        let len = storage.len();
        Self { storage, len }
    }
}
