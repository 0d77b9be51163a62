use std::iter::FusedIterator;
use std::thread;

use num_integer::Integer;
use tracing::debug;

use crate::bitmap::BITS_PER_WORD;
use crate::{BitmapPoolBuilder, DropPolicy, Error, Result, SlotBitmap};

/// An object pool that records slot liveness in a bitmap instead of threading a free list
/// through vacant slots.
///
/// Compared to [`SlotPool`][crate::SlotPool], liveness checks are a single bit test and
/// allocation always returns the lowest free index, which keeps the occupied slots packed
/// towards the front of the storage. Storage grows in whole bitmap words, doubling each time.
///
/// # Examples
///
/// ```
/// use slot_pool::BitmapPool;
///
/// let mut pool = BitmapPool::new();
/// let a = pool.add('a').unwrap();
/// let b = pool.add('b').unwrap();
/// let c = pool.add('c').unwrap();
///
/// pool.del(a).unwrap();
/// pool.del(c).unwrap();
///
/// // The lowest free index is always reused first.
/// assert_eq!(pool.add('d').unwrap(), a);
/// assert!(pool.is_valid(b));
/// ```
#[derive(Debug)]
pub struct BitmapPool<T> {
    slots: Vec<Option<T>>,

    /// One bit per slot, set when the slot holds an element.
    used: SlotBitmap,

    /// No word before this one has a free bit.
    first_candidate_word: usize,

    length: usize,

    drop_policy: DropPolicy,
}

impl<T> BitmapPool<T> {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates an empty pool with storage for at least `capacity` slots.
    ///
    /// The capacity is rounded up to whole bitmap words.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::builder().capacity(capacity).build()
    }

    /// Creates a builder for configuring and constructing a [`BitmapPool`].
    pub fn builder() -> BitmapPoolBuilder<T> {
        BitmapPoolBuilder::new()
    }

    pub(crate) fn new_inner(capacity: usize, drop_policy: DropPolicy) -> Self {
        let capacity = capacity.next_multiple_of(BITS_PER_WORD);

        let mut used = SlotBitmap::new();
        used.grow(capacity);

        Self {
            slots: (0..capacity).map(|_| None).collect(),
            used,
            first_candidate_word: 0,
            length: 0,
            drop_policy,
        }
    }

    /// The number of elements in the pool.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether the pool holds no elements.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The number of slots the pool has storage for, occupied or not.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Inserts `value` into the lowest free slot and returns its index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`] if the storage needs to grow and cannot.
    pub fn add(&mut self, value: T) -> Result<usize> {
        self.add_with(|_| value)
    }

    /// Allocates the lowest free slot and fills it with the element returned by `f`, which
    /// receives the index of the slot being filled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`] if the storage needs to grow and cannot.
    pub fn add_with(&mut self, f: impl FnOnce(usize) -> T) -> Result<usize> {
        let index = match self.used.first_zero(self.first_candidate_word) {
            Some(index) => index,
            None => self.grow()?,
        };

        let value = f(index);

        let slot = self
            .slots
            .get_mut(index)
            .expect("bitmap and storage always have the same length");
        *slot = Some(value);

        self.used.replace(index, true);
        self.first_candidate_word = index.div_rem(&BITS_PER_WORD).0;

        // Cannot overflow, we would run out of memory first.
        self.length = self.length.wrapping_add(1);

        Ok(index)
    }

    /// Whether slot `index` holds an element. Out-of-range indices are not valid.
    #[must_use]
    #[inline]
    pub fn is_valid(&self, index: usize) -> bool {
        self.used.get(index)
    }

    /// Deletes the element in slot `index` and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if `index` is not a slot of this pool and
    /// [`Error::NotAllocated`] if the slot holds no element.
    pub fn del(&mut self, index: usize) -> Result<T> {
        let storage_len = self.slots.len();

        let slot = self.slots.get_mut(index).ok_or(Error::OutOfBounds {
            index,
            storage_len,
        })?;

        let value = slot.take().ok_or(Error::NotAllocated { index })?;

        self.used.replace(index, false);
        self.first_candidate_word = self.first_candidate_word.min(index.div_rem(&BITS_PER_WORD).0);

        // Cannot underflow, the slot was occupied.
        self.length = self.length.wrapping_sub(1);

        Ok(value)
    }

    /// Index of the first occupied slot.
    #[must_use]
    pub fn first(&self) -> Option<usize> {
        self.used.next_one(0)
    }

    /// Index of the first occupied slot after `index`.
    #[must_use]
    pub fn next(&self, index: usize) -> Option<usize> {
        self.used.next_one(index.checked_add(1)?)
    }

    /// Returns the element in slot `index`, if any.
    #[must_use]
    pub fn get_item(&self, index: usize) -> Option<&T> {
        self.slots.get(index)?.as_ref()
    }

    /// Returns the element in slot `index` for modification, if any.
    #[must_use]
    pub fn get_item_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index)?.as_mut()
    }

    /// Iterates over the occupied slots in index order.
    pub fn iter(&self) -> BitmapPoolIter<'_, T> {
        BitmapPoolIter {
            pool: self,
            next: self.first(),
        }
    }

    /// Doubles the storage, returning the first new slot.
    fn grow(&mut self) -> Result<usize> {
        let old_len = self.slots.len();
        let new_len = old_len.saturating_mul(2).max(BITS_PER_WORD);

        // Cannot underflow, new_len > old_len.
        self.slots.try_reserve_exact(new_len.wrapping_sub(old_len))?;
        self.slots.resize_with(new_len, || None);
        self.used.grow(new_len);

        debug!(old_len, new_len, "bitmap pool storage grown");

        Ok(old_len)
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    /// Verifies that the bitmap agrees with slot occupancy, panicking on any inconsistency.
    pub fn integrity_check(&self) {
        assert_eq!(self.used.len(), self.slots.len());

        for (index, slot) in self.slots.iter().enumerate() {
            assert_eq!(
                self.used.get(index),
                slot.is_some(),
                "bitmap disagrees with storage about slot {index}"
            );
        }

        assert_eq!(self.used.count_ones(), self.length);

        let first_free = self.used.first_zero(0);
        if let Some(first_free) = first_free {
            assert!(first_free.div_rem(&BITS_PER_WORD).0 >= self.first_candidate_word);
        }
    }
}

impl<T> Default for BitmapPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for BitmapPool<T> {
    fn drop(&mut self) {
        if thread::panicking() {
            return;
        }

        if matches!(self.drop_policy, DropPolicy::MustNotDropItems) {
            assert!(
                self.is_empty(),
                "dropped a non-empty BitmapPool with {} items - this is forbidden by DropPolicy::MustNotDropItems",
                self.length
            );
        }
    }
}

impl<'a, T> IntoIterator for &'a BitmapPool<T> {
    type Item = (usize, &'a T);
    type IntoIter = BitmapPoolIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the occupied slots of a [`BitmapPool`], yielding `(index, &element)`.
#[derive(Debug)]
pub struct BitmapPoolIter<'a, T> {
    pool: &'a BitmapPool<T>,
    next: Option<usize>,
}

impl<'a, T> Iterator for BitmapPoolIter<'a, T> {
    type Item = (usize, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next?;
        self.next = self.pool.next(index);

        self.pool.get_item(index).map(|value| (index, value))
    }
}

impl<T> FusedIterator for BitmapPoolIter<'_, T> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(clippy::arithmetic_side_effects, reason = "test code")]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(BitmapPool<u32>: Send, Sync);

    #[test]
    fn smoke_test() {
        let mut pool = BitmapPool::new();

        let a = pool.add(1_u32).unwrap();
        let b = pool.add(2).unwrap();

        assert_eq!((a, b), (0, 1));
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.capacity(), BITS_PER_WORD);
        assert!(pool.is_valid(a));

        assert_eq!(pool.del(a).unwrap(), 1);
        assert!(!pool.is_valid(a));
        assert_eq!(pool.len(), 1);

        pool.integrity_check();
    }

    #[test]
    fn lowest_free_index_is_reused_first() {
        let mut pool = BitmapPool::new();
        for value in 0..10_u32 {
            pool.add(value).unwrap();
        }

        pool.del(7).unwrap();
        pool.del(2).unwrap();
        pool.del(5).unwrap();

        assert_eq!(pool.add(100).unwrap(), 2);
        assert_eq!(pool.add(101).unwrap(), 5);
        assert_eq!(pool.add(102).unwrap(), 7);
        assert_eq!(pool.add(103).unwrap(), 10);

        pool.integrity_check();
    }

    #[test]
    fn grows_by_doubling() {
        let mut pool = BitmapPool::new();

        for value in 0..=BITS_PER_WORD {
            pool.add(value).unwrap();
        }

        assert_eq!(pool.capacity(), BITS_PER_WORD * 2);
        assert_eq!(pool.len(), BITS_PER_WORD + 1);

        for value in 0..BITS_PER_WORD {
            pool.add(value).unwrap();
        }

        assert_eq!(pool.capacity(), BITS_PER_WORD * 4);
        pool.integrity_check();
    }

    #[test]
    fn with_capacity_rounds_to_words() {
        let pool = BitmapPool::<u8>::with_capacity(70);
        assert_eq!(pool.capacity(), 128);
    }

    #[test]
    fn del_errors() {
        let mut pool = BitmapPool::new();
        pool.add(1_u32).unwrap();

        assert!(matches!(
            pool.del(BITS_PER_WORD),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(matches!(pool.del(3), Err(Error::NotAllocated { index: 3 })));

        pool.del(0).unwrap();
        assert!(matches!(pool.del(0), Err(Error::NotAllocated { index: 0 })));
    }

    #[test]
    fn is_valid_out_of_range_is_false() {
        let pool = BitmapPool::<u32>::new();
        assert!(!pool.is_valid(0));
        assert!(!pool.is_valid(usize::MAX));
    }

    #[test]
    fn first_and_next_walk_occupied_slots() {
        let mut pool = BitmapPool::new();
        for value in 0..100_u32 {
            pool.add(value).unwrap();
        }
        for index in (0..100).filter(|index| index % 30 != 3) {
            pool.del(index).unwrap();
        }

        assert_eq!(pool.first(), Some(3));
        assert_eq!(pool.next(3), Some(33));
        assert_eq!(pool.next(33), Some(63));
        assert_eq!(pool.next(63), Some(93));
        assert_eq!(pool.next(93), None);
        assert_eq!(pool.next(usize::MAX), None);

        let collected: Vec<_> = pool.iter().map(|(index, value)| (index, *value)).collect();
        assert_eq!(collected, vec![(3, 3), (33, 33), (63, 63), (93, 93)]);
    }

    #[test]
    fn get_item_mut_modifies_in_place() {
        let mut pool = BitmapPool::new();
        let index = pool.add(vec![1, 2]).unwrap();

        pool.get_item_mut(index).unwrap().push(3);
        assert_eq!(pool.get_item(index), Some(&vec![1, 2, 3]));
        assert_eq!(pool.get_item(index + 1), None);
    }

    #[test]
    fn add_with_receives_index() {
        let mut pool = BitmapPool::new();
        pool.add(0).unwrap();
        let index = pool.add_with(|index| index * 2).unwrap();
        assert_eq!(pool.get_item(index), Some(&2));
    }

    #[test]
    #[should_panic]
    fn must_not_drop_items_panics_when_non_empty() {
        let mut pool = BitmapPool::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();
        pool.add(1_u32).unwrap();
    }
}
