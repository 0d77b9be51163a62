use std::fmt;
use std::marker::PhantomData;

use crate::{BitmapPool, DropPolicy};

/// Builder for creating an instance of [`BitmapPool`].
///
/// # Examples
///
/// ```
/// use slot_pool::{BitmapPool, DropPolicy};
///
/// let pool = BitmapPool::<u32>::builder()
///     .capacity(100)
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
///
/// // Capacity is rounded up to whole bitmap words.
/// assert_eq!(pool.capacity(), 128);
/// ```
#[must_use]
pub struct BitmapPoolBuilder<T> {
    capacity: usize,
    drop_policy: DropPolicy,

    _item: PhantomData<T>,
}

impl<T> fmt::Debug for BitmapPoolBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitmapPoolBuilder")
            .field("item_type", &format_args!("{}", std::any::type_name::<T>()))
            .field("capacity", &self.capacity)
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

impl<T> BitmapPoolBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            capacity: 0,
            drop_policy: DropPolicy::default(),
            _item: PhantomData,
        }
    }

    /// Sets the number of slots to allocate storage for up front, rounded up to whole bitmap
    /// words.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how
    /// to treat remaining items in the pool when the pool is dropped.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the pool with the specified configuration.
    #[must_use]
    pub fn build(self) -> BitmapPool<T> {
        BitmapPool::new_inner(self.capacity, self.drop_policy)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_new() {
        let pool = BitmapPool::<u32>::builder().build();

        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 0);
    }

    #[test]
    fn capacity_rounds_up_to_words() {
        let pool = BitmapPool::<u32>::builder().capacity(65).build();

        assert_eq!(pool.capacity(), 128);
    }

    #[test]
    fn empty_pool_with_must_not_drop_items_drops_quietly() {
        let pool = BitmapPool::<u32>::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        drop(pool);
    }

    #[test]
    fn debug_names_item_type() {
        let builder = BitmapPool::<u32>::builder();
        let output = format!("{builder:?}");

        assert!(output.contains("BitmapPoolBuilder"));
        assert!(output.contains("u32"));
    }
}
