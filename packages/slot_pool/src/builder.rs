use std::fmt;
use std::marker::PhantomData;

use crate::{DropPolicy, SlotPool, Tracking};

/// Builder for creating an instance of [`SlotPool`].
///
/// You only need to use this builder if you want change tracking or want to customize the pool
/// configuration. The default configuration used by [`SlotPool::new()`][1] is sufficient for
/// most use cases.
///
/// # Examples
///
/// ```
/// use slot_pool::{ChangeTracking, SlotPool};
///
/// let mut pool = SlotPool::<u32, ChangeTracking>::builder().capacity(16).build();
/// let index = pool.add(42).unwrap();
///
/// assert!(pool.changeset(index).unwrap().is_modified_in_current_frame());
/// ```
///
/// [1]: SlotPool::new
#[must_use]
pub struct SlotPoolBuilder<T, K: Tracking> {
    capacity: usize,
    drop_policy: DropPolicy,

    _item: PhantomData<T>,
    _tracking: PhantomData<K>,
}

impl<T, K: Tracking> fmt::Debug for SlotPoolBuilder<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotPoolBuilder")
            .field("item_type", &format_args!("{}", std::any::type_name::<T>()))
            .field(
                "tracking_type",
                &format_args!("{}", std::any::type_name::<K>()),
            )
            .field("capacity", &self.capacity)
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

impl<T, K: Tracking> SlotPoolBuilder<T, K> {
    pub(crate) fn new() -> Self {
        Self {
            capacity: 0,
            drop_policy: DropPolicy::default(),
            _item: PhantomData,
            _tracking: PhantomData,
        }
    }

    /// Sets the number of slots to allocate storage for up front.
    ///
    /// The pool still grows on demand; this only avoids reallocations while it fills up.
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
    pub fn build(self) -> SlotPool<T, K> {
        SlotPool::new_inner(self.capacity, self.drop_policy)
    }
}
