use std::fmt;
use std::hash::BuildHasher;
use std::marker::PhantomData;
use std::num::NonZero;

use new_zealand::nz;

use crate::{DropPolicy, HashPool, KeyExtractor, Tracking};

const DEFAULT_BUCKET_COUNT: NonZero<usize> = nz!(64);

/// Builder for creating an instance of [`HashPool`].
///
/// # Examples
///
/// ```
/// use slot_pool::{ByDeref, DropPolicy, HashPool};
///
/// let pool = HashPool::<String, ByDeref>::builder()
///     .bucket_count(256)
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
///
/// assert_eq!(pool.bucket_count(), 256);
/// ```
#[must_use]
pub struct HashPoolBuilder<T, X, S, K: Tracking> {
    bucket_count: NonZero<usize>,
    hasher: S,
    capacity: usize,
    drop_policy: DropPolicy,

    _item: PhantomData<T>,
    _extractor: PhantomData<X>,
    _tracking: PhantomData<K>,
}

impl<T, X, S, K: Tracking> fmt::Debug for HashPoolBuilder<T, X, S, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashPoolBuilder")
            .field("item_type", &format_args!("{}", std::any::type_name::<T>()))
            .field(
                "extractor_type",
                &format_args!("{}", std::any::type_name::<X>()),
            )
            .field("hasher_type", &format_args!("{}", std::any::type_name::<S>()))
            .field("bucket_count", &self.bucket_count)
            .field("capacity", &self.capacity)
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

impl<T, X, S, K> HashPoolBuilder<T, X, S, K>
where
    X: KeyExtractor<T>,
    S: BuildHasher,
    K: Tracking,
{
    pub(crate) fn new() -> Self
    where
        S: Default,
    {
        Self {
            bucket_count: DEFAULT_BUCKET_COUNT,
            hasher: S::default(),
            capacity: 0,
            drop_policy: DropPolicy::default(),
            _item: PhantomData,
            _extractor: PhantomData,
            _tracking: PhantomData,
        }
    }

    /// Sets the number of hash buckets. The default is 64.
    ///
    /// The bucket count never changes on its own; see
    /// [`HashPool::rebuild_buckets()`][crate::HashPool::rebuild_buckets].
    ///
    /// # Panics
    ///
    /// Panics if `bucket_count` is zero.
    pub fn bucket_count(mut self, bucket_count: usize) -> Self {
        self.bucket_count =
            NonZero::new(bucket_count).expect("HashPool bucket count must be non-zero");
        self
    }

    /// Sets the hasher used to assign keys to buckets.
    pub fn hasher(mut self, hasher: S) -> Self {
        self.hasher = hasher;
        self
    }

    /// Sets the number of slots to allocate storage for up front.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the hash pool with the specified configuration.
    #[must_use]
    pub fn build(self) -> HashPool<T, X, S, K> {
        HashPool::new_inner(
            self.bucket_count,
            self.hasher,
            self.capacity,
            self.drop_policy,
        )
    }
}
