use std::hash::BuildHasher;
use std::marker::PhantomData;
use std::num::NonZero;
use std::{fmt, iter, mem};

use tracing::debug;

use crate::{
    AuxArray, ChangeTracking, DropPolicy, Error, HashPoolBuilder, Iter, KeyExtractor, NoTracking,
    Result, SlotPool, Tracking,
};

/// A [`SlotPool`] with a hash index over a key extracted from each element.
///
/// Elements keep stable indices exactly as in the underlying pool. The index uses separate
/// chaining: every bucket heads a singly linked chain, and the links are slot indices stored in
/// an array that runs parallel to the pool storage. A lookup therefore never touches elements
/// outside the key's bucket.
///
/// Several elements with equal keys may coexist. Lookups find the most recently inserted one
/// first and [`erase()`](Self::erase) removes all of them.
///
/// The bucket count is fixed at construction. Chains get longer as the pool fills up; call
/// [`rebuild_buckets()`](Self::rebuild_buckets) to re-bucket with a different count.
///
/// # Examples
///
/// ```
/// use slot_pool::{ByDeref, HashPool};
///
/// let mut pool = HashPool::<String, ByDeref>::new();
///
/// pool.insert_value_slot("foo".to_string()).unwrap();
/// pool.insert_value_slot("foo".to_string()).unwrap();
/// let bar = pool.insert_value_slot("bar".to_string()).unwrap();
///
/// assert_eq!(pool.count("foo"), 2);
/// assert_eq!(pool.erase("foo"), 2);
/// assert_eq!(pool.find_value("bar"), Some(bar));
/// ```
pub struct HashPool<T, X, S = foldhash::fast::RandomState, K: Tracking = NoTracking> {
    pool: SlotPool<T, K>,

    /// Head of the chain for each bucket.
    buckets: Vec<Option<usize>>,

    /// Chain membership of each slot, indexed by slot.
    chain: AuxArray<ChainLink>,

    bucket_count: NonZero<usize>,

    hasher: S,

    _extractor: PhantomData<X>,
}

/// Where a slot sits in the hash index.
///
/// The bucket is recorded when the slot is linked, so unlinking never depends on the element's
/// current key.
#[derive(Clone, Copy, Debug, Default)]
struct ChainLink {
    next: Option<usize>,
    bucket: usize,
}

impl<T, X: KeyExtractor<T>> HashPool<T, X> {
    /// Creates an empty pool with the default bucket count and hasher.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }
}

impl<T, X: KeyExtractor<T>> Default for HashPool<T, X> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, X, S, K> HashPool<T, X, S, K>
where
    X: KeyExtractor<T>,
    S: BuildHasher,
    K: Tracking,
{
    /// Creates a builder for configuring and constructing a [`HashPool`].
    ///
    /// # Example
    ///
    /// ```
    /// use slot_pool::{ByValue, HashPool};
    ///
    /// let pool = HashPool::<u64, ByValue>::builder()
    ///     .bucket_count(1024)
    ///     .capacity(4096)
    ///     .build();
    ///
    /// assert_eq!(pool.bucket_count(), 1024);
    /// ```
    pub fn builder() -> HashPoolBuilder<T, X, S, K>
    where
        S: Default,
    {
        HashPoolBuilder::new()
    }

    pub(crate) fn new_inner(
        bucket_count: NonZero<usize>,
        hasher: S,
        capacity: usize,
        drop_policy: DropPolicy,
    ) -> Self {
        Self {
            pool: SlotPool::new_inner(capacity, drop_policy),
            buckets: vec![None; bucket_count.get()],
            chain: AuxArray::new(),
            bucket_count,
            hasher,
            _extractor: PhantomData,
        }
    }

    /// The number of elements in the pool.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    /// Whether the pool holds no elements.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// The number of hash buckets.
    #[must_use]
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.bucket_count.get()
    }

    /// Read access to the underlying pool, e.g. for change tracking queries.
    #[must_use]
    pub fn pool(&self) -> &SlotPool<T, K> {
        &self.pool
    }

    /// Returns the index of an element whose key equals `key`, preferring the most recently
    /// inserted one.
    #[must_use]
    pub fn find_value(&self, key: &X::Key) -> Option<usize> {
        self.chain_of(self.bucket_of(key))
            .find(|&index| self.key_matches(index, key))
    }

    /// Returns an element whose key equals `key`, preferring the most recently inserted one.
    #[must_use]
    pub fn get_value(&self, key: &X::Key) -> Option<&T> {
        self.find_value(key)
            .and_then(|index| self.pool.get_item(index))
    }

    /// The number of elements whose key equals `key`.
    #[must_use]
    pub fn count(&self, key: &X::Key) -> usize {
        self.chain_of(self.bucket_of(key))
            .filter(|&index| self.key_matches(index, key))
            .count()
    }

    /// Returns the index of an element with key `key`, inserting one if there is none.
    ///
    /// The new element is created by `f`, which receives the index of the slot being filled.
    /// It must carry the same key that was looked up. The returned flag is `true` if an
    /// element was inserted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`] if the storage needs to grow and cannot.
    ///
    /// # Example
    ///
    /// ```
    /// use slot_pool::{ByDeref, HashPool};
    ///
    /// let mut pool = HashPool::<String, ByDeref>::new();
    ///
    /// let (index, inserted) = pool
    ///     .find_or_insert_value_slot("foo", |_| "foo".to_string())
    ///     .unwrap();
    /// assert!(inserted);
    ///
    /// let (again, inserted) = pool
    ///     .find_or_insert_value_slot("foo", |_| unreachable!())
    ///     .unwrap();
    /// assert_eq!(again, index);
    /// assert!(!inserted);
    /// ```
    pub fn find_or_insert_value_slot(
        &mut self,
        key: &X::Key,
        f: impl FnOnce(usize) -> T,
    ) -> Result<(usize, bool)> {
        let bucket = self.bucket_of(key);

        if let Some(index) = self
            .chain_of(bucket)
            .find(|&index| self.key_matches(index, key))
        {
            return Ok((index, false));
        }

        let index = self.pool.add_with(f)?;

        debug_assert!(
            self.key_matches(index, key),
            "element created for a key lookup does not carry the key"
        );

        self.link(bucket, index);

        Ok((index, true))
    }

    /// Inserts `value` and returns its index, even if an element with an equal key exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`] if the storage needs to grow and cannot.
    pub fn insert_value_slot(&mut self, value: T) -> Result<usize> {
        let bucket = self.bucket_of(X::extract(&value));
        let index = self.pool.add(value)?;

        self.link(bucket, index);

        Ok(index)
    }

    /// Deletes the element in slot `index` and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if `index` is not a slot of this pool and
    /// [`Error::NotAllocated`] if the slot holds no element.
    pub fn del(&mut self, index: usize) -> Result<T> {
        if !self.pool.is_allocated(index) {
            return Err(if index < self.pool.storage_len() {
                Error::NotAllocated { index }
            } else {
                Error::OutOfBounds {
                    index,
                    storage_len: self.pool.storage_len(),
                }
            });
        }

        let bucket = self
            .chain
            .get(index)
            .map(|link| link.bucket)
            .expect("every allocated slot has a chain link");
        self.unlink(bucket, index);

        self.pool.del(index)
    }

    /// Deletes every element whose key equals `key` and returns how many there were.
    pub fn erase(&mut self, key: &X::Key) -> usize {
        let bucket = self.bucket_of(key);

        let mut erased: usize = 0;
        let mut previous: Option<usize> = None;
        let mut current = self.bucket_head(bucket);

        while let Some(index) = current {
            let next = self.next_in_chain(index);

            if !self.key_matches(index, key) {
                previous = Some(index);
                current = next;
                continue;
            }

            self.set_link(bucket, previous, next);
            self.set_next_in_chain(index, None);

            if self.pool.del(index).is_ok() {
                // Cannot overflow, every erased element occupied a distinct slot.
                erased = erased.wrapping_add(1);
            }

            current = next;
        }

        erased
    }

    /// Returns the element in slot `index`, if any.
    #[must_use]
    pub fn get_item(&self, index: usize) -> Option<&T> {
        self.pool.get_item(index)
    }

    /// Returns the element in slot `index` for modification, if any.
    ///
    /// If the key of the element is changed, lookups by key will not find the element until
    /// [`rebuild_buckets()`](Self::rebuild_buckets) re-indexes the pool. Deleting it by index
    /// keeps working.
    #[must_use]
    pub fn get_item_mut(&mut self, index: usize) -> Option<&mut T> {
        self.pool.get_item_mut(index)
    }

    /// Iterates over the elements in index order.
    pub fn iter(&self) -> Iter<'_, T> {
        self.pool.iter()
    }

    /// Marks slot `index` as modified in the current frame. Does nothing without change
    /// tracking.
    pub fn set_modified(&mut self, index: usize) {
        self.pool.set_modified(index);
    }

    /// Re-buckets every element into `bucket_count` buckets.
    ///
    /// Keys are extracted afresh, so this also re-indexes elements whose key was changed
    /// through [`get_item_mut()`](Self::get_item_mut).
    ///
    /// Among elements with equal keys, lookups afterwards prefer the one with the highest
    /// index rather than the most recently inserted one.
    ///
    /// # Panics
    ///
    /// Panics if `bucket_count` is zero.
    pub fn rebuild_buckets(&mut self, bucket_count: usize) {
        let bucket_count =
            NonZero::new(bucket_count).expect("HashPool bucket count must be non-zero");

        let old_bucket_count = mem::replace(&mut self.bucket_count, bucket_count);
        self.buckets = vec![None; bucket_count.get()];
        self.chain.reset();

        let indices: Vec<usize> = self.pool.indices().collect();
        for index in indices {
            let Some(item) = self.pool.get_item(index) else {
                continue;
            };

            let bucket = self.bucket_of(X::extract(item));
            self.link(bucket, index);
        }

        debug!(
            old_bucket_count = old_bucket_count.get(),
            new_bucket_count = bucket_count.get(),
            len = self.pool.len(),
            "hash pool buckets rebuilt"
        );
    }

    fn bucket_of(&self, key: &X::Key) -> usize {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "dropping the high bits of the hash on 32-bit targets only loses entropy"
        )]
        let hash = self.hasher.hash_one(key) as usize;

        hash % self.bucket_count
    }

    fn key_matches(&self, index: usize, key: &X::Key) -> bool {
        self.pool
            .get_item(index)
            .is_some_and(|item| X::extract(item) == key)
    }

    fn bucket_head(&self, bucket: usize) -> Option<usize> {
        self.buckets.get(bucket).copied().flatten()
    }

    fn next_in_chain(&self, index: usize) -> Option<usize> {
        self.chain.get(index).and_then(|link| link.next)
    }

    fn set_next_in_chain(&mut self, index: usize, next: Option<usize>) {
        if let Some(link) = self.chain.get_mut(index) {
            link.next = next;
        }
    }

    /// Points either the bucket head or the chain entry of `previous` at `next`.
    fn set_link(&mut self, bucket: usize, previous: Option<usize>, next: Option<usize>) {
        match previous {
            Some(previous) => self.set_next_in_chain(previous, next),
            None => {
                if let Some(head) = self.buckets.get_mut(bucket) {
                    *head = next;
                }
            }
        }
    }

    fn chain_of(&self, bucket: usize) -> impl Iterator<Item = usize> + '_ {
        let mut current = self.bucket_head(bucket);

        iter::from_fn(move || {
            let index = current?;
            current = self.next_in_chain(index);
            Some(index)
        })
    }

    /// Makes freshly allocated `index` the head of `bucket`'s chain.
    fn link(&mut self, bucket: usize, index: usize) {
        self.chain.resize(self.pool.storage_len());

        let next = self.bucket_head(bucket);
        if let Some(link) = self.chain.get_mut(index) {
            *link = ChainLink { next, bucket };
        }
        self.set_link(bucket, None, Some(index));
    }

    fn unlink(&mut self, bucket: usize, index: usize) {
        let mut previous = None;
        let mut current = self.bucket_head(bucket);

        while let Some(candidate) = current {
            let next = self.next_in_chain(candidate);

            if candidate == index {
                self.set_link(bucket, previous, next);
                self.set_next_in_chain(index, None);
                return;
            }

            previous = Some(candidate);
            current = next;
        }

        panic!("slot {index} is allocated but missing from the chain of bucket {bucket}");
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    /// Verifies the hash index against the pool contents, panicking on any inconsistency.
    ///
    /// Only available in debug builds.
    pub fn integrity_check(&self) {
        self.pool.integrity_check();

        let storage_len = self.pool.storage_len();
        assert_eq!(
            self.chain.len(),
            storage_len,
            "chain array covers {} slots but storage has {storage_len}",
            self.chain.len()
        );
        assert_eq!(self.buckets.len(), self.bucket_count.get());

        let mut seen = vec![false; storage_len];
        let mut linked: usize = 0;

        for bucket in 0..self.buckets.len() {
            for index in self.chain_of(bucket) {
                assert!(
                    self.pool.is_allocated(index),
                    "bucket {bucket} links to vacant slot {index}"
                );

                let seen = seen
                    .get_mut(index)
                    .unwrap_or_else(|| panic!("bucket {bucket} links to unknown slot {index}"));
                assert!(!*seen, "slot {index} is linked more than once");
                *seen = true;

                let link = self.chain.get(index).copied().unwrap_or_default();
                assert_eq!(
                    link.bucket, bucket,
                    "slot {index} is chained in bucket {bucket} but records bucket {}",
                    link.bucket
                );

                linked = linked.wrapping_add(1);
            }
        }

        assert_eq!(linked, self.pool.len(), "not every element is indexed");
    }
}

impl<T, X, S> HashPool<T, X, S, ChangeTracking>
where
    X: KeyExtractor<T>,
    S: BuildHasher,
{
    /// Completes the current frame and starts the next one. See
    /// [`SlotPool::advance_frame()`].
    pub fn advance_frame(&mut self) {
        self.pool.advance_frame();
    }
}

impl<T: fmt::Debug, X, S, K: Tracking> fmt::Debug for HashPool<T, X, S, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashPool")
            .field("pool", &self.pool)
            .field("bucket_count", &self.bucket_count)
            .field("buckets", &self.buckets)
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

impl<'a, T, X, S, K: Tracking> IntoIterator for &'a HashPool<T, X, S, K> {
    type Item = (usize, &'a T);
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.pool.iter()
    }
}

impl<T, X, S, K> Extend<T> for HashPool<T, X, S, K>
where
    X: KeyExtractor<T>,
    S: BuildHasher,
    K: Tracking,
{
    /// Inserts every element of `iter`, in order.
    ///
    /// # Panics
    ///
    /// Panics if the storage needs to grow and cannot.
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            if let Err(error) = self.insert_value_slot(value) {
                panic!("cannot extend HashPool: {error}");
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(clippy::arithmetic_side_effects, reason = "test code")]
mod tests {
    use std::hash::{BuildHasherDefault, Hasher};

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::{ByDeref, ByValue};

    assert_impl_all!(HashPool<String, ByDeref>: Send, Sync);

    /// Sends every key to the same bucket, so chains contain every element.
    #[derive(Default)]
    struct CollidingHasher;

    impl Hasher for CollidingHasher {
        fn finish(&self) -> u64 {
            0
        }

        fn write(&mut self, _bytes: &[u8]) {}
    }

    type Colliding = BuildHasherDefault<CollidingHasher>;

    fn strings(pool: &HashPool<String, ByDeref>) -> Vec<&str> {
        pool.iter().map(|(_, value)| value.as_str()).collect()
    }

    #[test]
    fn smoke_test() {
        let mut pool = HashPool::<String, ByDeref>::new();

        let foo = pool.insert_value_slot("foo".to_string()).unwrap();
        let bar = pool.insert_value_slot("bar".to_string()).unwrap();

        assert_eq!(pool.find_value("foo"), Some(foo));
        assert_eq!(pool.get_value("bar").map(String::as_str), Some("bar"));
        assert_eq!(pool.find_value("baz"), None);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.bucket_count(), 64);
        assert_eq!(strings(&pool), vec!["foo", "bar"]);

        assert_eq!(pool.del(bar).unwrap(), "bar");
        assert_eq!(pool.find_value("bar"), None);

        pool.integrity_check();
    }

    #[test]
    fn duplicates_are_found_newest_first_and_counted() {
        let mut pool = HashPool::<u32, ByValue>::new();

        let first = pool.insert_value_slot(7).unwrap();
        let second = pool.insert_value_slot(7).unwrap();

        assert_ne!(first, second);
        assert_eq!(pool.find_value(&7), Some(second));
        assert_eq!(pool.count(&7), 2);

        pool.del(second).unwrap();
        assert_eq!(pool.find_value(&7), Some(first));
        pool.integrity_check();
    }

    #[test]
    fn erase_removes_every_match_even_when_not_adjacent() {
        let mut pool = HashPool::<String, ByDeref, Colliding>::builder().build();

        for key in ["foo", "bar", "foo", "baz", "foo"] {
            pool.insert_value_slot(key.to_string()).unwrap();
        }

        assert_eq!(pool.erase("foo"), 3);
        assert_eq!(pool.count("foo"), 0);
        assert_eq!(pool.len(), 2);
        assert!(pool.find_value("bar").is_some());
        assert!(pool.find_value("baz").is_some());
        pool.integrity_check();
    }

    #[test]
    fn erase_missing_key_returns_zero() {
        let mut pool = HashPool::<String, ByDeref>::new();
        pool.insert_value_slot("a".to_string()).unwrap();

        assert_eq!(pool.erase("b"), 0);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn colliding_keys_stay_distinguishable() {
        let mut pool = HashPool::<u32, ByValue, Colliding>::builder()
            .bucket_count(4)
            .build();

        for value in 0..20 {
            pool.insert_value_slot(value).unwrap();
        }

        for value in 0..20 {
            assert_eq!(pool.find_value(&value), Some(value as usize));
        }

        pool.del(10).unwrap();
        pool.del(0).unwrap();
        pool.del(19).unwrap();

        assert_eq!(pool.find_value(&10), None);
        assert_eq!(pool.find_value(&11), Some(11));
        pool.integrity_check();
    }

    #[test]
    fn find_or_insert_inserts_once() {
        let mut pool = HashPool::<String, ByDeref>::new();

        let (index, inserted) = pool
            .find_or_insert_value_slot("x", |_| "x".to_string())
            .unwrap();
        assert!(inserted);

        let (again, inserted) = pool
            .find_or_insert_value_slot("x", |_| "x".to_string())
            .unwrap();
        assert!(!inserted);
        assert_eq!(again, index);
        assert_eq!(pool.len(), 1);
        pool.integrity_check();
    }

    #[test]
    fn slots_freed_by_del_are_relinked_on_reuse() {
        let mut pool = HashPool::<u32, ByValue>::new();

        let a = pool.insert_value_slot(1).unwrap();
        pool.insert_value_slot(2).unwrap();
        pool.del(a).unwrap();

        let reused = pool.insert_value_slot(3).unwrap();
        assert_eq!(reused, a);
        assert_eq!(pool.find_value(&3), Some(a));
        assert_eq!(pool.find_value(&1), None);
        pool.integrity_check();
    }

    #[test]
    fn del_errors_match_slot_pool() {
        let mut pool = HashPool::<u32, ByValue>::new();
        let index = pool.insert_value_slot(1).unwrap();
        pool.del(index).unwrap();

        assert!(matches!(
            pool.del(index),
            Err(Error::NotAllocated { index: 0 })
        ));
        assert!(matches!(pool.del(9), Err(Error::OutOfBounds { .. })));
    }

    #[test]
    fn rebuild_buckets_keeps_every_element_findable() {
        let mut pool = HashPool::<u32, ByValue>::builder().bucket_count(2).build();
        pool.extend(0..100);
        pool.del(50).unwrap();

        pool.rebuild_buckets(257);

        assert_eq!(pool.bucket_count(), 257);
        for value in (0..100).filter(|value| *value != 50) {
            assert_eq!(pool.find_value(&value), Some(value as usize));
        }
        assert_eq!(pool.find_value(&50), None);
        pool.integrity_check();
    }

    #[test]
    #[should_panic]
    fn rebuild_with_zero_buckets_panics() {
        let mut pool = HashPool::<u32, ByValue>::new();
        pool.rebuild_buckets(0);
    }

    #[test]
    fn tracking_passes_through_to_pool() {
        let mut pool =
            HashPool::<u32, ByValue, foldhash::fast::RandomState, ChangeTracking>::builder()
                .build();

        let index = pool.insert_value_slot(5).unwrap();

        assert!(
            pool.pool()
                .changeset(index)
                .unwrap()
                .is_modified_in_current_frame()
        );

        pool.advance_frame();
        pool.advance_frame();

        assert_eq!(pool.pool().frame(), Some(2));
        assert!(!pool.pool().is_modified(index, 0));
        assert!(pool.pool().is_modified(index, -1));
    }

    #[test]
    fn del_after_key_changed_in_place() {
        let mut pool = HashPool::<u32, ByValue>::builder().bucket_count(64).build();
        pool.extend(0..64);

        *pool.get_item_mut(63).unwrap() = 1000;

        assert_eq!(pool.del(63).unwrap(), 1000);
        assert_eq!(pool.find_value(&63), None);
        assert_eq!(pool.find_value(&1000), None);
        assert_eq!(pool.len(), 63);
        pool.integrity_check();
    }

    #[test]
    fn rebuild_reindexes_keys_changed_in_place() {
        let mut pool = HashPool::<u32, ByValue>::builder().bucket_count(8).build();
        pool.extend(0..8);

        *pool.get_item_mut(3).unwrap() = 300;

        // Key lookups only see the new key once the pool has been re-indexed.
        pool.rebuild_buckets(8);

        assert_eq!(pool.find_value(&300), Some(3));
        assert_eq!(pool.find_value(&3), None);
        assert_eq!(pool.erase(&300), 1);
        pool.integrity_check();
    }
}
