use std::cmp::Ordering;
use std::iter::{Enumerate, FusedIterator};
use std::{fmt, mem, slice, thread};

use tracing::{debug, trace};

use crate::{
    ChangeMask, ChangeTracking, Changeset, DropPolicy, Error, NoTracking, Result, SlotPoolBuilder,
    Tracking,
};

/// A growable object pool that hands out stable indices.
///
/// Elements never move between slots: an index stays valid until the element stored there is
/// deleted. Deleted slots are threaded onto a free list that lives inside the vacant slots
/// themselves, so no separate free-list array exists. The most recently freed slot is reused
/// first.
///
/// The second type parameter selects optional change tracking. With the default
/// [`NoTracking`], tracking costs nothing; with [`ChangeTracking`], every mutation through the
/// pool marks the affected slot as modified in the current frame.
///
/// # Examples
///
/// ```
/// use slot_pool::SlotPool;
///
/// let mut pool = SlotPool::new();
///
/// let a = pool.add("a").unwrap();
/// let b = pool.add("b").unwrap();
/// let c = pool.add("c").unwrap();
/// assert_eq!((a, b, c), (0, 1, 2));
///
/// assert_eq!(pool.del(b).unwrap(), "b");
///
/// // The freed slot is reused before the pool grows.
/// assert_eq!(pool.add("d").unwrap(), 1);
/// assert_eq!(pool.get_item(1), Some(&"d"));
/// ```
///
/// # Thread safety
///
/// The pool is [`Send`] and [`Sync`] whenever `T` is. It performs no internal synchronization;
/// all mutation requires `&mut self`.
pub struct SlotPool<T, K: Tracking = NoTracking> {
    slots: Vec<Slot<T>>,

    /// Head of the free list threaded through the vacant slots.
    first_free: Option<usize>,

    /// Number of occupied slots. We track this explicitly to avoid scanning the storage.
    length: usize,

    tracking: K,

    drop_policy: DropPolicy,
}

/// Identifies one particular element of a [`SlotPool`], as opposed to whatever element
/// currently occupies the slot.
///
/// Slot indices are reused after deletion. A key remembers the generation of the slot at the
/// time the key was taken, so lookups through a stale key fail instead of returning the
/// element that reused the slot.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SlotKey {
    index: usize,
    generation: u32,
}

impl SlotKey {
    /// The slot index of the element.
    #[must_use]
    pub fn index(self) -> usize {
        self.index
    }

    /// The generation of the slot when the key was taken.
    #[must_use]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

#[derive(Clone, Debug)]
struct Slot<T> {
    /// Incremented whenever the slot is vacated.
    generation: u32,

    entry: Entry<T>,
}

#[derive(Clone, Debug)]
enum Entry<T> {
    Occupied(T),

    /// Part of the free list. `None` terminates the list.
    Vacant { next_free: Option<usize> },
}

/// Where a slot sits in the free list, for unlinking it.
#[derive(Clone, Copy, Debug)]
enum FreeListPosition {
    Head,
    After(usize),
}

impl<T> SlotPool<T> {
    /// Creates an empty pool without change tracking.
    ///
    /// Use [`builder()`](Self::builder) to enable tracking or configure the pool.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates an empty pool with room for at least `capacity` slots before it needs to grow.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::builder().capacity(capacity).build()
    }
}

impl<T> Default for SlotPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, K: Tracking> SlotPool<T, K> {
    /// Creates a builder for configuring and constructing a [`SlotPool`].
    ///
    /// # Example
    ///
    /// ```
    /// use slot_pool::{ChangeTracking, DropPolicy, SlotPool};
    ///
    /// let pool = SlotPool::<String, ChangeTracking>::builder()
    ///     .capacity(64)
    ///     .drop_policy(DropPolicy::MustNotDropItems)
    ///     .build();
    ///
    /// assert_eq!(pool.frame(), Some(0));
    /// ```
    pub fn builder() -> SlotPoolBuilder<T, K> {
        SlotPoolBuilder::new()
    }

    pub(crate) fn new_inner(capacity: usize, drop_policy: DropPolicy) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            first_free: None,
            length: 0,
            tracking: K::default(),
            drop_policy,
        }
    }

    /// The number of elements in the pool.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether the pool holds no elements. An empty pool may still own storage.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The number of slots in the backing storage, occupied or vacant.
    ///
    /// Storage only ever grows. Every valid index is less than this.
    #[must_use]
    #[inline]
    pub fn storage_len(&self) -> usize {
        self.slots.len()
    }

    /// The number of slots the pool can hold before its storage is reallocated.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Whether slot `index` holds an element.
    #[must_use]
    pub fn is_allocated(&self, index: usize) -> bool {
        self.get_item(index).is_some()
    }

    /// Inserts `value` and returns its index.
    ///
    /// Reuses the most recently freed slot if there is one, otherwise appends a slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`] if the storage needs to grow and cannot.
    pub fn add(&mut self, value: T) -> Result<usize> {
        self.add_with(|_| value)
    }

    /// Inserts a default-constructed element and returns its index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`] if the storage needs to grow and cannot.
    pub fn add_default(&mut self) -> Result<usize>
    where
        T: Default,
    {
        self.add_with(|_| T::default())
    }

    /// Allocates a slot and fills it with the element returned by `f`, which receives the index
    /// of the slot being filled.
    ///
    /// If `f` panics, the pool is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`] if the storage needs to grow and cannot.
    ///
    /// # Example
    ///
    /// ```
    /// use slot_pool::SlotPool;
    ///
    /// #[derive(Debug)]
    /// struct Node {
    ///     id: usize,
    /// }
    ///
    /// let mut pool = SlotPool::new();
    /// let index = pool.add_with(|id| Node { id }).unwrap();
    ///
    /// assert_eq!(pool.get_item(index).unwrap().id, index);
    /// ```
    pub fn add_with(&mut self, f: impl FnOnce(usize) -> T) -> Result<usize> {
        let index = match self.first_free {
            Some(index) => {
                let value = f(index);
                let next_free = self.next_free_of(index);
                self.first_free = next_free;
                self.occupy(index, value);
                index
            }
            None => {
                self.reserve_slots(1)?;
                let index = self.slots.len();
                let value = f(index);
                self.push_slot(Entry::Occupied(value));
                index
            }
        };

        // Cannot overflow, we would run out of memory first.
        self.length = self.length.wrapping_add(1);
        self.tracking.set_modified(index);

        Ok(index)
    }

    /// Deletes the element in slot `index` and returns it. The slot becomes the head of the
    /// free list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if `index` is not a slot of this pool and
    /// [`Error::NotAllocated`] if the slot holds no element.
    pub fn del(&mut self, index: usize) -> Result<T> {
        let storage_len = self.slots.len();
        let first_free = self.first_free;

        let slot = self.slots.get_mut(index).ok_or(Error::OutOfBounds {
            index,
            storage_len,
        })?;

        match mem::replace(
            &mut slot.entry,
            Entry::Vacant {
                next_free: first_free,
            },
        ) {
            Entry::Occupied(value) => {
                slot.generation = slot.generation.wrapping_add(1);
                self.first_free = Some(index);

                // Cannot underflow, the slot was occupied.
                self.length = self.length.wrapping_sub(1);
                self.tracking.set_modified(index);

                Ok(value)
            }
            vacant @ Entry::Vacant { .. } => {
                slot.entry = vacant;
                Err(Error::NotAllocated { index })
            }
        }
    }

    /// Returns the element in slot `index`, or `None` if the slot is vacant or does not exist.
    #[must_use]
    pub fn get_item(&self, index: usize) -> Option<&T> {
        match self.slots.get(index).map(|slot| &slot.entry) {
            Some(Entry::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    /// Returns the element in slot `index` for modification, or `None` if the slot is vacant or
    /// does not exist.
    ///
    /// With change tracking enabled, the slot is marked as modified even if the caller ends up
    /// not writing through the reference.
    #[must_use]
    pub fn get_item_mut(&mut self, index: usize) -> Option<&mut T> {
        match self.slots.get_mut(index).map(|slot| &mut slot.entry) {
            Some(Entry::Occupied(value)) => {
                self.tracking.set_modified(index);
                Some(value)
            }
            _ => None,
        }
    }

    /// Returns the element in slot `index`, creating a default element there if the slot is
    /// free or does not exist yet.
    ///
    /// See [`get_or_create_with()`](Self::get_or_create_with) for details.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFree`] if slot `index` already holds an element and
    /// [`Error::Allocation`] if the storage needs to grow and cannot.
    pub fn get_or_create(&mut self, index: usize) -> Result<&mut T>
    where
        T: Default,
    {
        self.get_or_create_with(index, |_| T::default())
    }

    /// Allocates the specific slot `index`, filling it with the element returned by `f`.
    ///
    /// * If `index` is the next slot past the end of the storage, a slot is appended.
    /// * If `index` is further past the end, the storage is extended up to and including
    ///   `index`. The slots in between are placed on the free list in ascending order, ahead of
    ///   any slots that were already free.
    /// * If `index` is within the storage, the slot must currently be free.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFree`] if slot `index` already holds an element and
    /// [`Error::Allocation`] if the storage needs to grow and cannot.
    ///
    /// # Example
    ///
    /// ```
    /// use slot_pool::SlotPool;
    ///
    /// let mut pool = SlotPool::<u32>::new();
    /// *pool.get_or_create(5).unwrap() = 55;
    ///
    /// assert_eq!(pool.storage_len(), 6);
    /// assert_eq!(pool.len(), 1);
    ///
    /// // Slots 0 to 4 are free and can be claimed individually.
    /// *pool.get_or_create(2).unwrap() = 22;
    /// assert!(pool.get_or_create(5).is_err());
    /// ```
    pub fn get_or_create_with(
        &mut self,
        index: usize,
        f: impl FnOnce(usize) -> T,
    ) -> Result<&mut T> {
        let storage_len = self.slots.len();

        match index.cmp(&storage_len) {
            Ordering::Less => {
                let position = self
                    .free_list_position(index)
                    .ok_or(Error::NotFree { index })?;

                let value = f(index);
                self.unlink_free(index, position);
                self.occupy(index, value);
            }
            Ordering::Equal => {
                self.reserve_slots(1)?;
                let value = f(index);
                self.push_slot(Entry::Occupied(value));
            }
            Ordering::Greater => {
                // Cannot overflow, index > storage_len.
                let gap = index.wrapping_sub(storage_len);
                self.reserve_slots(gap.saturating_add(1))?;

                let value = f(index);

                // The gap slots link to each other in ascending order, the last one links to
                // whatever was free before.
                for gap_index in storage_len..index {
                    // Cannot overflow, gap_index < index.
                    let next = gap_index.wrapping_add(1);
                    let next_free = if next < index {
                        Some(next)
                    } else {
                        self.first_free
                    };

                    self.push_slot(Entry::Vacant { next_free });
                }

                self.first_free = Some(storage_len);
                self.push_slot(Entry::Occupied(value));
            }
        }

        // Cannot overflow, we would run out of memory first.
        self.length = self.length.wrapping_add(1);
        self.tracking.set_modified(index);

        Ok(self.occupied_mut(index))
    }

    /// Returns a key that identifies the element currently in slot `index`.
    #[must_use]
    pub fn key_of(&self, index: usize) -> Option<SlotKey> {
        let slot = self.slots.get(index)?;

        match slot.entry {
            Entry::Occupied(_) => Some(SlotKey {
                index,
                generation: slot.generation,
            }),
            Entry::Vacant { .. } => None,
        }
    }

    /// Returns the element identified by `key`, or `None` if it has been deleted since the key
    /// was taken.
    #[must_use]
    pub fn get_by_key(&self, key: SlotKey) -> Option<&T> {
        let slot = self.slots.get(key.index)?;

        if slot.generation != key.generation {
            return None;
        }

        match &slot.entry {
            Entry::Occupied(value) => Some(value),
            Entry::Vacant { .. } => None,
        }
    }

    /// Returns the element identified by `key` for modification, or `None` if it has been
    /// deleted since the key was taken.
    #[must_use]
    pub fn get_by_key_mut(&mut self, key: SlotKey) -> Option<&mut T> {
        let generation = self.slots.get(key.index)?.generation;

        if generation != key.generation {
            return None;
        }

        self.get_item_mut(key.index)
    }

    /// Calls `f` with the index and element of every occupied slot, in index order.
    pub fn for_each(&self, mut f: impl FnMut(usize, &T)) {
        for (index, value) in self {
            f(index, value);
        }
    }

    /// Calls `f` with the index and element of every occupied slot, in index order, allowing
    /// modification. Every visited slot counts as modified.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(usize, &mut T)) {
        for (index, value) in self.iter_mut() {
            f(index, value);
        }
    }

    /// Returns the index of the first occupied slot whose element satisfies `predicate`.
    #[must_use]
    pub fn find_if(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<usize> {
        self.iter()
            .find(|(_, value)| predicate(value))
            .map(|(index, _)| index)
    }

    /// Iterates over the occupied slots in index order.
    ///
    /// This is also how a serializer sees the pool: vacant slots are skipped and a pool with
    /// the same elements can be rebuilt via [`FromIterator`] or [`Extend`].
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            inner: self.slots.iter().enumerate(),
        }
    }

    /// Iterates over the occupied slots in index order, allowing modification.
    ///
    /// Every visited slot counts as modified.
    pub fn iter_mut(&mut self) -> IterMut<'_, T, K> {
        IterMut {
            inner: self.slots.iter_mut().enumerate(),
            tracking: &mut self.tracking,
        }
    }

    /// Iterates over the indices of the occupied slots in index order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.iter().map(|(index, _)| index)
    }

    /// Deletes every element. The storage is kept and all slots go onto the free list in
    /// ascending order.
    pub fn clear(&mut self) {
        let storage_len = self.slots.len();

        for (index, slot) in self.slots.iter_mut().enumerate() {
            // Cannot overflow, index < storage_len.
            let next = index.wrapping_add(1);
            let next_free = (next < storage_len).then_some(next);

            if let Entry::Occupied(_) = mem::replace(&mut slot.entry, Entry::Vacant { next_free })
            {
                slot.generation = slot.generation.wrapping_add(1);
                self.tracking.set_modified(index);
            }
        }

        self.first_free = (storage_len > 0).then_some(0);
        self.length = 0;
    }

    /// Marks slot `index` as modified in the current frame.
    ///
    /// Mutations through the pool do this automatically. This is for changes the pool cannot
    /// see, e.g. through interior mutability. Does nothing without change tracking.
    pub fn set_modified(&mut self, index: usize) {
        self.tracking.set_modified(index);
    }

    /// The change history of slot `index`, or `None` without change tracking.
    #[must_use]
    pub fn changeset(&self, index: usize) -> Option<Changeset> {
        self.tracking.changeset(index)
    }

    /// The change history of every slot, or `None` without change tracking.
    #[must_use]
    pub fn changesets(&self) -> Option<&[Changeset]> {
        self.tracking.changesets()
    }

    /// The current frame, or `None` without change tracking.
    #[must_use]
    pub fn frame(&self) -> Option<u64> {
        self.tracking.frame()
    }

    fn reserve_slots(&mut self, additional: usize) -> Result<()> {
        // Cannot underflow, a Vec never holds more than its capacity.
        if self.slots.capacity().wrapping_sub(self.slots.len()) >= additional {
            return Ok(());
        }

        let old_capacity = self.slots.capacity();
        self.slots.try_reserve(additional)?;

        debug!(
            old_capacity,
            new_capacity = self.slots.capacity(),
            "slot pool storage grown"
        );

        Ok(())
    }

    /// Appends a slot. Capacity must have been reserved beforehand.
    fn push_slot(&mut self, entry: Entry<T>) {
        debug_assert!(self.slots.len() < self.slots.capacity());

        self.slots.push(Slot {
            generation: 0,
            entry,
        });

        self.tracking.resize(self.slots.len());
    }

    fn next_free_of(&self, index: usize) -> Option<usize> {
        match self.slots.get(index).map(|slot| &slot.entry) {
            Some(Entry::Vacant { next_free }) => *next_free,
            _ => panic!("free list links to slot {index}, which is not a vacant slot"),
        }
    }

    fn free_list_position(&self, index: usize) -> Option<FreeListPosition> {
        let mut position = FreeListPosition::Head;
        let mut current = self.first_free;

        while let Some(free_index) = current {
            if free_index == index {
                return Some(position);
            }

            position = FreeListPosition::After(free_index);
            current = self.next_free_of(free_index);
        }

        None
    }

    fn unlink_free(&mut self, index: usize, position: FreeListPosition) {
        let next_free = self.next_free_of(index);

        match position {
            FreeListPosition::Head => self.first_free = next_free,
            FreeListPosition::After(previous) => {
                if let Some(Slot {
                    entry: Entry::Vacant { next_free: link },
                    ..
                }) = self.slots.get_mut(previous)
                {
                    *link = next_free;
                }
            }
        }
    }

    /// Puts `value` into a vacant slot that has already been unlinked from the free list.
    fn occupy(&mut self, index: usize, value: T) {
        let slot = self
            .slots
            .get_mut(index)
            .expect("occupied slot index is within storage");

        debug_assert!(matches!(slot.entry, Entry::Vacant { .. }));

        slot.entry = Entry::Occupied(value);
    }

    fn occupied_mut(&mut self, index: usize) -> &mut T {
        match self.slots.get_mut(index).map(|slot| &mut slot.entry) {
            Some(Entry::Occupied(value)) => value,
            _ => panic!("slot {index} was expected to be occupied"),
        }
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    /// Verifies the internal bookkeeping of the pool, panicking on any inconsistency.
    ///
    /// Only available in debug builds. Runs in time proportional to the storage length.
    pub fn integrity_check(&self) {
        let storage_len = self.slots.len();
        let mut on_free_list = vec![false; storage_len];
        let mut free_list_len: usize = 0;
        let mut current = self.first_free;

        while let Some(index) = current {
            let seen = on_free_list
                .get_mut(index)
                .unwrap_or_else(|| panic!("free list links to out-of-bounds slot {index}"));

            assert!(!*seen, "free list contains a cycle through slot {index}");
            *seen = true;
            free_list_len = free_list_len.wrapping_add(1);

            current = self.next_free_of(index);
        }

        let occupied = self
            .slots
            .iter()
            .filter(|slot| matches!(slot.entry, Entry::Occupied(_)))
            .count();

        assert_eq!(
            occupied, self.length,
            "pool length {} does not match the {occupied} occupied slots",
            self.length
        );

        assert_eq!(
            free_list_len.wrapping_add(occupied),
            storage_len,
            "free list has {free_list_len} slots, occupied {occupied}, storage {storage_len}"
        );

        if let Some(changesets) = self.tracking.changesets() {
            assert_eq!(
                changesets.len(),
                storage_len,
                "change tracking covers {} slots but storage has {storage_len}",
                changesets.len()
            );
        }
    }
}

/// Queries and frame handling that only exist with change tracking enabled.
impl<T> SlotPool<T, ChangeTracking> {
    /// Calls `f` for every occupied slot modified within the window selected by `rel_frame`.
    ///
    /// `rel_frame` is zero or negative. Zero selects the most recently completed frame, `-1`
    /// additionally the frame before it, and so on. Modifications made in the current,
    /// still incomplete frame are always included.
    ///
    /// If the window reaches further back than the tracked history, every occupied slot is
    /// visited, as nothing can be ruled out.
    ///
    /// # Panics
    ///
    /// Panics if `rel_frame` is positive.
    pub fn for_each_modified(&self, rel_frame: i64, mut f: impl FnMut(usize, &T)) {
        self.for_each_modified_slot(rel_frame, |index, value| {
            if let Some(value) = value {
                f(index, value);
            }
        });
    }

    /// Like [`for_each_modified()`](Self::for_each_modified) but also visits vacant slots,
    /// which lets a reader observe deletions.
    ///
    /// # Panics
    ///
    /// Panics if `rel_frame` is positive.
    pub fn for_each_modified_slot(&self, rel_frame: i64, mut f: impl FnMut(usize, Option<&T>)) {
        let mask = self.modified_mask(rel_frame);

        let changesets = self.tracking.changesets().unwrap_or_default();

        for ((index, slot), changeset) in self.slots.iter().enumerate().zip(changesets) {
            if !changeset.intersects(mask) {
                continue;
            }

            match &slot.entry {
                Entry::Occupied(value) => f(index, Some(value)),
                Entry::Vacant { .. } => f(index, None),
            }
        }
    }

    /// Whether slot `index` was modified within the window selected by `rel_frame`.
    ///
    /// See [`for_each_modified()`](Self::for_each_modified) for the meaning of `rel_frame`.
    ///
    /// # Panics
    ///
    /// Panics if `rel_frame` is positive.
    #[must_use]
    pub fn is_modified(&self, index: usize, rel_frame: i64) -> bool {
        let mask = self.modified_mask(rel_frame);

        self.tracking
            .changeset(index)
            .is_some_and(|changeset| changeset.intersects(mask))
    }

    /// Marks every occupied slot as modified in the current frame.
    ///
    /// Use this after wholesale changes the pool cannot see, so that no reader can miss them.
    pub fn mark_all_modified(&mut self) {
        for (index, slot) in self.slots.iter().enumerate() {
            if let Entry::Occupied(_) = slot.entry {
                self.tracking.set_modified(index);
            }
        }
    }

    pub(crate) fn tracking(&self) -> &ChangeTracking {
        &self.tracking
    }

    /// Continues the change history of `source` in this pool, then sizes it to this pool's
    /// storage.
    pub(crate) fn adopt_history(&mut self, source: &ChangeTracking) {
        self.tracking.clone_from(source);
        self.tracking.resize(self.slots.len());
    }

    /// Completes the current frame and starts the next one.
    ///
    /// Modifications made so far move into the history of every slot, where queries with a
    /// negative `rel_frame` can still see them.
    ///
    /// # Example
    ///
    /// ```
    /// use slot_pool::{ChangeTracking, SlotPool};
    ///
    /// let mut pool = SlotPool::<u32, ChangeTracking>::builder().build();
    /// let index = pool.add(1).unwrap();
    ///
    /// pool.advance_frame();
    /// pool.advance_frame();
    ///
    /// assert_eq!(pool.frame(), Some(2));
    /// assert!(!pool.is_modified(index, 0));
    /// assert!(pool.is_modified(index, -1));
    /// ```
    pub fn advance_frame(&mut self) {
        self.tracking.advance_frame();
    }

    fn modified_mask(&self, rel_frame: i64) -> ChangeMask {
        assert!(
            rel_frame <= 0,
            "rel_frame must be zero or negative, got {rel_frame}"
        );

        // rel_frame 0 looks back to the most recently completed frame.
        let frames_back = rel_frame.unsigned_abs().saturating_add(1);
        let mask = self.tracking.mask_since_frames_back(frames_back);

        if mask == ChangeMask::Everything {
            trace!(
                rel_frame,
                frame = self.tracking.current_frame(),
                "modified-slot query reaches past tracked history"
            );
        }

        mask
    }
}

impl<T: Clone, K: Tracking> Clone for SlotPool<T, K> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
            first_free: self.first_free,
            length: self.length,
            tracking: self.tracking.clone(),
            drop_policy: self.drop_policy,
        }
    }

    // Reuses our storage and bypasses our drop policy, as no element is being abandoned.
    fn clone_from(&mut self, source: &Self) {
        self.slots.clone_from(&source.slots);
        self.first_free = source.first_free;
        self.length = source.length;
        self.tracking.clone_from(&source.tracking);
        self.drop_policy = source.drop_policy;
    }
}

impl<T: fmt::Debug, K: Tracking> fmt::Debug for SlotPool<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotPool")
            .field("length", &self.length)
            .field("storage_len", &self.slots.len())
            .field("first_free", &self.first_free)
            .field("slots", &self.slots)
            .field("tracking", &self.tracking)
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

impl<T, K: Tracking> Drop for SlotPool<T, K> {
    fn drop(&mut self) {
        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if !thread::panicking() && matches!(self.drop_policy, DropPolicy::MustNotDropItems) {
            assert!(
                self.is_empty(),
                "dropped a non-empty SlotPool with {} items - this is forbidden by DropPolicy::MustNotDropItems",
                self.length
            );
        }
    }
}

impl<T, K: Tracking> Extend<T> for SlotPool<T, K> {
    /// Adds every element of `iter`, in order.
    ///
    /// # Panics
    ///
    /// Panics if the storage needs to grow and cannot.
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            if let Err(error) = self.add(value) {
                panic!("cannot extend SlotPool: {error}");
            }
        }
    }
}

impl<T> FromIterator<T> for SlotPool<T> {
    /// Builds a pool holding the elements of `iter` at indices `0..n`.
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut pool = Self::new();
        pool.extend(iter);
        pool
    }
}

impl<'a, T, K: Tracking> IntoIterator for &'a SlotPool<T, K> {
    type Item = (usize, &'a T);
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T, K: Tracking> IntoIterator for &'a mut SlotPool<T, K> {
    type Item = (usize, &'a mut T);
    type IntoIter = IterMut<'a, T, K>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

/// Iterator over the occupied slots of a [`SlotPool`], yielding `(index, &element)`.
#[derive(Debug)]
pub struct Iter<'a, T> {
    inner: Enumerate<slice::Iter<'a, Slot<T>>>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (usize, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.find_map(|(index, slot)| match &slot.entry {
            Entry::Occupied(value) => Some((index, value)),
            Entry::Vacant { .. } => None,
        })
    }
}

impl<T> FusedIterator for Iter<'_, T> {}

/// Iterator over the occupied slots of a [`SlotPool`], yielding `(index, &mut element)`.
///
/// Marks every yielded slot as modified.
#[derive(Debug)]
pub struct IterMut<'a, T, K: Tracking> {
    inner: Enumerate<slice::IterMut<'a, Slot<T>>>,
    tracking: &'a mut K,
}

impl<'a, T, K: Tracking> Iterator for IterMut<'a, T, K> {
    type Item = (usize, &'a mut T);

    fn next(&mut self) -> Option<Self::Item> {
        let (index, value) = self.inner.find_map(|(index, slot)| match &mut slot.entry {
            Entry::Occupied(value) => Some((index, value)),
            Entry::Vacant { .. } => None,
        })?;

        self.tracking.set_modified(index);
        Some((index, value))
    }
}

impl<T, K: Tracking> FusedIterator for IterMut<'_, T, K> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    reason = "test code"
)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(SlotPool<u32>: Send, Sync, Clone, fmt::Debug);
    assert_impl_all!(SlotPool<u32, ChangeTracking>: Send, Sync, Clone);
    assert_not_impl_any!(SlotPool<Rc<u32>>: Send, Sync);
    assert_impl_all!(SlotKey: Send, Sync, Copy);

    /// Test helper that counts how many times it has been dropped.
    #[derive(Debug)]
    struct DropCounter {
        drops: Rc<Cell<usize>>,
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[test]
    fn smoke_test() {
        let mut pool = SlotPool::new();

        let a = pool.add(10_u32).unwrap();
        let b = pool.add(20_u32).unwrap();
        let c = pool.add(30_u32).unwrap();

        assert_eq!((a, b, c), (0, 1, 2));
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.storage_len(), 3);

        assert_eq!(pool.del(b).unwrap(), 20);
        assert_eq!(pool.len(), 2);
        assert!(!pool.is_allocated(b));

        assert_eq!(pool.add(40).unwrap(), 1);
        assert_eq!(pool.get_item(1), Some(&40));
        assert_eq!(pool.storage_len(), 3);

        pool.integrity_check();
    }

    #[test]
    fn new_pool_is_empty() {
        let pool = SlotPool::<String>::new();

        assert!(pool.is_empty());
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.storage_len(), 0);
        assert_eq!(pool.iter().next(), None);
        assert_eq!(pool.frame(), None);
    }

    #[test]
    fn with_capacity_preallocates() {
        let pool = SlotPool::<u64>::with_capacity(100);
        assert!(pool.capacity() >= 100);
        assert_eq!(pool.storage_len(), 0);
    }

    #[test]
    fn freed_slots_are_reused_in_lifo_order() {
        let mut pool = SlotPool::new();
        for value in 0..6_u32 {
            pool.add(value).unwrap();
        }

        pool.del(1).unwrap();
        pool.del(4).unwrap();
        pool.del(2).unwrap();

        assert_eq!(pool.add(100).unwrap(), 2);
        assert_eq!(pool.add(101).unwrap(), 4);
        assert_eq!(pool.add(102).unwrap(), 1);
        assert_eq!(pool.add(103).unwrap(), 6);

        pool.integrity_check();
    }

    #[test]
    fn del_out_of_bounds_is_error() {
        let mut pool = SlotPool::<u32>::new();
        pool.add(1).unwrap();

        assert!(matches!(
            pool.del(5),
            Err(Error::OutOfBounds {
                index: 5,
                storage_len: 1
            })
        ));
    }

    #[test]
    fn del_vacant_is_error_and_leaves_pool_intact() {
        let mut pool = SlotPool::<u32>::new();
        pool.add(1).unwrap();
        pool.add(2).unwrap();
        pool.del(0).unwrap();

        assert!(matches!(pool.del(0), Err(Error::NotAllocated { index: 0 })));

        pool.integrity_check();
        assert_eq!(pool.add(3).unwrap(), 0);
        assert_eq!(pool.add(4).unwrap(), 2);
    }

    #[test]
    fn add_with_receives_slot_index() {
        let mut pool = SlotPool::new();
        pool.add(0_usize).unwrap();
        pool.add(0).unwrap();
        pool.del(0).unwrap();

        let index = pool.add_with(|index| index * 10).unwrap();
        assert_eq!(index, 0);
        assert_eq!(pool.get_item(0), Some(&0));

        let index = pool.add_with(|index| index * 10).unwrap();
        assert_eq!(index, 2);
        assert_eq!(pool.get_item(2), Some(&20));
    }

    #[test]
    fn panicking_constructor_leaves_pool_unchanged() {
        let mut pool = SlotPool::<u32>::new();
        pool.add(1).unwrap();
        pool.del(0).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            _ = pool.add_with(|_| panic!("constructor failed"));
        }));
        assert!(result.is_err());

        pool.integrity_check();
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.add(2).unwrap(), 0);
    }

    #[test]
    fn add_default_inserts_default() {
        let mut pool = SlotPool::<String>::new();
        let index = pool.add_default().unwrap();
        assert_eq!(pool.get_item(index).map(String::as_str), Some(""));
    }

    #[test]
    fn get_item_mut_modifies_in_place() {
        let mut pool = SlotPool::new();
        let index = pool.add(String::from("hello")).unwrap();

        pool.get_item_mut(index).unwrap().push_str(" world");
        assert_eq!(pool.get_item(index).unwrap(), "hello world");
        assert!(pool.get_item_mut(99).is_none());
    }

    #[test]
    fn get_or_create_at_end_appends() {
        let mut pool = SlotPool::<u32>::new();
        pool.add(1).unwrap();

        *pool.get_or_create(1).unwrap() = 2;

        assert_eq!(pool.storage_len(), 2);
        assert_eq!(pool.get_item(1), Some(&2));
        pool.integrity_check();
    }

    #[test]
    fn get_or_create_past_end_frees_the_gap() {
        let mut pool = SlotPool::<u32>::new();
        *pool.get_or_create(5).unwrap() = 5;

        assert_eq!(pool.storage_len(), 6);
        assert_eq!(pool.len(), 1);
        assert!((0..5).all(|index| !pool.is_allocated(index)));
        pool.integrity_check();

        // The gap is handed out in ascending order.
        for expected in 0..5 {
            assert_eq!(pool.add(0).unwrap(), expected);
        }
        assert_eq!(pool.add(0).unwrap(), 6);
    }

    #[test]
    fn get_or_create_gap_goes_ahead_of_existing_free_slots() {
        let mut pool = SlotPool::<u32>::new();
        pool.add(0).unwrap();
        pool.add(1).unwrap();
        pool.del(0).unwrap();

        pool.get_or_create(4).unwrap();
        pool.integrity_check();

        assert_eq!(pool.add(0).unwrap(), 2);
        assert_eq!(pool.add(0).unwrap(), 3);
        assert_eq!(pool.add(0).unwrap(), 0);
        assert_eq!(pool.add(0).unwrap(), 5);
    }

    #[test]
    fn get_or_create_claims_free_slot_from_middle_of_free_list() {
        let mut pool = SlotPool::<u32>::new();
        pool.get_or_create(5).unwrap();

        *pool.get_or_create(2).unwrap() = 22;
        assert_eq!(pool.get_item(2), Some(&22));
        assert_eq!(pool.len(), 2);
        pool.integrity_check();

        *pool.get_or_create(0).unwrap() = 11;
        pool.integrity_check();

        assert_eq!(pool.add(0).unwrap(), 1);
        assert_eq!(pool.add(0).unwrap(), 3);
        assert_eq!(pool.add(0).unwrap(), 4);
    }

    #[test]
    fn get_or_create_occupied_is_error() {
        let mut pool = SlotPool::<u32>::new();
        pool.add(7).unwrap();

        assert!(matches!(
            pool.get_or_create(0),
            Err(Error::NotFree { index: 0 })
        ));
        assert_eq!(pool.get_item(0), Some(&7));
    }

    #[test]
    fn keys_detect_slot_reuse() {
        let mut pool = SlotPool::new();
        let index = pool.add("first").unwrap();
        let key = pool.key_of(index).unwrap();

        assert_eq!(key.index(), index);
        assert_eq!(pool.get_by_key(key), Some(&"first"));

        pool.del(index).unwrap();
        assert_eq!(pool.key_of(index), None);
        assert_eq!(pool.get_by_key(key), None);

        let reused = pool.add("second").unwrap();
        assert_eq!(reused, index);
        assert_eq!(pool.get_by_key(key), None);
        assert!(pool.get_by_key_mut(key).is_none());

        let new_key = pool.key_of(reused).unwrap();
        assert_ne!(new_key.generation(), key.generation());
        *pool.get_by_key_mut(new_key).unwrap() = "third";
        assert_eq!(pool.get_item(reused), Some(&"third"));
    }

    #[test]
    fn iteration_skips_vacant_slots() {
        let mut pool: SlotPool<u32> = (0..5).collect();
        pool.del(1).unwrap();
        pool.del(3).unwrap();

        let visited: Vec<_> = pool.iter().map(|(index, value)| (index, *value)).collect();
        assert_eq!(visited, vec![(0, 0), (2, 2), (4, 4)]);
        assert_eq!(pool.indices().collect::<Vec<_>>(), vec![0, 2, 4]);

        let mut sum = 0;
        pool.for_each(|_, value| sum += value);
        assert_eq!(sum, 6);

        pool.for_each_mut(|index, value| *value += u32::try_from(index).unwrap());
        assert_eq!(pool.get_item(4), Some(&8));

        for (_, value) in &mut pool {
            *value = 0;
        }
        assert!(pool.iter().all(|(_, value)| *value == 0));
    }

    #[test]
    fn find_if_returns_first_match() {
        let pool: SlotPool<u32> = [5, 8, 13, 8].into_iter().collect();

        assert_eq!(pool.find_if(|value| *value == 8), Some(1));
        assert_eq!(pool.find_if(|value| *value > 100), None);
    }

    #[test]
    fn clear_frees_every_slot_in_order() {
        let mut pool: SlotPool<u32> = (0..4).collect();
        pool.del(2).unwrap();

        pool.clear();
        pool.integrity_check();

        assert!(pool.is_empty());
        assert_eq!(pool.storage_len(), 4);
        assert_eq!(pool.add(0).unwrap(), 0);
        assert_eq!(pool.add(0).unwrap(), 1);
    }

    #[test]
    fn extend_rebuilds_pool_from_serialized_elements() {
        let mut original = SlotPool::new();
        for value in ["a", "b", "c", "d"] {
            original.add(value).unwrap();
        }
        original.del(1).unwrap();

        let rebuilt: SlotPool<&str> = original.iter().map(|(_, value)| *value).collect();

        assert_eq!(rebuilt.len(), 3);
        assert_eq!(
            rebuilt.iter().map(|(_, value)| *value).collect::<Vec<_>>(),
            vec!["a", "c", "d"]
        );
    }

    #[test]
    fn elements_are_dropped_exactly_once() {
        let drops = Rc::new(Cell::new(0));

        {
            let mut pool = SlotPool::new();
            for _ in 0..3 {
                pool.add(DropCounter {
                    drops: Rc::clone(&drops),
                })
                .unwrap();
            }

            drop(pool.del(0).unwrap());
            assert_eq!(drops.get(), 1);
        }

        assert_eq!(drops.get(), 3);
    }

    #[test]
    #[should_panic]
    fn must_not_drop_items_panics_when_dropped_non_empty() {
        let mut pool = SlotPool::<u32>::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();
        pool.add(1).unwrap();
    }

    #[test]
    fn must_not_drop_items_allows_empty_drop() {
        let mut pool = SlotPool::<u32>::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();
        let index = pool.add(1).unwrap();
        pool.del(index).unwrap();
    }

    #[test]
    fn clone_from_reuses_storage_and_copies_content() {
        let source: SlotPool<u32> = (0..10).collect();
        let mut target = SlotPool::<u32>::with_capacity(64);
        target.add(99).unwrap();

        target.clone_from(&source);

        assert_eq!(target.len(), 10);
        assert!(target.capacity() >= 64);
        assert_eq!(target.get_item(9), Some(&9));
        target.integrity_check();
    }

    #[test]
    fn growth_keeps_indices_stable() {
        let mut pool = SlotPool::new();
        let mut expected = Vec::new();

        for value in 0..1000_u32 {
            let index = pool.add(value).unwrap();
            expected.push((index, value));

            if value % 3 == 0 {
                let (removed_index, _) = expected.remove(expected.len() / 2);
                pool.del(removed_index).unwrap();
            }
        }

        for (index, value) in expected {
            assert_eq!(pool.get_item(index), Some(&value));
        }

        pool.integrity_check();
    }

    #[test]
    fn tracking_marks_mutations() {
        let mut pool = SlotPool::<u32, ChangeTracking>::builder().build();

        let a = pool.add(1).unwrap();
        let b = pool.add(2).unwrap();
        pool.advance_frame();

        assert!(!pool.changeset(a).unwrap().is_modified_in_current_frame());

        _ = pool.get_item_mut(a);
        pool.del(b).unwrap();

        assert!(pool.changeset(a).unwrap().is_modified_in_current_frame());
        assert!(pool.changeset(b).unwrap().is_modified_in_current_frame());
        assert_eq!(pool.changesets().unwrap().len(), pool.storage_len());
        assert_eq!(pool.frame(), Some(1));
        pool.integrity_check();
    }

    #[test]
    fn tracking_reads_do_not_mark() {
        let mut pool = SlotPool::<u32, ChangeTracking>::builder().build();
        let index = pool.add(1).unwrap();
        pool.advance_frame();

        _ = pool.get_item(index);
        pool.for_each(|_, _| {});

        assert!(!pool.changeset(index).unwrap().is_modified_in_current_frame());
    }

    #[test]
    fn for_each_modified_covers_recent_frames() {
        let mut pool = SlotPool::<u32, ChangeTracking>::builder().build();
        for value in 0..4 {
            pool.add(value).unwrap();
        }

        pool.advance_frame();
        pool.advance_frame();
        *pool.get_item_mut(2).unwrap() = 20;
        pool.advance_frame();

        let mut recent = Vec::new();
        pool.for_each_modified(0, |index, _| recent.push(index));
        assert_eq!(recent, vec![2]);

        let mut wider = Vec::new();
        pool.for_each_modified(-2, |index, _| wider.push(index));
        assert_eq!(wider, vec![0, 1, 2, 3]);

        assert!(pool.is_modified(2, 0));
        assert!(!pool.is_modified(1, 0));
    }

    #[test]
    fn for_each_modified_slot_reports_deletions() {
        let mut pool = SlotPool::<u32, ChangeTracking>::builder().build();
        pool.add(1).unwrap();
        pool.add(2).unwrap();
        pool.advance_frame();
        pool.advance_frame();

        pool.del(0).unwrap();

        let mut seen = Vec::new();
        pool.for_each_modified_slot(0, |index, value| seen.push((index, value.copied())));
        assert_eq!(seen, vec![(0, None)]);

        let mut live = Vec::new();
        pool.for_each_modified(0, |index, _| live.push(index));
        assert!(live.is_empty());
    }

    #[test]
    #[should_panic]
    fn positive_rel_frame_panics() {
        let pool = SlotPool::<u32, ChangeTracking>::builder().build();
        pool.for_each_modified(1, |_, _| {});
    }

    #[test]
    fn mark_all_modified_marks_only_occupied_slots() {
        let mut pool = SlotPool::<u32, ChangeTracking>::builder().build();
        pool.add(1).unwrap();
        pool.add(2).unwrap();
        pool.del(1).unwrap();
        pool.advance_frame();
        pool.advance_frame();

        pool.mark_all_modified();

        assert!(pool.changeset(0).unwrap().is_modified_in_current_frame());
        assert!(!pool.changeset(1).unwrap().is_modified_in_current_frame());
    }
}
