use std::mem;
use std::num::NonZero;

use tracing::trace;

use crate::{ChangeTracking, Changeset, FrameRingBuilder, Iter, IterMut, Result, SlotPool};

/// A change-tracked pool that publishes a frozen snapshot of itself at the end of every frame.
///
/// The writer mutates the *active* pool throughout a frame. [`advance_frame()`][1] publishes
/// the active pool into a ring of `ring_size` snapshots and recycles the oldest snapshot as the
/// next active pool. Readers can then inspect any of the last `ring_size` frames through
/// [`snapshot()`][2] without the writer having to wait for them, as long as no reader needs a
/// frame older than that.
///
/// Every mutation marks the affected slot as modified, which lets readers ask which slots
/// changed in recent frames instead of rescanning the whole pool.
///
/// # Examples
///
/// ```
/// use slot_pool::FrameRing;
///
/// let mut ring = FrameRing::new();
///
/// let player = ring.add("idle").unwrap();
/// ring.add("idle").unwrap();
/// ring.advance_frame(true);
///
/// *ring.get_item_mut(player).unwrap() = "running";
/// ring.advance_frame(true);
///
/// let mut changed = Vec::new();
/// ring.for_each_modified(0, |index, state| changed.push((index, *state)));
/// assert_eq!(changed, vec![(player, "running")]);
///
/// // The previous frame is still available, unchanged.
/// assert_eq!(ring.snapshot(0).unwrap().get_item(player), Some(&"idle"));
/// ```
///
/// [1]: Self::advance_frame
/// [2]: Self::snapshot
#[derive(Debug)]
pub struct FrameRing<T> {
    active: SlotPool<T, ChangeTracking>,

    /// Published pools. The pool published at the end of frame `f` lives in slot
    /// `f % ring_size` until it is recycled `ring_size` frames later.
    ring: Vec<SlotPool<T, ChangeTracking>>,

    ring_size: NonZero<usize>,
}

impl<T> FrameRing<T> {
    /// Creates an empty frame ring with the default ring size of 8 frames.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a builder for configuring and constructing a [`FrameRing`].
    ///
    /// # Example
    ///
    /// ```
    /// use new_zealand::nz;
    /// use slot_pool::FrameRing;
    ///
    /// let ring = FrameRing::<u32>::builder()
    ///     .ring_size(nz!(3))
    ///     .capacity(1024)
    ///     .build();
    ///
    /// assert_eq!(ring.ring_size().get(), 3);
    /// ```
    pub fn builder() -> FrameRingBuilder<T> {
        FrameRingBuilder::new()
    }

    pub(crate) fn new_inner(ring_size: NonZero<usize>, capacity: usize) -> Self {
        let ring = (0..ring_size.get())
            .map(|_| SlotPool::builder().build())
            .collect();

        Self {
            active: SlotPool::builder().capacity(capacity).build(),
            ring,
            ring_size,
        }
    }

    /// The frame currently being written. Starts at 0.
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.active.tracking().current_frame()
    }

    /// The number of published frames kept available for readers.
    #[must_use]
    pub fn ring_size(&self) -> NonZero<usize> {
        self.ring_size
    }

    /// Read access to the pool being written in the current frame.
    #[must_use]
    pub fn active(&self) -> &SlotPool<T, ChangeTracking> {
        &self.active
    }

    /// The pool as it was published at the end of `frame`.
    ///
    /// Only the last [`ring_size()`](Self::ring_size) frames are available. Returns `None` for
    /// older frames and for the current frame, which has not been published yet.
    #[must_use]
    pub fn snapshot(&self, frame: u64) -> Option<&SlotPool<T, ChangeTracking>> {
        let now = self.frame();

        if frame >= now {
            return None;
        }

        // Cannot underflow, frame < now.
        let age = now.wrapping_sub(frame);

        if age > self.ring_size_u64() {
            return None;
        }

        self.ring.get(self.ring_slot(frame))
    }

    /// See [`SlotPool::len()`].
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// See [`SlotPool::is_empty()`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Inserts `value` and returns its index. See [`SlotPool::add()`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`][crate::Error::Allocation] if the storage needs to grow
    /// and cannot.
    pub fn add(&mut self, value: T) -> Result<usize> {
        self.active.add(value)
    }

    /// Inserts a default-constructed element. See [`SlotPool::add_default()`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`][crate::Error::Allocation] if the storage needs to grow
    /// and cannot.
    pub fn add_default(&mut self) -> Result<usize>
    where
        T: Default,
    {
        self.active.add_default()
    }

    /// Inserts the element returned by `f`. See [`SlotPool::add_with()`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`][crate::Error::Allocation] if the storage needs to grow
    /// and cannot.
    pub fn add_with(&mut self, f: impl FnOnce(usize) -> T) -> Result<usize> {
        self.active.add_with(f)
    }

    /// See [`SlotPool::get_or_create()`].
    ///
    /// # Errors
    ///
    /// As for [`SlotPool::get_or_create()`].
    pub fn get_or_create(&mut self, index: usize) -> Result<&mut T>
    where
        T: Default,
    {
        self.active.get_or_create(index)
    }

    /// See [`SlotPool::get_or_create_with()`].
    ///
    /// # Errors
    ///
    /// As for [`SlotPool::get_or_create_with()`].
    pub fn get_or_create_with(
        &mut self,
        index: usize,
        f: impl FnOnce(usize) -> T,
    ) -> Result<&mut T> {
        self.active.get_or_create_with(index, f)
    }

    /// Deletes the element in slot `index`. See [`SlotPool::del()`].
    ///
    /// # Errors
    ///
    /// As for [`SlotPool::del()`].
    pub fn del(&mut self, index: usize) -> Result<T> {
        self.active.del(index)
    }

    /// Returns the element in slot `index` of the active pool.
    #[must_use]
    pub fn get_item(&self, index: usize) -> Option<&T> {
        self.active.get_item(index)
    }

    /// Returns the element in slot `index` of the active pool for modification, marking the
    /// slot as modified.
    #[must_use]
    pub fn get_item_mut(&mut self, index: usize) -> Option<&mut T> {
        self.active.get_item_mut(index)
    }

    /// Iterates over the active pool.
    pub fn iter(&self) -> Iter<'_, T> {
        self.active.iter()
    }

    /// Iterates over the active pool for modification, marking every visited slot.
    pub fn iter_mut(&mut self) -> IterMut<'_, T, ChangeTracking> {
        self.active.iter_mut()
    }

    /// Marks slot `index` as modified in the current frame.
    pub fn set_modified(&mut self, index: usize) {
        self.active.set_modified(index);
    }

    /// The change history of slot `index`.
    #[must_use]
    pub fn changeset(&self, index: usize) -> Option<Changeset> {
        self.active.changeset(index)
    }

    /// See [`SlotPool::for_each_modified()`].
    ///
    /// # Panics
    ///
    /// Panics if `rel_frame` is positive.
    pub fn for_each_modified(&self, rel_frame: i64, f: impl FnMut(usize, &T)) {
        self.active.for_each_modified(rel_frame, f);
    }

    /// See [`SlotPool::for_each_modified_slot()`].
    ///
    /// # Panics
    ///
    /// Panics if `rel_frame` is positive.
    pub fn for_each_modified_slot(&self, rel_frame: i64, f: impl FnMut(usize, Option<&T>)) {
        self.active.for_each_modified_slot(rel_frame, f);
    }

    /// See [`SlotPool::is_modified()`].
    ///
    /// # Panics
    ///
    /// Panics if `rel_frame` is positive.
    #[must_use]
    pub fn is_modified(&self, index: usize, rel_frame: i64) -> bool {
        self.active.is_modified(index, rel_frame)
    }

    /// Marks every element as modified in the current frame.
    pub fn mark_all_modified(&mut self) {
        self.active.mark_all_modified();
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "the remainder is below the ring size, which is a usize"
    )]
    fn ring_slot(&self, frame: u64) -> usize {
        (frame % self.ring_size_u64()) as usize
    }

    fn ring_size_u64(&self) -> u64 {
        // usize is at most 64 bits on every supported target.
        self.ring_size.get() as u64
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    /// Verifies the active pool and every published snapshot.
    pub fn integrity_check(&self) {
        self.active.integrity_check();

        for snapshot in &self.ring {
            snapshot.integrity_check();
        }

        assert_eq!(self.ring.len(), self.ring_size.get());
    }
}

impl<T: Clone> FrameRing<T> {
    /// Completes the current frame and starts the next one.
    ///
    /// The active pool is published as the snapshot of the current frame. The snapshot
    /// published `ring_size` frames ago is recycled as the new active pool:
    ///
    /// * With `copy`, the new active pool starts out as an exact copy of the frame just
    ///   published, reusing the recycled storage.
    /// * Without `copy`, the new active pool keeps the stale content of the recycled snapshot
    ///   and the caller is expected to repopulate it.
    ///
    /// Either way, the change history continues from the published frame.
    pub fn advance_frame(&mut self, copy: bool) {
        let frame = self.frame();
        let ring_slot = self.ring_slot(frame);

        let Some(published) = self.ring.get_mut(ring_slot) else {
            unreachable!("ring slot is always below the ring size");
        };

        mem::swap(&mut self.active, published);

        if copy {
            self.active.clone_from(published);
        } else {
            self.active.adopt_history(published.tracking());
        }

        self.active.advance_frame();

        trace!(frame, ring_slot, copy, "frame published");
    }
}

impl<T> Default for FrameRing<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T> IntoIterator for &'a FrameRing<T> {
    type Item = (usize, &'a T);
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T> IntoIterator for &'a mut FrameRing<T> {
    type Item = (usize, &'a mut T);
    type IntoIter = IterMut<'a, T, ChangeTracking>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(clippy::arithmetic_side_effects, reason = "test code")]
mod tests {
    use new_zealand::nz;
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(FrameRing<u32>: Send, Sync);

    fn modified(ring: &FrameRing<u32>, rel_frame: i64) -> Vec<usize> {
        let mut indices = Vec::new();
        ring.for_each_modified(rel_frame, |index, _| indices.push(index));
        indices
    }

    #[test]
    fn smoke_test() {
        let mut ring = FrameRing::new();
        assert_eq!(ring.frame(), 0);
        assert_eq!(ring.ring_size().get(), 8);

        let index = ring.add(1_u32).unwrap();
        ring.advance_frame(true);

        assert_eq!(ring.frame(), 1);
        assert_eq!(ring.get_item(index), Some(&1));
        assert_eq!(ring.len(), 1);
        ring.integrity_check();
    }

    #[test]
    fn snapshots_are_frozen() {
        let mut ring = FrameRing::builder().ring_size(nz!(3)).build();
        let index = ring.add(0_u32).unwrap();

        for value in 1..=5 {
            ring.advance_frame(true);
            *ring.get_item_mut(index).unwrap() = value;
        }

        // Now writing frame 5; frames 2, 3 and 4 are published.
        assert_eq!(ring.frame(), 5);
        assert!(ring.snapshot(1).is_none());
        assert!(ring.snapshot(5).is_none());

        for frame in 2..5 {
            let snapshot = ring.snapshot(frame).unwrap();
            assert_eq!(snapshot.get_item(index), Some(&u32::try_from(frame).unwrap()));
            assert_eq!(snapshot.frame(), Some(frame));
        }

        ring.integrity_check();
    }

    #[test]
    fn snapshot_before_first_publish_is_none() {
        let ring = FrameRing::<u32>::new();
        assert!(ring.snapshot(0).is_none());
    }

    #[test]
    fn without_copy_the_recycled_pool_is_stale() {
        let mut ring = FrameRing::builder().ring_size(nz!(1)).build();

        ring.add(10_u32).unwrap();
        ring.advance_frame(false);

        // The recycled pool was never written.
        assert!(ring.is_empty());

        ring.add(20).unwrap();
        ring.advance_frame(false);

        assert_eq!(ring.get_item(0), Some(&10));
        ring.integrity_check();
    }

    #[test]
    fn history_continues_without_copy() {
        let mut ring = FrameRing::builder().ring_size(nz!(1)).build();
        ring.add(1_u32).unwrap();
        ring.advance_frame(true);
        ring.advance_frame(false);

        // The recycled pool was last written in frame 0 but the frame count carries on.
        assert_eq!(ring.frame(), 2);
        assert_eq!(ring.get_item(0), Some(&1));
        assert!(ring.is_modified(0, -1));
        assert!(!ring.is_modified(0, 0));
    }

    #[test]
    fn modified_query_covers_latest_published_frame() {
        let mut ring = FrameRing::new();
        for value in 0..4 {
            ring.add(value).unwrap();
        }
        ring.advance_frame(true);

        *ring.get_item_mut(3).unwrap() = 30;
        ring.advance_frame(true);

        assert_eq!(modified(&ring, 0), vec![3]);
        assert_eq!(modified(&ring, -1), vec![0, 1, 2, 3]);

        ring.advance_frame(true);
        assert!(modified(&ring, 0).is_empty());
        assert_eq!(modified(&ring, -1), vec![3]);
    }

    #[test]
    fn current_frame_modifications_are_always_included() {
        let mut ring = FrameRing::new();
        ring.add(0_u32).unwrap();
        ring.add(0).unwrap();

        for _ in 0..5 {
            ring.advance_frame(true);
        }

        ring.set_modified(1);
        assert_eq!(modified(&ring, 0), vec![1]);
        assert!(ring.changeset(1).unwrap().is_modified_in_current_frame());
    }

    #[test]
    fn deletions_are_visible_through_modified_slots() {
        let mut ring = FrameRing::new();
        ring.add(5_u32).unwrap();
        ring.advance_frame(true);
        ring.advance_frame(true);

        ring.del(0).unwrap();
        ring.advance_frame(true);

        let mut seen = Vec::new();
        ring.for_each_modified_slot(0, |index, value| seen.push((index, value.copied())));
        assert_eq!(seen, vec![(0, None)]);
    }

    #[test]
    fn iter_mut_marks_every_element() {
        let mut ring = FrameRing::new();
        ring.add(1_u32).unwrap();
        ring.add(2).unwrap();
        ring.advance_frame(true);
        ring.advance_frame(true);

        for (_, value) in ring.iter_mut() {
            *value += 1;
        }

        assert_eq!(modified(&ring, 0), vec![0, 1]);
        assert_eq!(ring.iter().map(|(_, value)| *value).sum::<u32>(), 5);
    }

    #[test]
    fn mark_all_modified_reports_everything() {
        let mut ring = FrameRing::new();
        for value in 0..3 {
            ring.add(value).unwrap();
        }
        for _ in 0..3 {
            ring.advance_frame(true);
        }
        assert!(modified(&ring, 0).is_empty());

        ring.mark_all_modified();
        assert_eq!(modified(&ring, 0), vec![0, 1, 2]);
    }

    #[test]
    fn long_unmodified_stretch_reports_everything() {
        let mut ring = FrameRing::new();
        ring.add(0_u32).unwrap();

        for _ in 0..60 {
            ring.advance_frame(true);
        }

        assert!(modified(&ring, -5).is_empty());
        assert_eq!(modified(&ring, -50), vec![0]);
    }

    #[test]
    fn get_or_create_through_ring() {
        let mut ring = FrameRing::<u32>::new();
        ring.advance_frame(true);
        ring.advance_frame(true);

        *ring.get_or_create(3).unwrap() = 7;
        *ring.get_or_create_with(1, |_| 0).unwrap() += 1;

        assert_eq!(ring.get_item(3), Some(&7));
        assert_eq!(ring.get_item(1), Some(&1));
        assert!(ring.is_modified(3, 0));
        assert!(ring.is_modified(1, 0));

        // Gap slots were only placed on the free list.
        assert!(!ring.is_modified(0, 0));
        assert!(!ring.is_modified(2, 0));
        assert_eq!(modified(&ring, 0), vec![1, 3]);

        ring.advance_frame(true);
        assert!(ring.is_modified(3, 0));

        assert_eq!(ring.add_default().unwrap(), 0);
        assert_eq!(ring.add_with(|index| index as u32).unwrap(), 2);
        ring.integrity_check();
    }
}
