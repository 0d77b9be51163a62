use std::fmt::Debug;

use crate::{Cadence, ChangeMask, Changeset, FrameWindows};

/// An auxiliary array that runs parallel to a pool's slot storage.
///
/// The owner resizes it whenever the pool's storage grows, so that every slot index of the
/// pool is also a valid index into the auxiliary array.
#[derive(Clone, Debug, Default)]
pub(crate) struct AuxArray<V> {
    values: Vec<V>,
}

impl<V: Clone + Default> AuxArray<V> {
    pub(crate) const fn new() -> Self {
        Self { values: Vec::new() }
    }

    #[cfg(debug_assertions)]
    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    /// Resizes the array to `len`, filling new entries with the default value.
    pub(crate) fn resize(&mut self, len: usize) {
        self.values.resize(len, V::default());
    }

    pub(crate) fn get(&self, index: usize) -> Option<&V> {
        self.values.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut V> {
        self.values.get_mut(index)
    }

    pub(crate) fn as_slice(&self) -> &[V] {
        &self.values
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [V] {
        &mut self.values
    }

    /// Resets every entry to the default value, keeping the length.
    pub(crate) fn reset(&mut self) {
        self.values.fill(V::default());
    }
}

/// Optional per-slot change tracking attached to a [`SlotPool`][crate::SlotPool].
///
/// The choice is made through the pool's type parameter: [`NoTracking`] compiles every hook
/// away, [`ChangeTracking`] maintains a [`Changeset`] per slot and a frame counter.
pub trait Tracking: Clone + Debug + Default {
    /// Resizes the per-slot state to match a pool with `storage_len` slots.
    fn resize(&mut self, storage_len: usize);

    /// Records that slot `index` was modified in the current frame.
    fn set_modified(&mut self, index: usize);

    /// Returns the change history of slot `index`, if tracking is enabled.
    fn changeset(&self, index: usize) -> Option<Changeset>;

    /// Returns the change history of every slot, if tracking is enabled.
    fn changesets(&self) -> Option<&[Changeset]>;

    /// Returns the current frame, if tracking is enabled.
    fn frame(&self) -> Option<u64>;
}

/// Disables change tracking. Zero-sized, every hook is a no-op.
#[expect(clippy::exhaustive_structs, reason = "intentionally an empty struct")]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NoTracking;

impl Tracking for NoTracking {
    #[inline]
    fn resize(&mut self, _storage_len: usize) {}

    #[inline]
    fn set_modified(&mut self, _index: usize) {}

    #[inline]
    fn changeset(&self, _index: usize) -> Option<Changeset> {
        None
    }

    #[inline]
    fn changesets(&self) -> Option<&[Changeset]> {
        None
    }

    #[inline]
    fn frame(&self) -> Option<u64> {
        None
    }
}

/// Tracks which slots were modified in recent frames.
///
/// Every mutation through the owning pool marks the slot in the current frame. When the frame
/// advances, the history of every slot is aggregated into coarser buckets; see [`Changeset`].
#[derive(Clone, Debug)]
pub struct ChangeTracking {
    changesets: AuxArray<Changeset>,

    frame: u64,

    /// Which frames each changeset bit covers. Identical for all slots.
    windows: FrameWindows,
}

impl Default for ChangeTracking {
    fn default() -> Self {
        Self {
            changesets: AuxArray::new(),
            frame: 0,
            windows: FrameWindows::new(),
        }
    }
}

impl ChangeTracking {
    /// Moves to the next frame, aggregating the current frame into the history of every slot.
    pub(crate) fn advance_frame(&mut self) {
        // Cannot overflow, a frame per nanosecond would take centuries to get there.
        self.frame = self.frame.wrapping_add(1);

        let cadence = Cadence::entering(self.frame);

        for changeset in self.changesets.as_mut_slice() {
            *changeset = changeset.advance(cadence);
        }

        self.windows.advance(cadence, self.frame);
    }

    /// Mask selecting every slot modified at or after `frames_back` frames before the current one.
    pub(crate) fn mask_since_frames_back(&self, frames_back: u64) -> ChangeMask {
        let since = i128::from(self.frame) - i128::from(frames_back);

        // Anything older than i64::MIN is certainly beyond the horizon.
        let since = i64::try_from(since).unwrap_or(i64::MIN);

        self.windows.mask_since(since)
    }

    pub(crate) fn current_frame(&self) -> u64 {
        self.frame
    }
}

impl Tracking for ChangeTracking {
    fn resize(&mut self, storage_len: usize) {
        self.changesets.resize(storage_len);
    }

    fn set_modified(&mut self, index: usize) {
        if let Some(changeset) = self.changesets.get_mut(index) {
            changeset.mark_current();
        }
    }

    fn changeset(&self, index: usize) -> Option<Changeset> {
        self.changesets.get(index).copied()
    }

    fn changesets(&self) -> Option<&[Changeset]> {
        Some(self.changesets.as_slice())
    }

    fn frame(&self) -> Option<u64> {
        Some(self.frame)
    }
}
