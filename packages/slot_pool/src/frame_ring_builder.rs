use std::fmt;
use std::marker::PhantomData;
use std::num::NonZero;

use new_zealand::nz;

use crate::FrameRing;

const DEFAULT_RING_SIZE: NonZero<usize> = nz!(8);

/// Builder for creating an instance of [`FrameRing`].
///
/// # Examples
///
/// ```
/// use new_zealand::nz;
/// use slot_pool::FrameRing;
///
/// let ring = FrameRing::<String>::builder().ring_size(nz!(4)).build();
///
/// assert_eq!(ring.ring_size().get(), 4);
/// assert_eq!(ring.frame(), 0);
/// ```
#[must_use]
pub struct FrameRingBuilder<T> {
    ring_size: NonZero<usize>,
    capacity: usize,

    _item: PhantomData<T>,
}

impl<T> fmt::Debug for FrameRingBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRingBuilder")
            .field("item_type", &format_args!("{}", std::any::type_name::<T>()))
            .field("ring_size", &self.ring_size)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<T> FrameRingBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            ring_size: DEFAULT_RING_SIZE,
            capacity: 0,
            _item: PhantomData,
        }
    }

    /// Sets how many published frames are kept for readers. The default is 8.
    ///
    /// A reader that needs a frame older than this has fallen too far behind the writer.
    pub fn ring_size(mut self, ring_size: NonZero<usize>) -> Self {
        self.ring_size = ring_size;
        self
    }

    /// Sets the number of slots to allocate storage for up front in the active pool.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Builds the frame ring with the specified configuration.
    #[must_use]
    pub fn build(self) -> FrameRing<T> {
        FrameRing::new_inner(self.ring_size, self.capacity)
    }
}
