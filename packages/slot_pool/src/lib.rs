//! Object pools that hand out stable integer indices, with optional per-slot change tracking
//! and a frame ring for publishing frozen snapshots to readers.
//!
//! An index returned by a pool keeps referring to the same element until that element is
//! deleted, no matter how the pool grows in the meantime. Deleted slots are reused, so indices
//! stay dense and can be used to address parallel arrays owned by the caller.
//!
//! # Pool types
//!
//! - [`SlotPool`] - the base pool. Freed slots are kept on a free list threaded through the
//!   vacant slots themselves and reused most-recently-freed first. Specific slots can be
//!   claimed with [`get_or_create()`](SlotPool::get_or_create), which lets a caller reproduce
//!   an index layout from elsewhere.
//! - [`BitmapPool`] - tracks liveness in a bitmap instead. Liveness checks are a single bit
//!   test and allocation always picks the lowest free slot.
//! - [`HashPool`] - a [`SlotPool`] with a hash index over a key that a [`KeyExtractor`] derives
//!   from each element. Duplicate keys are allowed.
//! - [`FrameRing`] - a change-tracked pool that publishes a snapshot of itself at the end of
//!   every frame, keeping the last few snapshots available for readers.
//!
//! # Change tracking
//!
//! [`SlotPool`] takes a [`Tracking`] type parameter. The default [`NoTracking`] compiles to
//! nothing. With [`ChangeTracking`], every mutation through the pool marks the slot as modified
//! in the current frame and each slot keeps a compressed [`Changeset`] of the frames in which it
//! was modified. Queries such as [`for_each_modified()`](SlotPool::for_each_modified) use this
//! history to visit only the slots that changed recently. A standalone tracked pool moves to
//! the next frame through [`advance_frame()`](SlotPool::advance_frame); a [`FrameRing`] does
//! this as part of publishing.
//!
//! The history reaches back between 33 and 40 frames. Queries reaching further back than that
//! treat every slot as modified.
//!
//! # Examples
//!
//! ```
//! use slot_pool::SlotPool;
//!
//! let mut pool = SlotPool::new();
//!
//! let a = pool.add("a").unwrap();
//! let b = pool.add("b").unwrap();
//! pool.del(a).unwrap();
//!
//! // Index b is unaffected by the deletion.
//! assert_eq!(pool.get_item(b), Some(&"b"));
//!
//! // The freed slot is reused.
//! assert_eq!(pool.add("c").unwrap(), a);
//! ```
//!
//! Publishing frames to readers:
//!
//! ```
//! use slot_pool::FrameRing;
//!
//! let mut ring = FrameRing::new();
//! let counter = ring.add(0_u32).unwrap();
//!
//! for _ in 0..3 {
//!     *ring.get_item_mut(counter).unwrap() += 1;
//!     ring.advance_frame(true);
//! }
//!
//! assert_eq!(ring.frame(), 3);
//! assert_eq!(ring.snapshot(0).unwrap().get_item(counter), Some(&1));
//! assert_eq!(ring.get_item(counter), Some(&3));
//! ```
//!
//! # Thread safety
//!
//! No pool performs internal synchronization. All pools are [`Send`] and [`Sync`] whenever the
//! element type is, and all mutation requires exclusive access.

mod bitmap;
mod bitmap_pool;
mod bitmap_pool_builder;
mod builder;
mod changeset;
mod drop_policy;
mod error;
mod frame_ring;
mod frame_ring_builder;
mod hash_pool;
mod hash_pool_builder;
mod key_extractor;
mod pool;
mod tracking;

pub(crate) use bitmap::*;
pub use bitmap_pool::*;
pub use bitmap_pool_builder::*;
pub use builder::*;
pub use changeset::Changeset;
pub(crate) use changeset::{Cadence, ChangeMask, FrameWindows};
pub use drop_policy::*;
pub use error::Error;
pub(crate) use error::Result;
pub use frame_ring::*;
pub use frame_ring_builder::*;
pub use hash_pool::*;
pub use hash_pool_builder::*;
pub use key_extractor::*;
pub use pool::*;
pub(crate) use tracking::AuxArray;
pub use tracking::{ChangeTracking, NoTracking, Tracking};
