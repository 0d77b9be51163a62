/// Determines how a pool treats elements that are still allocated when the pool is dropped.
///
/// By default, the pool will drop its remaining elements.
///
/// # Examples
///
/// ```
/// use slot_pool::{DropPolicy, SlotPool};
///
/// let pool = SlotPool::<u32>::builder()
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The pool will drop its remaining elements when it is dropped. This is the default.
    #[default]
    MayDropItems,

    /// The pool will panic if it still contains elements when it is dropped.
    ///
    /// Useful when elements carry external bookkeeping (e.g. registrations keyed by slot index)
    /// that must be torn down through [`SlotPool::del()`][crate::SlotPool::del] first.
    MustNotDropItems,
}
