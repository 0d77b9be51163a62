use std::collections::TryReserveError;

use thiserror::Error;

/// Errors returned by the pools in this crate.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The caller referenced a slot that lies outside the storage owned by the pool.
    #[error("slot {index} is out of bounds for a pool with {storage_len} slots")]
    OutOfBounds {
        /// The index that was referenced.
        index: usize,

        /// The number of slots in the pool's backing storage at the time of the call.
        storage_len: usize,
    },

    /// The caller attempted to delete a slot that does not currently hold an element.
    #[error("slot {index} is not allocated")]
    NotAllocated {
        /// The index of the vacant slot.
        index: usize,
    },

    /// The caller attempted to allocate a specific slot that already holds an element.
    #[error("attempt to allocate a non-free block: slot {index} is already allocated")]
    NotFree {
        /// The index of the occupied slot.
        index: usize,
    },

    /// The backing storage could not be grown.
    #[error("failed to grow pool storage")]
    Allocation(#[from] TryReserveError),
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn out_of_bounds_message_names_index_and_length() {
        let error = Error::OutOfBounds {
            index: 7,
            storage_len: 3,
        };

        let message = error.to_string();
        assert!(message.contains('7'));
        assert!(message.contains('3'));
    }

    #[test]
    fn not_free_message_mentions_non_free_block() {
        let error = Error::NotFree { index: 2 };
        assert!(error.to_string().contains("non-free block"));
    }

    #[test]
    fn allocation_error_converts_from_try_reserve_error() {
        let mut vec = Vec::<u64>::new();
        let reserve_error = vec
            .try_reserve(usize::MAX)
            .expect_err("reserving usize::MAX elements cannot succeed");

        let result: Result<()> = Err(reserve_error.into());
        assert!(matches!(result, Err(Error::Allocation(_))));
    }
}
