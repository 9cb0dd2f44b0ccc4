use std::alloc::Layout;

use thiserror::Error;

/// Errors that can occur when requesting storage from a [`FixedPool`][crate::FixedPool].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The system allocator could not provide the backing block of the pool.
    ///
    /// This can happen when a pool is created or duplicated.
    #[error("failed to allocate pool block{}", describe_layout(.layout.as_ref()))]
    AllocationFailed {
        /// The layout that was requested from the system allocator. This is `None` if the
        /// layout itself could not be calculated because the block would exceed the address space.
        layout: Option<Layout>,
    },

    /// The caller asked for storage for a number of items other than exactly one.
    #[error("pool can only allocate exactly one item per call but {count} were requested")]
    UnsupportedCount {
        /// The number of items that was requested.
        count: usize,
    },

    /// Every slot in the pool is already occupied.
    #[error("pool of capacity {capacity} is exhausted")]
    Exhausted {
        /// The fixed capacity of the pool that ran out of slots.
        capacity: usize,
    },

    /// The pool no longer owns a block because its contents were moved out of it.
    #[error("pool is not valid because its block has been moved out")]
    InvalidPool,
}

impl Error {
    /// Whether the error is the kind that a general-purpose allocator would report as being
    /// out of memory.
    ///
    /// From the point of view of a container, an exhausted pool is no different from a
    /// system allocator that has run out of memory.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_pool::FixedPool;
    ///
    /// let mut pool = FixedPool::<u64, 1>::new();
    /// let _slot = pool.allocate(1).unwrap();
    ///
    /// let error = pool.allocate(1).unwrap_err();
    /// assert!(error.is_out_of_memory());
    /// ```
    #[must_use]
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::AllocationFailed { .. } | Self::Exhausted { .. })
    }
}

fn describe_layout(layout: Option<&Layout>) -> String {
    match layout {
        Some(layout) => format!(" of {} bytes aligned to {}", layout.size(), layout.align()),
        None => " because its layout exceeds the address space".to_string(),
    }
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn exhausted_is_out_of_memory() {
        assert!(Error::Exhausted { capacity: 4 }.is_out_of_memory());
        assert!(Error::AllocationFailed { layout: None }.is_out_of_memory());
    }

    #[test]
    fn contract_violations_are_not_out_of_memory() {
        assert!(!Error::UnsupportedCount { count: 2 }.is_out_of_memory());
        assert!(!Error::InvalidPool.is_out_of_memory());
    }

    #[test]
    fn display_mentions_details() {
        let layout = Layout::from_size_align(64, 8).unwrap();

        assert_eq!(
            Error::AllocationFailed {
                layout: Some(layout)
            }
            .to_string(),
            "failed to allocate pool block of 64 bytes aligned to 8"
        );
        assert_eq!(
            Error::AllocationFailed { layout: None }.to_string(),
            "failed to allocate pool block because its layout exceeds the address space"
        );
        assert_eq!(
            Error::UnsupportedCount { count: 3 }.to_string(),
            "pool can only allocate exactly one item per call but 3 were requested"
        );
        assert_eq!(
            Error::Exhausted { capacity: 16 }.to_string(),
            "pool of capacity 16 is exhausted"
        );
    }
}
