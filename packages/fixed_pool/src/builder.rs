use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;

use crate::{DropPolicy, FixedPool, Result};

/// Builder for creating an instance of [`FixedPool`].
///
/// You only need to use this builder if you want to customize the pool configuration.
/// The default configuration used by [`FixedPool::new()`][1] is sufficient for most use cases.
///
/// The capacity is not part of the builder - it is a const generic parameter of the pool type.
///
/// # Examples
///
/// ```
/// use fixed_pool::{DropPolicy, FixedPool};
///
/// let pool = FixedPool::<u32, 64>::builder()
///     .drop_policy(DropPolicy::MayLeakItems)
///     .build();
/// ```
///
/// [1]: FixedPool::new
#[must_use]
pub struct FixedPoolBuilder<T, const CAPACITY: usize> {
    drop_policy: DropPolicy,

    _item: PhantomData<T>,
}

impl<T, const CAPACITY: usize> fmt::Debug for FixedPoolBuilder<T, CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedPoolBuilder")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("capacity", &CAPACITY)
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

impl<T, const CAPACITY: usize> FixedPoolBuilder<T, CAPACITY> {
    pub(crate) fn new() -> Self {
        Self {
            drop_policy: DropPolicy::default(),
            _item: PhantomData,
        }
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs what happens
    /// when the pool is dropped while some of its slots are still occupied.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_pool::{DropPolicy, FixedPool};
    ///
    /// let pool = FixedPool::<u32, 4>::builder()
    ///     .drop_policy(DropPolicy::MustNotHoldItems)
    ///     .build();
    /// ```
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the pool with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if the block of the pool cannot be allocated.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_pool::FixedPool;
    ///
    /// let pool = FixedPool::<u32, 4>::builder().build();
    /// ```
    #[must_use]
    pub fn build(self) -> FixedPool<T, CAPACITY> {
        self.try_build()
            .expect("we do not intend to handle allocation failure in infallible construction - OOM is panic")
    }

    /// Builds the pool with the specified configuration, returning an error if the
    /// block of the pool cannot be allocated.
    ///
    /// # Errors
    ///
    /// [`Error::AllocationFailed`][crate::Error::AllocationFailed] if the block
    /// cannot be allocated.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_pool::FixedPool;
    ///
    /// let pool = FixedPool::<u32, 4>::builder().try_build()?;
    /// # Ok::<(), fixed_pool::Error>(())
    /// ```
    pub fn try_build(self) -> Result<FixedPool<T, CAPACITY>> {
        FixedPool::try_new_inner(self.drop_policy)
    }
}
