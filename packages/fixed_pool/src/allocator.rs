use std::ptr::NonNull;

use crate::{FixedPool, Result};

/// How a container should treat its allocator when the container itself is copied, moved
/// or swapped, and whether allocators of the same type are interchangeable.
///
/// A container queries this once via [`SlotAllocator::TRAITS`] when it is composed with an
/// allocator and follows it from then on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct AllocatorTraits {
    /// Copying the container also copies its allocator, so the copy gets its own storage.
    pub propagates_on_copy: bool,

    /// Moving the container also moves its allocator, so the storage moves with the elements.
    pub propagates_on_move: bool,

    /// Swapping two containers also swaps their allocators.
    pub propagates_on_swap: bool,

    /// Any two allocators of the same type are equal, so storage allocated by one may be
    /// returned to another. If this is `false`, containers must compare allocator instances.
    pub always_equal: bool,
}

/// An allocator that hands out storage for one `Value` at a time, usable as the storage strategy
/// of a generic container.
///
/// The allocator deals in raw storage only: it neither initializes the storage it hands out nor
/// drops values in storage that is handed back.
pub trait SlotAllocator {
    /// The type of item the allocator provides storage for.
    type Value;

    /// An allocator of the same kind and configuration that provides storage for `U` instead.
    type Rebound<U>: SlotAllocator<Value = U>;

    /// How containers should treat this allocator when they are copied, moved or swapped.
    const TRAITS: AllocatorTraits;

    /// The maximum number of items that can be allocated at the same time.
    fn capacity(&self) -> usize;

    /// Allocates uninitialized storage for `count` items.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be satisfied.
    fn allocate(&mut self, count: usize) -> Result<NonNull<Self::Value>>;

    /// Returns storage obtained from [`allocate()`][1] with the same `count`.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate()`][1] on this allocator with the same `count`
    /// and not deallocated since. Any values in the storage must already have been dropped.
    ///
    /// [1]: Self::allocate
    unsafe fn deallocate(&mut self, ptr: *mut Self::Value, count: usize);

    /// Creates an allocator configured like this one that provides storage for `U`.
    ///
    /// # Errors
    ///
    /// Returns an error if the new allocator cannot obtain its storage.
    fn rebind<U>(&self) -> Result<Self::Rebound<U>>;
}

impl<T, const CAPACITY: usize> SlotAllocator for FixedPool<T, CAPACITY> {
    type Value = T;

    type Rebound<U> = FixedPool<U, CAPACITY>;

    // Each container gets its own pool when copied, the pool follows the elements when moved,
    // and swapping containers leaves each pool with the container it started with.
    const TRAITS: AllocatorTraits = AllocatorTraits {
        propagates_on_copy: true,
        propagates_on_move: true,
        propagates_on_swap: false,
        always_equal: false,
    };

    fn capacity(&self) -> usize {
        Self::capacity(self)
    }

    fn allocate(&mut self, count: usize) -> Result<NonNull<T>> {
        Self::allocate(self, count)
    }

    unsafe fn deallocate(&mut self, ptr: *mut T, count: usize) {
        // SAFETY: Forwarding the caller's guarantees.
        unsafe {
            Self::deallocate(self, ptr, count);
        }
    }

    fn rebind<U>(&self) -> Result<FixedPool<U, CAPACITY>> {
        Self::rebind(self)
    }
}
