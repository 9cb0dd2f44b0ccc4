use std::ptr::NonNull;

/// A slot reserved from a [`FixedPool`][crate::FixedPool] via
/// [`reserve_slot()`][crate::FixedPool::reserve_slot] or [`insert()`][crate::FixedPool::insert].
///
/// The handle identifies the slot by its index in the pool and also carries a pointer to the
/// storage of the slot. Reserving a slot does not initialize the storage and releasing it does
/// not drop whatever it contains - constructing and destroying values is up to the holder.
///
/// The handle is neither `Clone` nor `Copy`, as releasing the slot consumes it.
#[derive(Debug, Eq, PartialEq)]
#[must_use = "dropping the handle without releasing it keeps the slot occupied until the pool is dropped"]
pub struct SlotHandle<T> {
    index: usize,
    ptr: NonNull<T>,
}

impl<T> SlotHandle<T> {
    pub(crate) fn new(index: usize, ptr: NonNull<T>) -> Self {
        Self { index, ptr }
    }

    /// The index of the slot in the block of the pool.
    ///
    /// Indexes are stable for the lifetime of the pool and are preserved when the pool
    /// is duplicated.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// A pointer to the storage of the slot, valid until the slot is released or the pool
    /// is dropped.
    #[must_use]
    pub fn ptr(&self) -> NonNull<T> {
        self.ptr
    }
}
