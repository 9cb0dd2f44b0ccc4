use std::mem::ManuallyDrop;
use std::ptr::NonNull;

/// One storage cell of a pool block.
///
/// The same bytes are viewed either as the index of the next free slot (while the slot is on the
/// free list) or as storage for one `T` (while the slot is handed out). Which view is valid is not
/// recorded in the slot itself - the pool knows it from its free list, and only the pool touches
/// slots through the accessors below.
///
/// Both views start at offset zero, so a pointer to the value of a slot is also a pointer to the
/// slot. The pool relies on this to map a returned value pointer back to its slot index.
#[repr(C)]
pub(crate) union Slot<T> {
    next_free_index: usize,
    value: ManuallyDrop<T>,
}

impl<T> Slot<T> {
    /// Switches the slot to the free-list view, linking it to `next_free_index`.
    ///
    /// # Safety
    ///
    /// `slot` must point to a slot inside a live pool block. The caller must not need whatever
    /// value may have been stored in the slot - it is overwritten without being dropped.
    pub(crate) unsafe fn set_next_free_index(slot: NonNull<Self>, next_free_index: usize) {
        // SAFETY: Forwarding the caller's guarantee that the pointer is valid for writes.
        // Writing a `Copy` field of a union through a raw pointer does not read the old contents.
        unsafe {
            (&raw mut (*slot.as_ptr()).next_free_index).write(next_free_index);
        }
    }

    /// Reads the free-list view of the slot.
    ///
    /// # Safety
    ///
    /// `slot` must point to a slot inside a live pool block and the slot must currently be on the
    /// free list (i.e. the last write to it was via [`set_next_free_index()`][1]).
    ///
    /// [1]: Self::set_next_free_index
    #[must_use]
    pub(crate) unsafe fn next_free_index(slot: NonNull<Self>) -> usize {
        // SAFETY: Forwarding the caller's guarantee that the slot holds the free-list view.
        unsafe { (*slot.as_ptr()).next_free_index }
    }

    /// Returns a pointer to the value view of the slot.
    ///
    /// Obtaining the pointer is always fine. Whether the pointee is an initialized `T` depends on
    /// what the holder of the slot has done with it.
    #[must_use]
    pub(crate) fn value_ptr(slot: NonNull<Self>) -> NonNull<T> {
        // SAFETY: We only compute a field address, we do not read through the pointer.
        let value = unsafe { &raw mut (*slot.as_ptr()).value };

        // `ManuallyDrop<T>` is `repr(transparent)` so this is a pointer to a `T`.
        // SAFETY: A field address derived from a non-null pointer is non-null.
        unsafe { NonNull::new_unchecked(value.cast::<T>()) }
    }
}
