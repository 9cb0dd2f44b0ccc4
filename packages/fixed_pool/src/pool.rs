use std::alloc::{Layout, alloc, dealloc};
use std::any::type_name;
use std::ptr::{self, NonNull};
use std::{fmt, mem, thread};

use scopeguard::ScopeGuard;
use tracing::{debug, error, trace, warn};

use crate::{DropPolicy, Error, FixedPoolBuilder, Result, Slot, SlotHandle};

/// The capacity of a [`FixedPool`] when none is specified.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Freelist link that marks a slot as occupied while a block is being duplicated.
const OCCUPIED_MARK: usize = usize::MAX;

/// A fixed-capacity pool of storage slots, each sized and aligned for one `T`.
///
/// The pool allocates one block of `CAPACITY` slots when it is created and never grows. Slots
/// are handed out and taken back in O(1) via an intrusive freelist: every vacant slot stores the
/// index of the next vacant slot in its own storage. The most recently returned slot is the next
/// one to be handed out.
///
/// The pool deals in raw storage only. It does not initialize the slots it hands out, nor does it
/// drop the values placed in them - that is the job of whoever holds the slot (typically a
/// container that uses the pool as its allocator).
///
/// There are two ways to obtain storage:
///
/// * [`allocate()`][1] and [`deallocate()`][2] - the allocator-style interface, dealing in
///   pointers to `T`.
/// * [`reserve_slot()`][3] and [`release_slot()`][4] - returns a [`SlotHandle`] that also carries
///   the index of the slot. [`insert()`][5] and [`remove()`][6] layer value construction and
///   destruction on top of this.
///
/// # Ownership
///
/// Moving a pool moves the block with it. [`take()`][7] moves the block out of a pool while
/// leaving behind an invalid pool that owns nothing and rejects any further requests.
///
/// A pool can be duplicated via [`try_clone()`][8], which creates a new block with the same
/// occupancy, copies of all occupied values and an identical freelist.
///
/// # Equality
///
/// Pools compare by identity. Two separately created pools are never equal, even if they have the
/// same capacity and contents, because storage allocated from one cannot be returned to the other.
///
/// # Thread safety
///
/// The pool is not synchronized. It can be moved to another thread if `T` can but it cannot be
/// shared between threads.
///
/// # Examples
///
/// ```
/// use fixed_pool::FixedPool;
///
/// let mut pool = FixedPool::<u64, 4>::new();
///
/// let slot = pool.allocate(1).unwrap();
///
/// // SAFETY: The slot is valid for writes and sized for a u64.
/// unsafe { slot.write(42) };
///
/// assert_eq!(pool.len(), 1);
///
/// // SAFETY: The slot came from this pool and u64 does not need dropping.
/// unsafe { pool.deallocate(slot.as_ptr(), 1) };
///
/// assert!(pool.is_empty());
/// ```
///
/// [1]: Self::allocate
/// [2]: Self::deallocate
/// [3]: Self::reserve_slot
/// [4]: Self::release_slot
/// [5]: Self::insert
/// [6]: Self::remove
/// [7]: Self::take
/// [8]: Self::try_clone
pub struct FixedPool<T, const CAPACITY: usize = DEFAULT_CAPACITY> {
    /// The first slot of the block owned by the pool. `None` if the block has been moved out.
    first_slot_ptr: Option<NonNull<Slot<T>>>,

    /// Index of the next vacant slot. Think of this as a stack of the most recently returned
    /// slots, with the stack entries stored in the slots themselves. Equal to `CAPACITY` when
    /// no slot is vacant.
    next_free_index: usize,

    /// Number of slots that are currently handed out.
    count: usize,

    drop_policy: DropPolicy,
}

impl<T, const CAPACITY: usize> FixedPool<T, CAPACITY> {
    /// Creates a pool with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics if the block cannot be allocated. Use [`try_new()`][1] to handle this as an error.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_pool::FixedPool;
    ///
    /// let pool = FixedPool::<String, 16>::new();
    ///
    /// assert_eq!(pool.capacity(), 16);
    /// assert!(pool.is_empty());
    /// ```
    ///
    /// [1]: Self::try_new
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a pool with the default configuration, returning an error if the block
    /// cannot be allocated.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_pool::FixedPool;
    ///
    /// let pool = FixedPool::<u32>::try_new()?;
    ///
    /// assert_eq!(pool.capacity(), 1024);
    /// # Ok::<(), fixed_pool::Error>(())
    /// ```
    pub fn try_new() -> Result<Self> {
        Self::builder().try_build()
    }

    /// Starts building a new [`FixedPool`] with a custom configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_pool::{DropPolicy, FixedPool};
    ///
    /// let pool = FixedPool::<u32, 8>::builder()
    ///     .drop_policy(DropPolicy::MustNotHoldItems)
    ///     .build();
    ///
    /// assert_eq!(pool.drop_policy(), DropPolicy::MustNotHoldItems);
    /// ```
    pub fn builder() -> FixedPoolBuilder<T, CAPACITY> {
        FixedPoolBuilder::new()
    }

    pub(crate) fn try_new_inner(drop_policy: DropPolicy) -> Result<Self> {
        const {
            assert!(CAPACITY > 0, "FixedPool must have non-zero capacity");
            assert!(
                CAPACITY < usize::MAX,
                "FixedPool capacity must be less than usize::MAX"
            );
        }

        let first_slot_ptr = Self::allocate_block()?;

        // Link every slot to the one after it. The last one points out of bounds,
        // which marks the end of the freelist.
        for index in 0..CAPACITY {
            let slot = Self::slot_ptr(first_slot_ptr, index);

            // SAFETY: The slot is inside the block we just allocated and holds nothing yet.
            unsafe {
                Slot::set_next_free_index(slot, index.wrapping_add(1));
            }
        }

        debug!(
            item_type = type_name::<T>(),
            capacity = CAPACITY,
            "allocated pool block"
        );

        Ok(Self {
            first_slot_ptr: Some(first_slot_ptr),
            next_free_index: 0,
            count: 0,
            drop_policy,
        })
    }

    /// The layout of the block, or `None` if it does not fit in the address space.
    #[must_use]
    fn layout() -> Option<Layout> {
        Layout::array::<Slot<T>>(CAPACITY).ok()
    }

    fn allocate_block() -> Result<NonNull<Slot<T>>> {
        let Some(layout) = Self::layout() else {
            error!(
                item_type = type_name::<T>(),
                capacity = CAPACITY,
                "pool block does not fit in the address space"
            );
            return Err(Error::AllocationFailed { layout: None });
        };

        // SAFETY: The layout is not zero-sized because CAPACITY is non-zero (checked at compile
        // time) and a slot is at least as big as a usize.
        let ptr = unsafe { alloc(layout) };

        NonNull::new(ptr).map(NonNull::cast).ok_or_else(|| {
            error!(
                item_type = type_name::<T>(),
                capacity = CAPACITY,
                size = layout.size(),
                align = layout.align(),
                "system allocator failed to provide pool block"
            );
            Error::AllocationFailed {
                layout: Some(layout),
            }
        })
    }

    /// # Safety
    ///
    /// The pointer must have been returned by `allocate_block()` and not yet released.
    unsafe fn release_block(first_slot_ptr: NonNull<Slot<T>>) {
        let layout = Self::layout().expect("the layout was valid when the block was allocated");

        // SAFETY: Forwarding the caller's guarantee that the block came from `alloc()`
        // with this same layout.
        unsafe {
            dealloc(first_slot_ptr.as_ptr().cast(), layout);
        }
    }

    fn slot_ptr(first_slot_ptr: NonNull<Slot<T>>, index: usize) -> NonNull<Slot<T>> {
        assert!(
            index < CAPACITY,
            "slot {index} index out of bounds in pool of {} with capacity {CAPACITY}",
            type_name::<T>()
        );

        // SAFETY: Guarded by bounds check above and the block holds CAPACITY slots.
        unsafe { first_slot_ptr.add(index) }
    }

    fn block(&self) -> Result<NonNull<Slot<T>>> {
        self.first_slot_ptr.ok_or_else(|| {
            error!(
                item_type = type_name::<T>(),
                "request made to a pool whose block has been moved out"
            );
            Error::InvalidPool
        })
    }

    /// The number of slots in the pool. This never changes.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        CAPACITY
    }

    /// Whether the pool owns a block. A pool only becomes invalid when its block
    /// is moved out via [`take()`][1].
    ///
    /// [1]: Self::take
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.first_slot_ptr.is_some()
    }

    /// The number of slots currently handed out.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Only informational, mutations cannot affect pool behavior.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether no slots are currently handed out.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether every slot is handed out. An invalid pool is always full.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.first_slot_ptr.is_none() || self.next_free_index >= CAPACITY
    }

    /// The number of slots that can still be handed out.
    #[must_use]
    pub fn available(&self) -> usize {
        if self.is_valid() {
            // Cannot underflow, as count never exceeds capacity.
            CAPACITY.wrapping_sub(self.count)
        } else {
            0
        }
    }

    /// The drop policy the pool was created with.
    #[must_use]
    pub fn drop_policy(&self) -> DropPolicy {
        self.drop_policy
    }

    /// Allocates storage for `count` values of type `T`. Only a `count` of exactly 1 is supported.
    ///
    /// The returned storage is not initialized. The caller is responsible for writing a value to it
    /// before reading from it, and for dropping that value before returning the storage via
    /// [`deallocate()`][1].
    ///
    /// # Errors
    ///
    /// * [`Error::UnsupportedCount`] if `count` is not 1.
    /// * [`Error::Exhausted`] if every slot is already handed out. The pool does not grow.
    /// * [`Error::InvalidPool`] if the block of the pool has been moved out.
    ///
    /// The pool is not modified when an error is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_pool::{Error, FixedPool};
    ///
    /// let mut pool = FixedPool::<u32, 2>::new();
    ///
    /// assert!(matches!(
    ///     pool.allocate(2),
    ///     Err(Error::UnsupportedCount { count: 2 })
    /// ));
    ///
    /// let _a = pool.allocate(1)?;
    /// let _b = pool.allocate(1)?;
    ///
    /// assert!(matches!(pool.allocate(1), Err(Error::Exhausted { .. })));
    /// # Ok::<(), Error>(())
    /// ```
    ///
    /// [1]: Self::deallocate
    pub fn allocate(&mut self, count: usize) -> Result<NonNull<T>> {
        if count != 1 {
            error!(
                item_type = type_name::<T>(),
                count, "pool can only allocate one item per call"
            );
            return Err(Error::UnsupportedCount { count });
        }

        self.reserve_slot().map(|handle| handle.ptr())
    }

    /// Returns storage obtained from [`allocate()`][1] to the pool, making it the next slot
    /// to be handed out.
    ///
    /// Does nothing if `ptr` is null or `count` is not 1.
    ///
    /// # Safety
    ///
    /// Unless `ptr` is null or `count` is not 1:
    ///
    /// * `ptr` must have been returned by [`allocate()`][1] on this pool and not deallocated since.
    /// * Any value the caller placed in the storage must already have been dropped or moved out.
    ///
    /// None of this is checked.
    ///
    /// # Panics
    ///
    /// May panic if the safety requirements are violated and the pointer turns out to be outside
    /// the block of the pool. This is not guaranteed - violating them is undefined behavior.
    ///
    /// [1]: Self::allocate
    pub unsafe fn deallocate(&mut self, ptr: *mut T, count: usize) {
        if ptr.is_null() || count != 1 {
            return;
        }

        // An invalid pool cannot have handed out this pointer.
        let Some(first_slot_ptr) = self.first_slot_ptr else {
            return;
        };

        // The value is at offset 0 in its slot, so this is also a pointer to the slot.
        let slot = ptr.cast::<Slot<T>>();

        // SAFETY: The caller guarantees the pointer came from this pool, so it is at a whole
        // number of slots from the start of our block.
        let offset = unsafe { slot.offset_from(first_slot_ptr.as_ptr()) };

        let index = usize::try_from(offset)
            .expect("pointer precedes the pool block so it cannot have come from this pool");

        // SAFETY: Forwarding the caller's guarantee that the slot is handed out from this pool.
        unsafe {
            self.release_index(first_slot_ptr, index);
        }
    }

    /// Reserves a slot and returns a handle to it. The storage of the slot is not initialized.
    ///
    /// This is the first half of a two-phase contract: the holder of the handle may construct a
    /// value in the slot, must drop it again if it did, and then hands the slot back via
    /// [`release_slot()`][1].
    ///
    /// # Errors
    ///
    /// * [`Error::Exhausted`] if every slot is already handed out.
    /// * [`Error::InvalidPool`] if the block of the pool has been moved out.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_pool::FixedPool;
    ///
    /// let mut pool = FixedPool::<u32, 4>::new();
    ///
    /// let handle = pool.reserve_slot()?;
    /// assert_eq!(handle.index(), 0);
    ///
    /// // SAFETY: The handle came from this pool and we never put a value in the slot.
    /// unsafe { pool.release_slot(handle) };
    /// # Ok::<(), fixed_pool::Error>(())
    /// ```
    ///
    /// [1]: Self::release_slot
    pub fn reserve_slot(&mut self) -> Result<SlotHandle<T>> {
        let first_slot_ptr = self.block()?;

        #[cfg(debug_assertions)]
        self.integrity_check();

        if self.next_free_index >= CAPACITY {
            error!(
                item_type = type_name::<T>(),
                capacity = CAPACITY,
                "pool is exhausted"
            );
            return Err(Error::Exhausted { capacity: CAPACITY });
        }

        // Pop the next free index from the stack of free slots.
        let index = self.next_free_index;
        let slot = Self::slot_ptr(first_slot_ptr, index);

        // SAFETY: The slot is the head of the freelist, so it holds the freelist view.
        self.next_free_index = unsafe { Slot::next_free_index(slot) };

        // Cannot overflow, as count never exceeds capacity.
        self.count = self.count.wrapping_add(1);

        trace!(item_type = type_name::<T>(), index, "reserved slot");

        Ok(SlotHandle::new(index, Slot::value_ptr(slot)))
    }

    /// Returns a slot reserved via [`reserve_slot()`][1] to the pool.
    ///
    /// # Safety
    ///
    /// * The handle must have been returned by this pool.
    /// * Any value the caller placed in the slot must already have been dropped or moved out.
    ///
    /// # Panics
    ///
    /// Panics if the pool has been moved out of or if the slot index is out of bounds.
    ///
    /// [1]: Self::reserve_slot
    pub unsafe fn release_slot(&mut self, handle: SlotHandle<T>) {
        let first_slot_ptr = self
            .first_slot_ptr
            .expect("a handle cannot be released to a pool whose block has been moved out");

        // SAFETY: Forwarding the caller's guarantee that the slot is handed out from this pool.
        unsafe {
            self.release_index(first_slot_ptr, handle.index());
        }
    }

    /// # Safety
    ///
    /// The slot at `index` must be handed out from this pool and must not hold a live value.
    unsafe fn release_index(&mut self, first_slot_ptr: NonNull<Slot<T>>, index: usize) {
        let slot = Self::slot_ptr(first_slot_ptr, index);

        // Push the slot onto the stack of free slots.
        // SAFETY: The caller guarantees the slot is ours and no longer holds a live value.
        unsafe {
            Slot::set_next_free_index(slot, self.next_free_index);
        }

        self.next_free_index = index;

        self.count = self
            .count
            .checked_sub(1)
            .expect("a slot was released that was never handed out");

        trace!(item_type = type_name::<T>(), index, "released slot");
    }

    /// Reserves a slot and moves `value` into it.
    ///
    /// # Errors
    ///
    /// * [`Error::Exhausted`] if every slot is already handed out. The value is dropped.
    /// * [`Error::InvalidPool`] if the block of the pool has been moved out. The value is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_pool::FixedPool;
    ///
    /// let mut pool = FixedPool::<String, 4>::new();
    ///
    /// let handle = pool.insert("hello".to_string())?;
    ///
    /// // SAFETY: The handle came from this pool and the slot holds the value we inserted.
    /// let value = unsafe { pool.remove(handle) };
    /// assert_eq!(value, "hello");
    /// # Ok::<(), fixed_pool::Error>(())
    /// ```
    pub fn insert(&mut self, value: T) -> Result<SlotHandle<T>> {
        let handle = self.reserve_slot()?;

        // SAFETY: The slot was just reserved, so nobody else is using its storage
        // and it is sized and aligned for a T.
        unsafe {
            handle.ptr().write(value);
        }

        Ok(handle)
    }

    /// Moves the value out of a slot and returns the slot to the pool.
    ///
    /// # Safety
    ///
    /// * The handle must have been returned by this pool.
    /// * The slot must hold an initialized value (e.g. because it came from [`insert()`][1]).
    ///
    /// # Panics
    ///
    /// Panics if the pool has been moved out of.
    ///
    /// [1]: Self::insert
    #[must_use]
    pub unsafe fn remove(&mut self, handle: SlotHandle<T>) -> T {
        // SAFETY: The caller guarantees the slot holds an initialized value.
        let value = unsafe { handle.ptr().read() };

        // SAFETY: The value has been moved out above, so the slot holds no live value.
        unsafe {
            self.release_slot(handle);
        }

        value
    }

    /// Moves the block out of this pool into a new pool, leaving this one invalid.
    ///
    /// The returned pool behaves exactly as this one did: same occupancy, same freelist and all
    /// pointers handed out so far remain valid and are now owned by the returned pool. This pool
    /// rejects any further requests and releases nothing when dropped.
    ///
    /// Assigning the result to another pool (`*other = pool.take()`) releases the block
    /// previously owned by `other`.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_pool::FixedPool;
    ///
    /// let mut pool = FixedPool::<u32, 4>::new();
    /// let _slot = pool.allocate(1)?;
    ///
    /// let moved = pool.take();
    ///
    /// assert!(!pool.is_valid());
    /// assert!(moved.is_valid());
    /// assert_eq!(moved.len(), 1);
    /// # Ok::<(), fixed_pool::Error>(())
    /// ```
    #[must_use]
    pub fn take(&mut self) -> Self {
        let drop_policy = self.drop_policy;

        mem::replace(
            self,
            Self {
                first_slot_ptr: None,
                next_free_index: CAPACITY,
                count: 0,
                drop_policy,
            },
        )
    }

    /// Creates an independent copy of this pool with its own block.
    ///
    /// Every occupied slot of this pool is occupied in the copy, holding a clone of the value at
    /// the same index. Every vacant slot of this pool is vacant in the copy and the freelist of the
    /// copy hands out slots in exactly the same order as the freelist of this pool.
    ///
    /// If cloning a value panics, the clones made so far are dropped, the new block is released
    /// and this pool is unaffected.
    ///
    /// # Errors
    ///
    /// * [`Error::AllocationFailed`] if the new block cannot be allocated.
    /// * [`Error::InvalidPool`] if the block of this pool has been moved out.
    ///
    /// # Safety
    ///
    /// Every slot currently handed out from this pool must hold an initialized `T`.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_pool::FixedPool;
    ///
    /// let mut pool = FixedPool::<u32, 4>::new();
    /// let handle = pool.insert(42)?;
    ///
    /// // SAFETY: The only occupied slot holds an initialized value.
    /// let copy = unsafe { pool.try_clone() }?;
    ///
    /// assert_eq!(copy.len(), 1);
    /// assert_ne!(copy, pool);
    /// # let _ = handle;
    /// # Ok::<(), fixed_pool::Error>(())
    /// ```
    pub unsafe fn try_clone(&self) -> Result<Self>
    where
        T: Clone,
    {
        let source_first_slot_ptr = self.block()?;
        let source_next_free_index = self.next_free_index;

        let target_first_slot_ptr = Self::allocate_block()?;

        // Every slot of the new block starts out marked as occupied. The vacant ones then get the
        // freelist links of the source, which never exceed CAPACITY and thus never equal the mark.
        for index in 0..CAPACITY {
            // SAFETY: The slot is in the block we allocated above and holds nothing yet.
            unsafe {
                Slot::set_next_free_index(
                    Self::slot_ptr(target_first_slot_ptr, index),
                    OCCUPIED_MARK,
                );
            }
        }

        let mut index = source_next_free_index;

        while index < CAPACITY {
            // SAFETY: The slot is reachable from the freelist, so it holds the freelist view.
            let next_free_index =
                unsafe { Slot::next_free_index(Self::slot_ptr(source_first_slot_ptr, index)) };

            // Indexes do not depend on where the block is, so we copy the link verbatim.
            // SAFETY: The target slot is in the block we allocated above.
            unsafe {
                Slot::set_next_free_index(
                    Self::slot_ptr(target_first_slot_ptr, index),
                    next_free_index,
                );
            }

            index = next_free_index;
        }

        // Holds the number of leading slots of the new block that have been populated. If a clone
        // panics, we drop the clones among them and release the new block before the panic
        // continues.
        let mut populated = scopeguard::guard(0_usize, move |populated: usize| {
            for index in 0..populated {
                if Self::is_on_freelist(source_first_slot_ptr, source_next_free_index, index) {
                    continue;
                }

                // SAFETY: The slot is occupied in the source, so we wrote a clone into it.
                unsafe {
                    Slot::value_ptr(Self::slot_ptr(target_first_slot_ptr, index)).drop_in_place();
                }
            }

            // SAFETY: The block was allocated above and nothing else refers to it.
            unsafe {
                Self::release_block(target_first_slot_ptr);
            }
        });

        for index in 0..CAPACITY {
            let target_slot = Self::slot_ptr(target_first_slot_ptr, index);

            // SAFETY: Every slot at or after `index` still holds the freelist view written above.
            if unsafe { Slot::next_free_index(target_slot) } == OCCUPIED_MARK {
                let source_slot = Self::slot_ptr(source_first_slot_ptr, index);

                // SAFETY: The slot is handed out and the caller guarantees that handed out
                // slots hold an initialized value. We only read it via a shared reference.
                let value = unsafe { Slot::value_ptr(source_slot).as_ref() }.clone();

                // SAFETY: The target slot is in the block we allocated above, sized for a T.
                unsafe {
                    Slot::value_ptr(target_slot).write(value);
                }
            }

            // Cannot overflow, as index < CAPACITY.
            *populated = index.wrapping_add(1);
        }

        // Every slot is populated, so the new block is now owned by the new pool.
        _ = ScopeGuard::into_inner(populated);

        debug!(
            item_type = type_name::<T>(),
            capacity = CAPACITY,
            occupied = self.count,
            "duplicated pool block"
        );

        Ok(Self {
            first_slot_ptr: Some(target_first_slot_ptr),
            next_free_index: self.next_free_index,
            count: self.count,
            drop_policy: self.drop_policy,
        })
    }

    /// Replaces this pool with a copy of `source`, releasing the block this pool owned before.
    ///
    /// The copy is fully made before this pool is touched, so on error this pool is unchanged.
    /// See [`try_clone()`][1] for what the copy contains.
    ///
    /// # Errors
    ///
    /// Same as [`try_clone()`][1].
    ///
    /// # Safety
    ///
    /// Every slot currently handed out from `source` must hold an initialized `T`.
    ///
    /// # Panics
    ///
    /// Panics if this pool has slots handed out and its drop policy is
    /// [`DropPolicy::MustNotHoldItems`].
    ///
    /// [1]: Self::try_clone
    pub unsafe fn clone_from_pool(&mut self, source: &Self) -> Result<()>
    where
        T: Clone,
    {
        // SAFETY: Forwarding the caller's guarantee about the slots of `source`.
        let copy = unsafe { source.try_clone() }?;

        // The previous block is released when the old value is dropped here.
        *self = copy;

        Ok(())
    }

    /// Creates a new, empty pool for items of type `U` with the same capacity and configuration.
    ///
    /// This is how a container obtains storage for auxiliary types (e.g. list nodes wrapping its
    /// elements) that is configured like the pool it was given.
    ///
    /// # Errors
    ///
    /// [`Error::AllocationFailed`] if the block of the new pool cannot be allocated.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_pool::FixedPool;
    ///
    /// let pool = FixedPool::<u8, 32>::new();
    /// let rebound = pool.rebind::<(u64, u64)>()?;
    ///
    /// assert_eq!(rebound.capacity(), 32);
    /// # Ok::<(), fixed_pool::Error>(())
    /// ```
    pub fn rebind<U>(&self) -> Result<FixedPool<U, CAPACITY>> {
        FixedPool::<U, CAPACITY>::builder()
            .drop_policy(self.drop_policy)
            .try_build()
    }

    /// Whether the slot at `index` is reachable from the freelist that starts at `head`.
    fn is_on_freelist(first_slot_ptr: NonNull<Slot<T>>, head: usize, index: usize) -> bool {
        let mut current = head;

        while current < CAPACITY {
            if current == index {
                return true;
            }

            // SAFETY: The slot is reachable from the freelist, so it holds the freelist view.
            current = unsafe { Slot::next_free_index(Self::slot_ptr(first_slot_ptr, current)) };
        }

        false
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    fn integrity_check(&self) {
        let Some(first_slot_ptr) = self.first_slot_ptr else {
            return;
        };

        assert!(
            self.count <= CAPACITY,
            "pool of {} has {} occupied slots but capacity {CAPACITY}",
            type_name::<T>(),
            self.count
        );

        // Cannot underflow, checked above.
        let expected_vacant_count = CAPACITY.wrapping_sub(self.count);

        let mut observed_vacant_count: usize = 0;

        let mut index = self.next_free_index;

        while index < CAPACITY {
            // A slot that is on the freelist more than once makes the freelist a cycle, which
            // is caught here as a freelist longer than the number of vacant slots.
            assert!(
                observed_vacant_count < expected_vacant_count,
                "freelist of pool of {} is longer than its {expected_vacant_count} vacant slots",
                type_name::<T>()
            );

            // Cannot overflow, as it is below expected_vacant_count.
            observed_vacant_count = observed_vacant_count.wrapping_add(1);

            // SAFETY: The slot is reachable from the freelist, so it holds the freelist view.
            index = unsafe { Slot::next_free_index(Self::slot_ptr(first_slot_ptr, index)) };
        }

        assert!(
            index == CAPACITY,
            "freelist of pool of {} ends in out of bounds index {index}",
            type_name::<T>()
        );

        assert!(
            observed_vacant_count == expected_vacant_count,
            "pool of {} has {observed_vacant_count} of {expected_vacant_count} vacant slots on its freelist",
            type_name::<T>()
        );
    }
}

impl<T, const CAPACITY: usize> Default for FixedPool<T, CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const CAPACITY: usize> Drop for FixedPool<T, CAPACITY> {
    fn drop(&mut self) {
        let Some(first_slot_ptr) = self.first_slot_ptr.take() else {
            // Moved out of - the new owner releases the block.
            return;
        };

        // SAFETY: The block is ours and we just detached it from the pool, so it is
        // released exactly once.
        unsafe {
            Self::release_block(first_slot_ptr);
        }

        debug!(
            item_type = type_name::<T>(),
            capacity = CAPACITY,
            "released pool block"
        );

        if self.count == 0 {
            return;
        }

        match self.drop_policy {
            DropPolicy::MayLeakItems => warn!(
                item_type = type_name::<T>(),
                leaked = self.count,
                "pool dropped with occupied slots, their values were leaked"
            ),
            // If we are already panicking, we do not want to panic again because that will
            // simply obscure whatever the original panic was, leading to debug difficulties.
            DropPolicy::MustNotHoldItems => {
                if !thread::panicking() {
                    panic!(
                        "dropped a pool of {} with {} occupied slots with a policy that says it must be empty when dropped",
                        type_name::<T>(),
                        self.count
                    );
                }
            }
        }
    }
}

impl<T, const CAPACITY: usize> PartialEq for FixedPool<T, CAPACITY> {
    fn eq(&self, other: &Self) -> bool {
        // Two live pools never share a block, so the block identifies the pool even after
        // the pool has been moved around in memory.
        ptr::eq(self, other)
            || (self.first_slot_ptr.is_some() && self.first_slot_ptr == other.first_slot_ptr)
    }
}

impl<T, const CAPACITY: usize> Eq for FixedPool<T, CAPACITY> {}

impl<T, const CAPACITY: usize> fmt::Debug for FixedPool<T, CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("capacity", &CAPACITY)
            .field("len", &self.count)
            .field("next_free_index", &self.next_free_index)
            .field("is_valid", &self.is_valid())
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

// SAFETY: Yes, there are raw pointers involved here but nothing inherently non-thread-mobile
// about it, so as long as T itself can move between threads, the pool can do so, too.
unsafe impl<T: Send, const CAPACITY: usize> Send for FixedPool<T, CAPACITY> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::panic::{self, AssertUnwindSafe};
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};
    use std::thread;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(FixedPool<u32, 4>: Send, Default, Eq, fmt::Debug);
    assert_not_impl_any!(FixedPool<u32, 4>: Sync, Clone);
    assert_not_impl_any!(FixedPool<Rc<u32>, 4>: Send);

    /// Walks the freelist and returns the indexes in the order they would be handed out.
    fn free_list_order<T, const CAPACITY: usize>(pool: &FixedPool<T, CAPACITY>) -> Vec<usize> {
        let first_slot_ptr = pool.first_slot_ptr.unwrap();

        let mut order = Vec::new();
        let mut index = pool.next_free_index;

        while index < CAPACITY {
            order.push(index);

            // SAFETY: Reachable from the freelist, so it holds the freelist view.
            index = unsafe {
                Slot::next_free_index(FixedPool::<T, CAPACITY>::slot_ptr(first_slot_ptr, index))
            };
        }

        order
    }

    #[test]
    fn smoke_test() {
        let mut pool = FixedPool::<u32, 3>::new();

        let a = pool.insert(42).unwrap();
        let b = pool.insert(43).unwrap();
        let c = pool.insert(44).unwrap();

        assert_eq!(pool.len(), 3);
        assert!(pool.is_full());
        assert_eq!(pool.available(), 0);

        // SAFETY: All handles came from this pool and hold values.
        unsafe {
            assert_eq!(pool.remove(b), 43);
        }

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.available(), 1);

        let d = pool.insert(45).unwrap();

        // SAFETY: All handles came from this pool and hold values.
        unsafe {
            assert_eq!(*a.ptr().as_ref(), 42);
            assert_eq!(*c.ptr().as_ref(), 44);
            assert_eq!(*d.ptr().as_ref(), 45);
        }

        assert!(pool.is_full());
    }

    #[test]
    fn fresh_pool_hands_out_slots_in_order() {
        let mut pool = FixedPool::<u64, 4>::new();

        assert_eq!(free_list_order(&pool), vec![0, 1, 2, 3]);

        for expected_index in 0..4 {
            let handle = pool.reserve_slot().unwrap();
            assert_eq!(handle.index(), expected_index);
        }

        assert!(free_list_order(&pool).is_empty());
    }

    #[test]
    fn allocations_do_not_alias() {
        let mut pool = FixedPool::<u16, 16>::new();

        let mut pointers = (0..16)
            .map(|_| pool.allocate(1).unwrap().as_ptr())
            .collect::<Vec<_>>();

        pointers.sort_unstable();
        pointers.dedup();

        assert_eq!(pointers.len(), 16);
    }

    #[test]
    fn allocations_are_aligned_and_in_block() {
        #[repr(align(64))]
        struct Aligned;

        let mut pool = FixedPool::<Aligned, 4>::new();

        for _ in 0..4 {
            let ptr = pool.allocate(1).unwrap();
            assert!(ptr.as_ptr().is_aligned());
        }
    }

    #[test]
    fn deallocated_slot_is_reused_first() {
        let mut pool = FixedPool::<u32, 4>::new();

        let _a = pool.allocate(1).unwrap();
        let b = pool.allocate(1).unwrap();
        let _c = pool.allocate(1).unwrap();

        // SAFETY: The pointer came from this pool and u32 needs no dropping.
        unsafe {
            pool.deallocate(b.as_ptr(), 1);
        }

        assert_eq!(pool.allocate(1).unwrap(), b);
    }

    #[test]
    fn exhaustion_then_recovery() {
        let mut pool = FixedPool::<u32, 2>::new();

        let a = pool.allocate(1).unwrap();
        let _b = pool.allocate(1).unwrap();

        let error = pool.allocate(1).unwrap_err();
        assert!(matches!(error, Error::Exhausted { capacity: 2 }));
        assert!(error.is_out_of_memory());
        assert_eq!(pool.len(), 2);

        // SAFETY: The pointer came from this pool and u32 needs no dropping.
        unsafe {
            pool.deallocate(a.as_ptr(), 1);
        }

        assert_eq!(pool.allocate(1).unwrap(), a);
    }

    #[test]
    fn unsupported_count_does_not_touch_freelist() {
        let mut pool = FixedPool::<u32, 4>::new();
        let _a = pool.allocate(1).unwrap();

        let order_before = free_list_order(&pool);

        for count in [0, 2, 3, usize::MAX] {
            assert!(matches!(
                pool.allocate(count),
                Err(Error::UnsupportedCount { count: c }) if c == count
            ));
        }

        assert_eq!(free_list_order(&pool), order_before);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn deallocate_null_or_bad_count_is_noop() {
        let mut pool = FixedPool::<u32, 4>::new();
        let a = pool.allocate(1).unwrap();

        let order_before = free_list_order(&pool);

        // SAFETY: Null pointers and counts other than 1 are ignored.
        unsafe {
            pool.deallocate(ptr::null_mut(), 1);
            pool.deallocate(a.as_ptr(), 0);
            pool.deallocate(a.as_ptr(), 2);
        }

        assert_eq!(free_list_order(&pool), order_before);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn end_to_end_lifo_scenario() {
        let mut pool = FixedPool::<i32, 4>::new();

        let _a = pool.allocate(1).unwrap();
        let b = pool.allocate(1).unwrap();
        let c = pool.allocate(1).unwrap();
        let _d = pool.allocate(1).unwrap();

        // SAFETY: The pointers came from this pool and i32 needs no dropping.
        unsafe {
            pool.deallocate(b.as_ptr(), 1);
            pool.deallocate(c.as_ptr(), 1);
        }

        assert_eq!(pool.allocate(1).unwrap(), c);
        assert_eq!(pool.allocate(1).unwrap(), b);

        assert!(matches!(pool.allocate(1), Err(Error::Exhausted { .. })));
    }

    #[test]
    fn clone_copies_values_and_freelist_order() {
        let mut pool = FixedPool::<String, 6>::new();

        let handles = (0..6)
            .map(|i| pool.insert(format!("value {i}")).unwrap())
            .collect::<Vec<_>>();

        // Release slots 4, 1, 2 in that order so the freelist is 2 -> 1 -> 4.
        let mut handles = handles.into_iter().map(Some).collect::<Vec<_>>();
        for index in [4, 1, 2] {
            let handle = handles[index].take().unwrap();

            // SAFETY: The handle came from this pool and holds a value.
            drop(unsafe { pool.remove(handle) });
        }

        assert_eq!(free_list_order(&pool), vec![2, 1, 4]);

        // SAFETY: Every handed-out slot holds a value.
        let copy = unsafe { pool.try_clone() }.unwrap();

        assert_eq!(copy.len(), 3);
        assert_eq!(free_list_order(&copy), vec![2, 1, 4]);

        let copy_first_slot_ptr = copy.first_slot_ptr.unwrap();
        for handle in handles.iter().flatten() {
            let copy_slot = FixedPool::<String, 6>::slot_ptr(copy_first_slot_ptr, handle.index());

            // SAFETY: Occupied in both pools, holding initialized values.
            unsafe {
                assert_eq!(Slot::value_ptr(copy_slot).as_ref(), handle.ptr().as_ref());
                assert_ne!(Slot::value_ptr(copy_slot), handle.ptr());
            }
        }

        // Clean up the values so nothing leaks.
        let mut copy = copy;
        for handle in handles.into_iter().flatten() {
            let copy_handle = SlotHandle::new(
                handle.index(),
                Slot::value_ptr(FixedPool::<String, 6>::slot_ptr(
                    copy_first_slot_ptr,
                    handle.index(),
                )),
            );

            // SAFETY: Both handles point to initialized values in their respective pools.
            unsafe {
                drop(pool.remove(handle));
                drop(copy.remove(copy_handle));
            }
        }
    }

    #[test]
    fn clone_is_independent() {
        let mut pool = FixedPool::<u32, 4>::new();
        let handle = pool.insert(10).unwrap();

        // SAFETY: Every handed-out slot holds a value.
        let mut copy = unsafe { pool.try_clone() }.unwrap();

        // The next slot handed out by both is the same index.
        let original_next = pool.reserve_slot().unwrap();
        let copy_next = copy.reserve_slot().unwrap();
        assert_eq!(original_next.index(), copy_next.index());

        let copy_value = Slot::value_ptr(FixedPool::<u32, 4>::slot_ptr(
            copy.first_slot_ptr.unwrap(),
            handle.index(),
        ));

        // SAFETY: Both slots hold initialized u32 values.
        unsafe {
            copy_value.write(99);
            assert_eq!(*handle.ptr().as_ref(), 10);
            assert_eq!(*copy_value.as_ref(), 99);
        }
    }

    #[test]
    fn clone_of_full_pool_is_full() {
        let mut pool = FixedPool::<u8, 2>::new();
        _ = pool.insert(1).unwrap();
        _ = pool.insert(2).unwrap();

        // SAFETY: Every handed-out slot holds a value.
        let mut copy = unsafe { pool.try_clone() }.unwrap();

        assert!(copy.is_full());
        assert!(matches!(copy.allocate(1), Err(Error::Exhausted { .. })));
    }

    #[test]
    fn clone_panic_drops_partial_copies() {
        struct PanicOnSecondClone {
            clones: Rc<Cell<usize>>,
            drops: Rc<Cell<usize>>,
        }

        impl Clone for PanicOnSecondClone {
            fn clone(&self) -> Self {
                let clones = self.clones.get().wrapping_add(1);
                self.clones.set(clones);

                assert!(clones < 2, "second clone");

                Self {
                    clones: Rc::clone(&self.clones),
                    drops: Rc::clone(&self.drops),
                }
            }
        }

        impl Drop for PanicOnSecondClone {
            fn drop(&mut self) {
                self.drops.set(self.drops.get().wrapping_add(1));
            }
        }

        let clones = Rc::new(Cell::new(0));
        let drops = Rc::new(Cell::new(0));

        let mut pool = FixedPool::<PanicOnSecondClone, 4>::new();
        for _ in 0..3 {
            _ = pool
                .insert(PanicOnSecondClone {
                    clones: Rc::clone(&clones),
                    drops: Rc::clone(&drops),
                })
                .unwrap();
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            // SAFETY: Every handed-out slot holds a value.
            unsafe { pool.try_clone() }
        }));

        assert!(result.is_err());

        // The one successful clone was dropped again, the originals are untouched.
        assert_eq!(drops.get(), 1);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn clone_from_pool_replaces_contents() {
        let mut source = FixedPool::<u32, 4>::new();
        let a = source.insert(1).unwrap();
        let b = source.insert(2).unwrap();

        let mut target = FixedPool::<u32, 4>::new();
        _ = target.insert(7).unwrap();
        _ = target.insert(8).unwrap();
        let old = target.insert(9).unwrap();

        // SAFETY: Every handed-out slot of the source holds a value.
        unsafe { target.clone_from_pool(&source) }.unwrap();

        assert_eq!(target.len(), 2);
        assert_eq!(free_list_order(&target), free_list_order(&source));
        assert_eq!(free_list_order(&target), vec![2, 3]);
        assert_ne!(target, source);

        // The slot that held the last value of the old contents is vacant again.
        assert!(free_list_order(&target).contains(&old.index()));

        let target_first_slot_ptr = target.first_slot_ptr.unwrap();

        for (handle, expected) in [(&a, 1), (&b, 2)] {
            let target_slot = FixedPool::<u32, 4>::slot_ptr(target_first_slot_ptr, handle.index());

            // SAFETY: Occupied in both pools, holding initialized values.
            unsafe {
                assert_eq!(*Slot::value_ptr(target_slot).as_ref(), expected);
                assert_ne!(Slot::value_ptr(target_slot), handle.ptr());
            }
        }

        // The copy is independent of the source.
        // SAFETY: The handles came from the source and hold values.
        unsafe {
            assert_eq!(source.remove(a), 1);
            assert_eq!(source.remove(b), 2);
        }

        let next = target.insert(3).unwrap();
        assert_eq!(next.index(), 2);
        assert_eq!(target.len(), 3);
    }

    #[test]
    fn take_invalidates_source() {
        let mut pool = FixedPool::<u32, 4>::new();
        let a = pool.allocate(1).unwrap();
        let order_before = free_list_order(&pool);

        let mut moved = pool.take();

        assert!(!pool.is_valid());
        assert!(pool.is_empty());
        assert!(pool.is_full());
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.capacity(), 4);
        assert!(matches!(pool.allocate(1), Err(Error::InvalidPool)));
        assert!(matches!(pool.reserve_slot(), Err(Error::InvalidPool)));

        // SAFETY: Pools with no block never release anything.
        unsafe {
            pool.deallocate(a.as_ptr(), 1);
        }

        assert!(moved.is_valid());
        assert_eq!(moved.len(), 1);
        assert_eq!(free_list_order(&moved), order_before);

        // Storage handed out before the move now belongs to the new owner.
        // SAFETY: The pointer came from the block now owned by `moved`.
        unsafe {
            moved.deallocate(a.as_ptr(), 1);
        }

        assert_eq!(moved.allocate(1).unwrap(), a);
    }

    #[test]
    fn clone_of_invalid_pool_fails() {
        let mut pool = FixedPool::<u32, 4>::new();
        let _moved = pool.take();

        // SAFETY: No slots are handed out.
        assert!(matches!(
            unsafe { pool.try_clone() },
            Err(Error::InvalidPool)
        ));
    }

    #[test]
    fn move_assignment_releases_previous_block() {
        let mut source = FixedPool::<u32, 4>::new();
        let slot = source.allocate(1).unwrap();

        let mut target = FixedPool::<u32, 4>::builder()
            .drop_policy(DropPolicy::MustNotHoldItems)
            .build();

        assert!(target.is_empty());

        // The old block of `target` is empty, so releasing it does not trip its policy.
        target = source.take();

        assert_eq!(target.len(), 1);
        assert!(!source.is_valid());

        // SAFETY: The pointer came from the block now owned by `target`.
        unsafe {
            target.deallocate(slot.as_ptr(), 1);
        }
    }

    #[test]
    #[allow(clippy::eq_op, reason = "comparing a pool to itself is the point")]
    fn identity_equality() {
        let a = FixedPool::<u32, 4>::new();
        let b = FixedPool::<u32, 4>::new();

        assert_eq!(a, a);
        assert_ne!(a, b);

        // Moving the pool around does not change which block it owns.
        let a_moved = a;
        let a_boxed = Box::new(a_moved);
        assert_eq!(*a_boxed, *a_boxed);
        assert_ne!(*a_boxed, b);
    }

    #[test]
    #[allow(clippy::eq_op, reason = "comparing a pool to itself is the point")]
    fn invalid_pools_are_not_equal() {
        let mut a = FixedPool::<u32, 4>::new();
        let mut b = FixedPool::<u32, 4>::new();
        let _a_moved = a.take();
        let _b_moved = b.take();

        assert_ne!(a, b);
        assert_eq!(a, a);
    }

    #[test]
    fn rebind_keeps_configuration() {
        let pool = FixedPool::<u8, 8>::builder()
            .drop_policy(DropPolicy::MustNotHoldItems)
            .build();

        let rebound = pool.rebind::<[u64; 3]>().unwrap();

        assert_eq!(rebound.capacity(), 8);
        assert!(rebound.is_empty());
        assert_eq!(rebound.drop_policy(), DropPolicy::MustNotHoldItems);
    }

    #[test]
    fn zero_sized_items_get_distinct_slots() {
        let mut pool = FixedPool::<(), 3>::new();

        let a = pool.allocate(1).unwrap();
        let b = pool.allocate(1).unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn does_not_drop_values_on_drop() {
        struct Droppable {
            dropped: Rc<Cell<bool>>,
        }

        impl Drop for Droppable {
            fn drop(&mut self) {
                self.dropped.set(true);
            }
        }

        let dropped = Rc::new(Cell::new(false));
        let mut pool = FixedPool::<Droppable, 3>::new();

        _ = pool
            .insert(Droppable {
                dropped: Rc::clone(&dropped),
            })
            .unwrap();

        drop(pool);

        assert!(!dropped.get());
    }

    #[test]
    fn remove_returns_value_without_dropping() {
        let dropped = Rc::new(Cell::new(0_usize));

        struct Counted(Rc<Cell<usize>>);

        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.set(self.0.get().wrapping_add(1));
            }
        }

        let mut pool = FixedPool::<Counted, 2>::new();
        let handle = pool.insert(Counted(Rc::clone(&dropped))).unwrap();

        // SAFETY: The handle came from this pool and holds a value.
        let value = unsafe { pool.remove(handle) };
        assert_eq!(dropped.get(), 0);

        drop(value);
        assert_eq!(dropped.get(), 1);
    }

    #[test]
    #[should_panic]
    fn drop_occupied_with_forbidden_policy_panics() {
        let mut pool = FixedPool::<u32, 3>::builder()
            .drop_policy(DropPolicy::MustNotHoldItems)
            .build();

        _ = pool.insert(123).unwrap();
    }

    #[test]
    fn drop_empty_with_forbidden_policy_ok() {
        let mut pool = FixedPool::<u32, 3>::builder()
            .drop_policy(DropPolicy::MustNotHoldItems)
            .build();

        let handle = pool.insert(123).unwrap();

        // SAFETY: The handle came from this pool and holds a value.
        _ = unsafe { pool.remove(handle) };

        drop(pool);
    }

    #[test]
    fn oversized_block_is_allocation_failure() {
        let result = FixedPool::<u64, { usize::MAX / 4 }>::try_new();

        assert!(matches!(
            result,
            Err(Error::AllocationFailed { layout: None })
        ));
    }

    #[test]
    #[should_panic]
    fn oversized_block_new_panics() {
        drop(FixedPool::<u64, { usize::MAX / 4 }>::new());
    }

    #[test]
    fn multithreaded_via_mutex() {
        let pool = Arc::new(Mutex::new(FixedPool::<u32, 3>::new()));

        let a = pool.lock().unwrap().insert(42).unwrap().index();

        let pool_clone = Arc::clone(&pool);
        thread::spawn(move || {
            let mut pool = pool_clone.lock().unwrap();
            _ = pool.insert(43).unwrap();
        })
        .join()
        .unwrap();

        let pool = pool.lock().unwrap();
        assert_eq!(a, 0);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn moved_to_other_thread() {
        let mut pool = FixedPool::<u32, 3>::new();
        _ = pool.insert(1).unwrap();

        let len = thread::spawn(move || pool.len()).join().unwrap();

        assert_eq!(len, 1);
    }
}
