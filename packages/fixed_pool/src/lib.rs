#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A fixed-capacity memory pool that hands out storage for one item at a time, for use as the
//! allocation strategy of a container.
//!
//! [`FixedPool<T, CAPACITY>`][FixedPool] allocates a single block of `CAPACITY` slots up front,
//! each slot sized and aligned for one `T`. Slots are handed out and returned in O(1) without
//! touching the system allocator. Vacant slots form an intrusive freelist: the storage of each
//! vacant slot holds the index of the next vacant one, so the pool needs no memory beyond the
//! block itself.
//!
//! # Scope
//!
//! * The pool has a fixed capacity. When all slots are handed out, further requests fail with
//!   [`Error::Exhausted`] instead of growing the pool.
//! * Each request is for exactly one item. Requests for any other count fail with
//!   [`Error::UnsupportedCount`].
//! * The pool is not synchronized. It may be moved between threads but not shared.
//!
//! # Raw storage, not values
//!
//! The pool manages the lifetime of storage, not of values. It does not initialize the slots it
//! hands out and does not drop values in slots that are handed back or that remain occupied when
//! the pool is dropped. [`FixedPool::insert()`] and [`FixedPool::remove()`] layer value
//! construction and destruction on top of the raw [`FixedPool::reserve_slot()`] and
//! [`FixedPool::release_slot()`] for callers that want it.
//!
//! # Use from containers
//!
//! The [`SlotAllocator`] trait describes the pool as a generic allocator: the item type, a way to
//! obtain an equivalently configured pool for another item type, and [`AllocatorTraits`] that
//! tell a container whether the allocator follows the container when it is copied, moved or
//! swapped.
//!
//! # Examples
//!
//! ```
//! use fixed_pool::{Error, FixedPool};
//!
//! let mut pool = FixedPool::<i32, 4>::new();
//!
//! let a = pool.allocate(1)?;
//! let b = pool.allocate(1)?;
//! let c = pool.allocate(1)?;
//! let _d = pool.allocate(1)?;
//!
//! // SAFETY: The pointers came from this pool and i32 does not need dropping.
//! unsafe {
//!     pool.deallocate(b.as_ptr(), 1);
//!     pool.deallocate(c.as_ptr(), 1);
//! }
//!
//! // The most recently returned slot is reused first.
//! assert_eq!(pool.allocate(1)?, c);
//! assert_eq!(pool.allocate(1)?, b);
//!
//! assert!(matches!(pool.allocate(1), Err(Error::Exhausted { capacity: 4 })));
//! # let _ = a;
//! # Ok::<(), Error>(())
//! ```

mod allocator;
mod builder;
mod drop_policy;
mod error;
mod handle;
mod pool;
mod slot;

pub use allocator::*;
pub use builder::*;
pub use drop_policy::*;
pub use error::*;
pub use handle::*;
pub use pool::*;
pub(crate) use slot::*;
