/// Determines what happens when a pool is dropped while some of its slots are still occupied.
///
/// The pool only manages raw storage. It never drops the values placed in its slots, so any
/// value still living in the pool when the pool is dropped is leaked. By default this is
/// reported as a warning and otherwise tolerated.
///
/// # Examples
///
/// ```
/// use fixed_pool::{DropPolicy, FixedPool};
///
/// let pool = FixedPool::<u32, 8>::builder()
///     .drop_policy(DropPolicy::MustNotHoldItems)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The pool may be dropped with occupied slots. The values in those slots are leaked
    /// without their destructors running. This is the default.
    #[default]
    MayLeakItems,

    /// The pool will panic if any slot is still occupied when the pool is dropped.
    ///
    /// This is useful when the owner of the pool (typically a container) is expected to return
    /// every slot before letting go of the pool, and a leftover slot indicates a bug.
    MustNotHoldItems,
}
