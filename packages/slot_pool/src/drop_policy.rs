/// Determines what happens when a pool is dropped while some of its slots are still on loan.
///
/// Dropping a pool never runs the destructors of loaned values. The policy only decides
/// whether that situation is acceptable.
///
/// # Examples
///
/// ```
/// use slot_pool::{DropPolicy, SlotPool};
///
/// // The drop policy is set at pool creation time.
/// let pool = SlotPool::<u32>::builder()
///     .drop_policy(DropPolicy::MustNotHaveItems)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The pool releases its memory when dropped, abandoning any values still on loan.
    /// This is the default.
    #[default]
    MayLeakItems,

    /// The pool will panic if any slot is still on loan when it is dropped.
    ///
    /// This may be valuable if the caller is expected to release every value before tearing
    /// down the pool, for example because the values own resources of their own.
    MustNotHaveItems,
}
