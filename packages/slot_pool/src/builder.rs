use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;

use lock_api::RawMutex as RawMutexApi;

use crate::{DEFAULT_GROW_COUNT, DEFAULT_INITIAL_COUNT, DropPolicy, Error, NoLock, SlotPool};

/// Builder for creating an instance of [`SlotPool`].
///
/// The lock type of the resulting pool is chosen via the type parameter of the pool whose
/// builder is requested, e.g. `SlotPool::<u64, RawMutex>::builder()` or
/// `SyncSlotPool::<u64>::builder()`.
///
/// # Examples
///
/// ```
/// use slot_pool::{DropPolicy, SlotPool};
///
/// let pool = SlotPool::<u32>::builder()
///     .initial_count(64)
///     .grow_count(16)
///     .drop_policy(DropPolicy::MayLeakItems)
///     .build()
///     .unwrap();
///
/// assert_eq!(pool.capacity(), 64);
/// ```
#[must_use]
pub struct SlotPoolBuilder<T, L = NoLock> {
    initial_count: usize,
    grow_count: usize,
    drop_policy: DropPolicy,

    _item: PhantomData<fn() -> (T, L)>,
}

impl<T, L> fmt::Debug for SlotPoolBuilder<T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotPoolBuilder")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("lock_type", &format_args!("{}", type_name::<L>()))
            .field("initial_count", &self.initial_count)
            .field("grow_count", &self.grow_count)
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

impl<T, L: RawMutexApi> SlotPoolBuilder<T, L> {
    pub(crate) fn new() -> Self {
        Self {
            initial_count: DEFAULT_INITIAL_COUNT,
            grow_count: DEFAULT_GROW_COUNT,
            drop_policy: DropPolicy::default(),
            _item: PhantomData,
        }
    }

    /// Sets the number of slots allocated when the pool is built.
    ///
    /// If zero, the grow count is used instead.
    pub fn initial_count(mut self, count: usize) -> Self {
        self.initial_count = count;
        self
    }

    /// Sets the number of slots added each time the pool runs out of free slots.
    ///
    /// If zero, the initial count is used instead.
    pub fn grow_count(mut self, count: usize) -> Self {
        self.grow_count = count;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how to treat slots
    /// still on loan when the pool is dropped.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the pool, allocating its initial chunk of slots.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroCapacity`] if both the initial count and the grow count are zero.
    ///
    /// Returns [`Error::AllocationExhausted`] if the initial chunk cannot be allocated.
    pub fn build(self) -> Result<SlotPool<T, L>, Error> {
        SlotPool::new_inner(self.initial_count, self.grow_count, self.drop_policy)
    }
}
