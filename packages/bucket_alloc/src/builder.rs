use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;

use lock_api::RawMutex as RawMutexApi;
use slot_pool::{DEFAULT_GROW_COUNT, DEFAULT_INITIAL_COUNT, NoLock, RawMutex};

use crate::{BucketAllocator, Result};

/// Builder for creating an instance of [`BucketAllocator`].
///
/// Every size class is created with the same initial and grow counts.
///
/// # Examples
///
/// ```
/// use bucket_alloc::BucketAllocator;
///
/// let allocator = BucketAllocator::builder()
///     .initial_count(8)
///     .grow_count(8)
///     .build()
///     .unwrap();
///
/// let stats = allocator.stats();
/// assert!(stats.size_classes().iter().all(|class| class.capacity() == 8));
/// ```
#[must_use]
pub struct BucketAllocatorBuilder<L = RawMutex> {
    initial_count: usize,
    grow_count: usize,

    _lock: PhantomData<fn() -> L>,
}

impl<L> fmt::Debug for BucketAllocatorBuilder<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketAllocatorBuilder")
            .field("lock_type", &format_args!("{}", type_name::<L>()))
            .field("initial_count", &self.initial_count)
            .field("grow_count", &self.grow_count)
            .finish()
    }
}

impl BucketAllocatorBuilder<RawMutex> {
    pub(crate) fn new() -> Self {
        Self {
            initial_count: DEFAULT_INITIAL_COUNT,
            grow_count: DEFAULT_GROW_COUNT,
            _lock: PhantomData,
        }
    }

    /// Builds an allocator without real locking, for use from one thread at a time.
    ///
    /// The resulting [`LocalBucketAllocator`][crate::LocalBucketAllocator] can be moved
    /// between threads but not shared between them.
    ///
    /// # Examples
    ///
    /// ```
    /// use bucket_alloc::{BucketAllocator, LocalBucketAllocator};
    ///
    /// let allocator: LocalBucketAllocator = BucketAllocator::builder()
    ///     .single_threaded()
    ///     .build()
    ///     .unwrap();
    ///
    /// let block = allocator.alloc(100);
    /// assert!(block.is_some());
    ///
    /// // SAFETY: The pointer came from this allocator and is released once.
    /// unsafe { allocator.dealloc(block) };
    /// ```
    pub fn single_threaded(self) -> BucketAllocatorBuilder<NoLock> {
        BucketAllocatorBuilder {
            initial_count: self.initial_count,
            grow_count: self.grow_count,
            _lock: PhantomData,
        }
    }
}

impl<L: RawMutexApi> BucketAllocatorBuilder<L> {
    /// Sets the number of blocks each size class allocates when the allocator is built.
    ///
    /// If zero, the grow count is used instead.
    pub fn initial_count(mut self, count: usize) -> Self {
        self.initial_count = count;
        self
    }

    /// Sets the number of blocks a size class adds each time it runs out of free blocks.
    ///
    /// If zero, the initial count is used instead.
    pub fn grow_count(mut self, count: usize) -> Self {
        self.grow_count = count;
        self
    }

    /// Builds the allocator, allocating the initial blocks of every size class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pool`][crate::Error::Pool] if both counts are zero or if the heap
    /// cannot supply the initial blocks.
    pub fn build(self) -> Result<BucketAllocator<L>> {
        BucketAllocator::new_inner(self.initial_count, self.grow_count)
    }
}
