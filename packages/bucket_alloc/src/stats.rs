use lock_api::RawMutex as RawMutexApi;
use slot_pool::SlotPool;

/// A snapshot of the state of one size class.
///
/// The values are read one after another, so under concurrent use they may not all reflect
/// the same instant.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SizeClassStats {
    class_size: usize,
    capacity: usize,
    in_use: usize,
    chunk_count: usize,
}

impl SizeClassStats {
    pub(crate) fn of<T, L: RawMutexApi>(class_size: usize, pool: &SlotPool<T, L>) -> Self {
        Self {
            class_size,
            capacity: pool.capacity(),
            in_use: pool.len(),
            chunk_count: pool.chunk_count(),
        }
    }

    /// The block size of the size class, in bytes, excluding the size header.
    #[must_use]
    pub fn class_size(&self) -> usize {
        self.class_size
    }

    /// The number of blocks the size class has allocated, whether in use or free.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of blocks currently handed out to callers.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// The number of blocks that can be handed out before the size class has to grow.
    #[must_use]
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.in_use)
    }

    /// The number of chunks the size class has allocated from the heap.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }
}

/// A snapshot of the state of a [`BucketAllocator`][crate::BucketAllocator].
///
/// # Examples
///
/// ```
/// use bucket_alloc::BucketAllocator;
///
/// let allocator = BucketAllocator::new().unwrap();
///
/// let small = allocator.alloc(10);
/// let large = allocator.alloc(4096);
///
/// let stats = allocator.stats();
/// assert_eq!(stats.blocks_in_use(), 1);
/// assert_eq!(stats.large_allocations(), 1);
///
/// // SAFETY: Both pointers came from this allocator and are released once.
/// unsafe {
///     allocator.dealloc(small);
///     allocator.dealloc(large);
/// }
/// ```
#[derive(Clone, Debug)]
pub struct AllocatorStats {
    size_classes: Vec<SizeClassStats>,
    large_allocations: usize,
}

impl AllocatorStats {
    pub(crate) fn new(size_classes: Vec<SizeClassStats>, large_allocations: usize) -> Self {
        Self {
            size_classes,
            large_allocations,
        }
    }

    /// Per-class statistics, in ascending order of block size.
    #[must_use]
    pub fn size_classes(&self) -> &[SizeClassStats] {
        &self.size_classes
    }

    /// Statistics of the size class with the given block size, if there is one.
    #[must_use]
    pub fn size_class(&self, class_size: usize) -> Option<&SizeClassStats> {
        self.size_classes
            .iter()
            .find(|stats| stats.class_size == class_size)
    }

    /// The number of pooled blocks currently handed out, across all size classes.
    #[must_use]
    pub fn blocks_in_use(&self) -> usize {
        self.size_classes.iter().map(SizeClassStats::in_use).sum()
    }

    /// The number of allocations larger than every size class that are currently live.
    #[must_use]
    pub fn large_allocations(&self) -> usize {
        self.large_allocations
    }
}

#[cfg(test)]
mod tests {
    use slot_pool::NoLock;

    use super::*;

    #[test]
    fn snapshot_of_pool() {
        let pool = SlotPool::<u64, NoLock>::with_counts(4, 2).unwrap();
        let item = pool.acquire(1).unwrap();

        let stats = SizeClassStats::of(8, &pool);

        assert_eq!(stats.class_size(), 8);
        assert_eq!(stats.capacity(), 4);
        assert_eq!(stats.in_use(), 1);
        assert_eq!(stats.available(), 3);
        assert_eq!(stats.chunk_count(), 1);

        // SAFETY: Released once, not used afterwards.
        unsafe { pool.release(item) };
    }

    #[test]
    fn totals_sum_over_classes() {
        let pool = SlotPool::<u64, NoLock>::with_counts(4, 2).unwrap();
        let a = pool.acquire(1).unwrap();
        let b = pool.acquire(2).unwrap();

        let stats = AllocatorStats::new(
            vec![SizeClassStats::of(4, &pool), SizeClassStats::of(8, &pool)],
            3,
        );

        assert_eq!(stats.blocks_in_use(), 4);
        assert_eq!(stats.large_allocations(), 3);
        assert_eq!(stats.size_class(8).map(SizeClassStats::in_use), Some(2));
        assert!(stats.size_class(5).is_none());

        // SAFETY: Released once, not used afterwards.
        unsafe {
            pool.release(a);
            pool.release(b);
        }
    }
}
