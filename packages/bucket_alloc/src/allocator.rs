use std::alloc::{self, Layout};
use std::any::type_name;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use lock_api::RawMutex as RawMutexApi;
use slot_pool::{NoLock, RawMutex};
use tracing::{debug, trace, warn};

use crate::{
    ALIGNMENT, AllocatorStats, BucketAllocatorBuilder, ClassPools, Error, HEADER_SIZE,
    LARGEST_SIZE_CLASS, Result, SIZE_CLASSES, size_class_for,
};

/// A `malloc`/`free`-style byte allocator backed by one slot pool per size class.
///
/// Requests of up to [`LARGEST_SIZE_CLASS`] bytes are rounded up to the nearest of the
/// [`SIZE_CLASSES`] and served from the pool of that class. Larger requests go directly to the
/// heap. Every allocation is preceded by a [`HEADER_SIZE`]-byte header recording the class
/// block size (or, for large allocations, the exact requested size), so [`dealloc()`][1] does
/// not need to be told the size again.
///
/// Returned pointers are aligned to [`ALIGNMENT`].
///
/// # Thread safety
///
/// The allocator is generic over the lock used by its size classes. The default,
/// [`BucketAllocator`] with [`RawMutex`], can be shared between threads. Requests routed to
/// different size classes never contend with each other. [`LocalBucketAllocator`] skips real
/// locking and can only be used from one thread at a time.
///
/// # Dropping
///
/// Dropping the allocator releases all pooled memory, including blocks still in use. Live
/// large allocations are not tracked individually and leak if never deallocated.
///
/// # Examples
///
/// ```
/// use bucket_alloc::BucketAllocator;
///
/// let allocator = BucketAllocator::new().unwrap();
///
/// let block = allocator.alloc(20).unwrap();
///
/// // SAFETY: The block is at least 20 bytes long and owned by us until released.
/// unsafe { block.write_bytes(0xFF, 20) };
///
/// // SAFETY: The pointer came from this allocator and is released once.
/// unsafe { allocator.dealloc(Some(block)) };
/// ```
///
/// [1]: Self::dealloc
pub struct BucketAllocator<L: RawMutexApi = RawMutex> {
    pools: ClassPools<L>,

    live_large_allocations: AtomicUsize,
}

/// A [`BucketAllocator`] for use from one thread at a time.
pub type LocalBucketAllocator = BucketAllocator<NoLock>;

impl BucketAllocator {
    /// Creates a thread-safe allocator with the default initial and grow counts for every
    /// size class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pool`] if the heap cannot supply the initial blocks.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Starts building a new [`BucketAllocator`].
    pub fn builder() -> BucketAllocatorBuilder {
        BucketAllocatorBuilder::new()
    }
}

impl<L: RawMutexApi> BucketAllocator<L> {
    pub(crate) fn new_inner(initial_count: usize, grow_count: usize) -> Result<Self> {
        let pools = ClassPools::new(initial_count, grow_count)?;

        debug!(
            lock_type = type_name::<L>(),
            initial_count,
            grow_count,
            size_classes = SIZE_CLASSES.len(),
            "bucket allocator created"
        );

        Ok(Self {
            pools,
            live_large_allocations: AtomicUsize::new(0),
        })
    }

    /// Allocates at least `size` bytes and returns a pointer to them.
    ///
    /// Returns `None` if `size` is zero or negative or if the memory cannot be supplied.
    /// Use [`try_alloc()`][1] to find out why an allocation failed.
    ///
    /// The memory is uninitialized. Release it via [`dealloc()`][2] on the same allocator.
    ///
    /// # Examples
    ///
    /// ```
    /// use bucket_alloc::BucketAllocator;
    ///
    /// let allocator = BucketAllocator::new().unwrap();
    ///
    /// assert!(allocator.alloc(0).is_none());
    /// assert!(allocator.alloc(-1).is_none());
    ///
    /// let block = allocator.alloc(1);
    /// assert!(block.is_some());
    ///
    /// // SAFETY: The pointer came from this allocator and is released once.
    /// unsafe { allocator.dealloc(block) };
    /// ```
    ///
    /// [1]: Self::try_alloc
    /// [2]: Self::dealloc
    #[must_use]
    pub fn alloc(&self, size: isize) -> Option<NonNull<u8>> {
        let size = usize::try_from(size).ok()?;

        self.try_alloc(size).ok()
    }

    /// Allocates at least `size` bytes and returns a pointer to them.
    ///
    /// The memory is uninitialized. Release it via [`dealloc()`][1] on the same allocator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroSize`] if `size` is zero.
    ///
    /// Returns [`Error::SizeOverflow`] if `size` plus the header cannot be allocated at all.
    ///
    /// Returns [`Error::ClassExhausted`] or [`Error::HeapExhausted`] if the memory cannot
    /// be supplied.
    ///
    /// [1]: Self::dealloc
    pub fn try_alloc(&self, size: usize) -> Result<NonNull<u8>> {
        if size == 0 {
            return Err(Error::ZeroSize);
        }

        match size_class_for(size) {
            Some(class_size) => self.alloc_pooled(size, class_size),
            None => self.alloc_large(size),
        }
    }

    fn alloc_pooled(&self, size: usize, class_size: usize) -> Result<NonNull<u8>> {
        let header = self.pools.acquire(class_size).map_err(|source| {
            warn!(size, class_size, "size class could not supply a block");

            Error::ClassExhausted {
                size,
                class_size,
                source,
            }
        })?;

        let header_value = isize::try_from(class_size)
            .expect("size classes are small constants that always fit in isize");

        // SAFETY: The block is ours and starts with an aligned isize header.
        unsafe {
            header.write(header_value);
        }

        // SAFETY: The payload directly follows the header within the same block.
        Ok(unsafe { header.byte_add(HEADER_SIZE) }.cast())
    }

    fn alloc_large(&self, size: usize) -> Result<NonNull<u8>> {
        let (layout, header_value) = large_layout(size).ok_or(Error::SizeOverflow { size })?;

        // SAFETY: The layout is never zero-sized because it includes the header.
        let Some(header) = NonNull::new(unsafe { alloc::alloc(layout) }) else {
            warn!(size, "heap could not supply a large allocation");
            return Err(Error::HeapExhausted { size });
        };

        let header = header.cast::<isize>();

        // SAFETY: The allocation is ours and aligned for isize.
        unsafe {
            header.write(header_value);
        }

        self.live_large_allocations.fetch_add(1, Ordering::Relaxed);

        trace!(size, "allocation larger than every size class served from the heap");

        // SAFETY: The allocation is `HEADER_SIZE + size` bytes long, so the payload is in bounds.
        Ok(unsafe { header.byte_add(HEADER_SIZE) }.cast())
    }

    /// Releases memory previously returned by [`alloc()`][1] or [`try_alloc()`][2].
    ///
    /// Passing `None` does nothing, so the result of [`alloc()`][1] can be passed back as-is.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`alloc()`][1] or [`try_alloc()`][2] of this allocator
    /// and must not have been released since. The memory must not be used after this call.
    ///
    /// Only blocks served by a size class are ownership-checked. Blocks larger than
    /// [`LARGEST_SIZE_CLASS`][3] go straight back to the heap, so releasing one of them twice
    /// or releasing a pointer that did not come from this allocator is undefined behavior
    /// rather than a panic.
    ///
    /// # Panics
    ///
    /// Panics if the header preceding `ptr` holds a negative size, which means the memory is
    /// corrupted. Also panics if the size class the header points to does not own the block,
    /// which means the header was overwritten or the pointer came from somewhere else.
    ///
    /// [1]: Self::alloc
    /// [2]: Self::try_alloc
    /// [3]: crate::LARGEST_SIZE_CLASS
    pub unsafe fn dealloc(&self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else {
            return;
        };

        // SAFETY: The caller guarantees that the pointer came from us, so a header precedes it.
        let header = unsafe { ptr.byte_sub(HEADER_SIZE) }.cast::<isize>();

        // SAFETY: The header is initialized by every allocation path.
        let header_value = unsafe { header.read() };

        let Ok(size) = usize::try_from(header_value) else {
            panic!(
                "dealloc({ptr:p}) found negative size {header_value} in the header; the memory is corrupted or did not come from this allocator"
            );
        };

        match size_class_for(size) {
            // SAFETY: Forwarding guarantees from caller. The pool verifies ownership.
            Some(class_size) => unsafe { self.pools.release(class_size, header) },
            // SAFETY: Forwarding guarantees from caller.
            None => unsafe { self.dealloc_large(header, size) },
        }
    }

    /// # Safety
    ///
    /// `header` must be the start of a live large allocation made for `size` bytes.
    unsafe fn dealloc_large(&self, header: NonNull<isize>, size: usize) {
        let (layout, _) = large_layout(size).unwrap_or_else(|| {
            panic!(
                "dealloc found size {size} in the header of a large allocation, which no allocation can have; the memory is corrupted"
            )
        });

        // SAFETY: The caller guarantees the allocation was made by `alloc_large()`, which
        // derived the same layout from the same size.
        unsafe {
            alloc::dealloc(header.as_ptr().cast(), layout);
        }

        self.live_large_allocations.fetch_sub(1, Ordering::Relaxed);
    }

    /// Takes a snapshot of the state of every size class.
    #[must_use]
    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats::new(
            self.pools.stats(),
            self.live_large_allocations.load(Ordering::Relaxed),
        )
    }
}

impl<L: RawMutexApi> fmt::Debug for BucketAllocator<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();

        f.debug_struct("BucketAllocator")
            .field("lock_type", &format_args!("{}", type_name::<L>()))
            .field("largest_size_class", &LARGEST_SIZE_CLASS)
            .field("blocks_in_use", &stats.blocks_in_use())
            .field("large_allocations", &stats.large_allocations())
            .finish_non_exhaustive()
    }
}

/// The layout of a large allocation of `size` bytes and the header value that records it.
fn large_layout(size: usize) -> Option<(Layout, isize)> {
    let header_value = isize::try_from(size).ok()?;
    let layout = Layout::from_size_align(HEADER_SIZE.checked_add(size)?, ALIGNMENT).ok()?;

    Some((layout, header_value))
}

#[cfg(test)]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(BucketAllocator: Send, Sync);
    assert_impl_all!(LocalBucketAllocator: Send);
    assert_not_impl_any!(LocalBucketAllocator: Sync);

    fn header_of(ptr: NonNull<u8>) -> isize {
        // SAFETY: Only used on pointers that came from an allocator and are not yet released.
        unsafe { ptr.byte_sub(HEADER_SIZE).cast::<isize>().read() }
    }

    fn in_use(allocator: &LocalBucketAllocator, class_size: usize) -> usize {
        allocator
            .stats()
            .size_class(class_size)
            .expect("class exists")
            .in_use()
    }

    fn local() -> LocalBucketAllocator {
        BucketAllocator::builder()
            .initial_count(2)
            .grow_count(2)
            .single_threaded()
            .build()
            .unwrap()
    }

    #[test]
    fn tiny_requests_route_to_smallest_class() {
        let allocator = local();

        let blocks = (1..=4).map(|size| allocator.alloc(size)).collect::<Vec<_>>();

        assert_eq!(in_use(&allocator, 4), 4);

        for block in blocks {
            assert_eq!(header_of(block.unwrap()), 4);

            // SAFETY: Released once, not used afterwards.
            unsafe { allocator.dealloc(block) };
        }

        assert_eq!(in_use(&allocator, 4), 0);
    }

    #[test]
    fn five_bytes_route_to_eight_byte_class() {
        let allocator = local();

        let block = allocator.alloc(5);

        assert_eq!(header_of(block.unwrap()), 8);
        assert_eq!(in_use(&allocator, 8), 1);
        assert_eq!(in_use(&allocator, 4), 0);

        // SAFETY: Released once, not used afterwards.
        unsafe { allocator.dealloc(block) };

        assert_eq!(in_use(&allocator, 8), 0);
    }

    #[test]
    fn largest_class_boundary() {
        let allocator = local();

        let pooled = allocator.alloc(512);
        let large = allocator.alloc(513);

        assert_eq!(header_of(pooled.unwrap()), 512);
        assert_eq!(in_use(&allocator, 512), 1);

        assert_eq!(header_of(large.unwrap()), 513);
        assert_eq!(allocator.stats().large_allocations(), 1);
        assert_eq!(allocator.stats().blocks_in_use(), 1);

        // SAFETY: Each released once, not used afterwards.
        unsafe {
            allocator.dealloc(pooled);
            allocator.dealloc(large);
        }

        assert_eq!(allocator.stats().large_allocations(), 0);
        assert_eq!(allocator.stats().blocks_in_use(), 0);
    }

    #[test]
    fn every_class_round_trips_through_header() {
        let allocator = local();

        for &class_size in SIZE_CLASSES {
            let size = isize::try_from(class_size).unwrap();
            let block = allocator.alloc(size).unwrap();

            assert_eq!(header_of(block), size);

            // SAFETY: The block is at least `class_size` bytes long and ours.
            unsafe { block.write_bytes(0xA5, class_size) };

            // The header survives the payload being filled.
            assert_eq!(header_of(block), size);

            // SAFETY: Released once, not used afterwards.
            unsafe { allocator.dealloc(Some(block)) };
        }

        assert_eq!(allocator.stats().blocks_in_use(), 0);
    }

    #[test]
    fn pointers_are_aligned() {
        let allocator = local();

        let blocks = [1, 3, 7, 24, 100, 511, 600, 10_000]
            .into_iter()
            .map(|size| allocator.alloc(size).unwrap())
            .collect::<Vec<_>>();

        for block in blocks {
            assert_eq!(block.addr().get() % ALIGNMENT, 0);

            // SAFETY: Released once, not used afterwards.
            unsafe { allocator.dealloc(Some(block)) };
        }
    }

    #[test]
    fn non_positive_sizes_return_none() {
        let allocator = local();

        assert!(allocator.alloc(0).is_none());
        assert!(allocator.alloc(-1).is_none());
        assert!(allocator.alloc(isize::MIN).is_none());

        assert_eq!(allocator.stats().blocks_in_use(), 0);
    }

    #[test]
    fn try_alloc_explains_failures() {
        let allocator = local();

        assert!(matches!(allocator.try_alloc(0), Err(Error::ZeroSize)));
        assert!(matches!(
            allocator.try_alloc(usize::MAX),
            Err(Error::SizeOverflow { size: usize::MAX })
        ));
    }

    #[test]
    fn exhausted_class_reports_class_and_cause() {
        // The second chunk of any class would be far larger than the address space.
        let allocator = BucketAllocator::builder()
            .initial_count(1)
            .grow_count(usize::MAX / 8)
            .single_threaded()
            .build()
            .unwrap();

        let first = allocator.try_alloc(30).unwrap();

        let error = allocator.try_alloc(30).unwrap_err();
        assert!(matches!(
            error,
            Error::ClassExhausted {
                size: 30,
                class_size: 32,
                source: slot_pool::Error::AllocationExhausted { .. },
            }
        ));

        let class = *allocator.stats().size_class(32).unwrap();
        assert_eq!(class.capacity(), 1);
        assert_eq!(class.chunk_count(), 1);
        assert_eq!(class.in_use(), 1);

        // Other classes are unaffected.
        let other = allocator.try_alloc(100).unwrap();

        // SAFETY: Both released once, not used afterwards.
        unsafe {
            allocator.dealloc(Some(first));
            allocator.dealloc(Some(other));
        }

        assert_eq!(allocator.stats().blocks_in_use(), 0);
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri treats an allocation this large as resource exhaustion.
    fn exhausted_heap_is_reported_for_large_requests() {
        let allocator = local();

        // Representable as a layout, but no heap can supply half the address space.
        let size = isize::MAX.unsigned_abs() / 2;

        assert!(matches!(
            allocator.try_alloc(size),
            Err(Error::HeapExhausted { size: reported }) if reported == size
        ));
        assert!(allocator.alloc(isize::MAX / 2).is_none());

        assert_eq!(allocator.stats().large_allocations(), 0);
    }

    #[test]
    fn dealloc_none_is_noop() {
        let allocator = local();

        // SAFETY: Nothing is released.
        unsafe { allocator.dealloc(None) };

        assert_eq!(allocator.stats().blocks_in_use(), 0);
    }

    #[test]
    fn class_grows_when_exhausted() {
        let allocator = local();

        let blocks = (0..5).map(|_| allocator.alloc(30)).collect::<Vec<_>>();

        let class = *allocator.stats().size_class(32).unwrap();
        assert_eq!(class.in_use(), 5);
        assert_eq!(class.capacity(), 6);
        assert_eq!(class.chunk_count(), 3);

        for block in blocks {
            // SAFETY: Released once, not used afterwards.
            unsafe { allocator.dealloc(block) };
        }
    }

    #[test]
    fn freed_blocks_are_reused() {
        let allocator = local();

        let first = allocator.alloc(100);
        let second = allocator.alloc(100);

        // SAFETY: Released once, not used afterwards.
        unsafe { allocator.dealloc(first) };

        // The class has no untouched blocks left, so the freed one comes back.
        assert_eq!(allocator.alloc(100), first);

        // SAFETY: Each released once, not used afterwards.
        unsafe {
            allocator.dealloc(first);
            allocator.dealloc(second);
        }
    }

    #[test]
    #[should_panic(expected = "negative size")]
    fn negative_header_panics() {
        let allocator = local();
        let block = allocator.alloc(16).unwrap();

        // SAFETY: Intentionally corrupting the header to test detection.
        unsafe { block.byte_sub(HEADER_SIZE).cast::<isize>().write(-5) };

        // SAFETY: The pointer came from this allocator, only its header is corrupted.
        unsafe { allocator.dealloc(Some(block)) };
    }

    #[test]
    #[should_panic(expected = "not on loan")]
    fn double_dealloc_panics() {
        let allocator = local();
        let block = allocator.alloc(40);

        // SAFETY: Intentionally violating the contract to test detection.
        unsafe {
            allocator.dealloc(block);
            allocator.dealloc(block);
        }
    }

    #[test]
    #[should_panic(expected = "does not belong to any chunk")]
    fn header_rewritten_to_other_class_panics() {
        let allocator = local();
        let block = allocator.alloc(16).unwrap();

        // SAFETY: Intentionally corrupting the header to test detection.
        unsafe { block.byte_sub(HEADER_SIZE).cast::<isize>().write(64) };

        // SAFETY: The pointer came from this allocator, only its header is corrupted.
        unsafe { allocator.dealloc(Some(block)) };
    }

    #[test]
    fn debug_output_summarizes_state() {
        let allocator = local();
        let block = allocator.alloc(8);

        let debug = format!("{allocator:?}");

        assert!(debug.contains("BucketAllocator"));
        assert!(debug.contains("NoLock"));
        assert!(debug.contains("blocks_in_use: 1"));

        // SAFETY: Released once, not used afterwards.
        unsafe { allocator.dealloc(block) };
    }

    #[test]
    fn large_layout_rejects_unrepresentable_sizes() {
        assert!(large_layout(513).is_some());
        assert!(large_layout(usize::MAX).is_none());
        assert!(large_layout(isize::MAX.unsigned_abs()).is_none());
    }
}
