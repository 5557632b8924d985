use std::mem::MaybeUninit;
use std::ptr::NonNull;

use lock_api::RawMutex as RawMutexApi;
use paste::paste;
use slot_pool::SlotPool;

use crate::SizeClassStats;

/// Size of the header that precedes every allocation handed out by the allocator.
///
/// The header holds the block size of the size class for pooled allocations and the exact
/// requested size for large allocations.
pub const HEADER_SIZE: usize = size_of::<isize>();

/// Alignment of every pointer handed out by the allocator.
pub const ALIGNMENT: usize = align_of::<isize>();

/// Request sizes are rounded up to a multiple of this before a size class is selected.
const GRANULARITY: usize = 4;

/// One pooled allocation: the size header followed by `N` bytes of caller-owned payload.
///
/// The payload directly follows the header because the header is `isize`-aligned and sized.
#[repr(C)]
#[allow(
    dead_code,
    reason = "blocks are never constructed as values, only accessed through raw pointers"
)]
pub(crate) struct Block<const N: usize> {
    size: isize,
    payload: [MaybeUninit<u8>; N],
}

// Generates the size class table and a struct with one pool per class, plus the dispatch
// from a class size to the matching pool. The sizes must be listed in ascending order.
macro_rules! size_classes {
    ($($size:literal),+ $(,)?) => {
        /// Block sizes of the size classes, in ascending order.
        ///
        /// A request is served by the first class whose block size is at least the request
        /// size rounded up to a multiple of 4. Requests larger than the last class go directly
        /// to the heap.
        pub const SIZE_CLASSES: &[usize] = &[$($size),+];

        paste! {
            pub(crate) struct ClassPools<L: RawMutexApi> {
                $([<class_ $size>]: SlotPool<Block<$size>, L>,)+
            }

            impl<L: RawMutexApi> ClassPools<L> {
                pub(crate) fn new(
                    initial_count: usize,
                    grow_count: usize,
                ) -> Result<Self, slot_pool::Error> {
                    Ok(Self {
                        $([<class_ $size>]: SlotPool::with_counts(initial_count, grow_count)?,)+
                    })
                }

                /// Takes a block from the pool of `class_size` and returns a pointer to its
                /// header. The header itself is left for the caller to write.
                pub(crate) fn acquire(
                    &self,
                    class_size: usize,
                ) -> Result<NonNull<isize>, slot_pool::Error> {
                    match class_size {
                        $($size => self.[<class_ $size>].acquire_uninit().map(NonNull::cast),)+
                        _ => unreachable!("{class_size} is not the block size of any size class"),
                    }
                }

                /// Returns the block whose header is at `header` to the pool of `class_size`.
                ///
                /// # Safety
                ///
                /// The block must not be used after this call. The pool validates ownership,
                /// so a block of a different class or a foreign pointer causes a panic.
                pub(crate) unsafe fn release(&self, class_size: usize, header: NonNull<isize>) {
                    match class_size {
                        $($size => {
                            // SAFETY: Forwarding guarantees from caller.
                            unsafe { self.[<class_ $size>].release_uninit(header.cast()) };
                        })+
                        _ => unreachable!("{class_size} is not the block size of any size class"),
                    }
                }

                pub(crate) fn stats(&self) -> Vec<SizeClassStats> {
                    vec![$(SizeClassStats::of($size, &self.[<class_ $size>]),)+]
                }
            }
        }
    };
}

size_classes!(
    4, 8, 16, 24, 32, 48, 64, 80, 96, 112, 128, 144, 160, 196, 212, 228, 256, 512
);

/// Block size of the largest size class. Requests above this go directly to the heap.
pub const LARGEST_SIZE_CLASS: usize = match SIZE_CLASSES.last() {
    Some(size) => *size,
    None => panic!("there must be at least one size class"),
};

/// Returns the block size of the size class that serves a request of `size` bytes, or `None`
/// if the request is larger than every class and is served directly from the heap.
///
/// # Examples
///
/// ```
/// use bucket_alloc::size_class_for;
///
/// assert_eq!(size_class_for(1), Some(4));
/// assert_eq!(size_class_for(5), Some(8));
/// assert_eq!(size_class_for(200), Some(212));
/// assert_eq!(size_class_for(512), Some(512));
/// assert_eq!(size_class_for(513), None);
/// ```
#[must_use]
pub fn size_class_for(size: usize) -> Option<usize> {
    let rounded = size.checked_next_multiple_of(GRANULARITY)?;

    SIZE_CLASSES
        .get(SIZE_CLASSES.partition_point(|&class_size| class_size < rounded))
        .copied()
}
