//! A size-class byte allocator built on [`slot_pool`].
//!
//! [`BucketAllocator`] offers a `malloc`/`free`-shaped interface: [`alloc()`][1] takes a size
//! in bytes and returns a pointer, [`dealloc()`][2] takes the pointer back without being told
//! the size again.
//!
//! Requests of up to 512 bytes are rounded up to one of eighteen [`SIZE_CLASSES`] and served
//! from a [`slot_pool::SlotPool`] dedicated to that class, which recycles blocks without going
//! back to the heap. Larger requests are passed through to the heap directly. A small header
//! in front of every allocation records which of the two paths it came from.
//!
//! # Examples
//!
//! ```rust
//! use bucket_alloc::{BucketAllocator, size_class_for};
//!
//! let allocator = BucketAllocator::new().unwrap();
//!
//! // A 20-byte request is served from the 24-byte size class.
//! assert_eq!(size_class_for(20), Some(24));
//! let small = allocator.alloc(20).unwrap();
//!
//! // Anything above 512 bytes comes straight from the heap.
//! assert_eq!(size_class_for(1000), None);
//! let large = allocator.alloc(1000).unwrap();
//!
//! // SAFETY: Both blocks are ours and at least as long as requested.
//! unsafe {
//!     small.write_bytes(1, 20);
//!     large.write_bytes(2, 1000);
//! }
//!
//! // SAFETY: Both pointers came from this allocator and are released once.
//! unsafe {
//!     allocator.dealloc(Some(small));
//!     allocator.dealloc(Some(large));
//! }
//! ```
//!
//! [1]: BucketAllocator::alloc
//! [2]: BucketAllocator::dealloc

mod allocator;
mod builder;
mod classes;
mod error;
mod stats;

pub use allocator::*;
pub use builder::*;
pub use classes::{ALIGNMENT, HEADER_SIZE, LARGEST_SIZE_CLASS, SIZE_CLASSES, size_class_for};
pub(crate) use classes::ClassPools;
pub use error::Error;
pub(crate) use error::Result;
pub use stats::*;
