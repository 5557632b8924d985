use thiserror::Error;

/// Errors that can occur when building an allocator or allocating from it.
///
/// Releasing a pointer with a corrupted header or one that did not come from the allocator
/// is not represented here. That is a contract violation and panics instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Zero bytes were requested. Every allocation must cover at least one byte.
    #[error("cannot allocate zero bytes")]
    ZeroSize,

    /// The requested size plus the size header cannot be described as a memory layout.
    #[error("{size} bytes plus the size header do not fit in a single allocation")]
    SizeOverflow {
        /// The requested size in bytes.
        size: usize,
    },

    /// The pool of the size class serving the request needed to grow but could not.
    #[error("size class {class_size} could not supply a block for a {size} byte allocation")]
    ClassExhausted {
        /// The requested size in bytes.
        size: usize,

        /// The block size of the class the request was routed to.
        class_size: usize,

        /// The failure reported by the pool of the size class.
        #[source]
        source: slot_pool::Error,
    },

    /// The heap could not supply the memory for an allocation larger than every size class.
    #[error("the heap could not supply {size} bytes for a large allocation")]
    HeapExhausted {
        /// The requested size in bytes.
        size: usize,
    },

    /// The pools of the size classes could not be created.
    #[error(transparent)]
    Pool(#[from] slot_pool::Error),
}

/// A specialized `Result` type for allocator operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
