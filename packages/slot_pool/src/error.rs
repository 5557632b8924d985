use thiserror::Error;

/// Errors that can occur when creating a pool or acquiring a slot from it.
///
/// Contract violations on release (releasing a slot twice, releasing a pointer that did not
/// come from the pool) are not represented here. Those indicate memory corruption in the
/// caller and panic instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Both the initial slot count and the grow count were zero, so the pool could never
    /// hold anything.
    #[error("a pool needs a non-zero initial count or a non-zero grow count")]
    ZeroCapacity,

    /// The heap could not supply the memory for a new chunk of slots.
    ///
    /// The pool is left unchanged and the operation may be attempted again later.
    #[error("failed to allocate a chunk of {slot_count} slots of {item_type}")]
    AllocationExhausted {
        /// Number of slots the chunk was supposed to hold.
        slot_count: usize,

        /// Name of the item type stored in the pool.
        item_type: &'static str,
    },
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
