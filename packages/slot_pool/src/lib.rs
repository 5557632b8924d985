//! A growable pool of fixed-size slots with O(1) acquire and release.
//!
//! This crate provides [`SlotPool`], which hands out raw pointers to slots of storage for values
//! of one type `T` and takes them back later. It is meant as a building block for allocators and
//! other low-level code that needs many short-lived objects of the same size without going
//! through the general-purpose heap for each one.
//!
//! # Key Features
//!
//! - **Chunked growth**: Storage is allocated in chunks of `initial_count` and later
//!   `grow_count` slots. Chunks never move or shrink, so slot addresses are stable.
//! - **Intrusive free list**: Free slots are linked through their own bookkeeping fields, so
//!   acquire and release do not allocate.
//! - **FIFO reuse**: The slot released longest ago is handed out next.
//! - **Checked release**: Releasing a pointer the pool does not own, or a slot that is already
//!   free, panics instead of corrupting the pool.
//! - **Pluggable locking**: The lock type is a [`lock_api::RawMutex`]. Use [`NoLock`] for pools
//!   confined to one thread at a time and [`RawMutex`] (via [`SyncSlotPool`]) for pools shared
//!   between threads.
//! - **Flexible drop policies**: Choose whether dropping a pool with slots still on loan is
//!   acceptable or a bug.
//!
//! The pool never creates references to stored values. The caller decides how to access them
//! and is responsible for upholding the aliasing rules.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use std::thread;
//!
//! use slot_pool::SyncSlotPool;
//!
//! let pool = Arc::new(SyncSlotPool::<u64>::with_counts(64, 16).unwrap());
//!
//! let workers = (0..4)
//!     .map(|worker| {
//!         let pool = Arc::clone(&pool);
//!
//!         thread::spawn(move || {
//!             let item = pool.acquire(worker).unwrap();
//!
//!             // SAFETY: The pointer came from the pool and has not been released.
//!             assert_eq!(unsafe { *item.as_ref() }, worker);
//!
//!             // SAFETY: The pointer came from the pool, is released once and not used again.
//!             unsafe { pool.release(item) };
//!         })
//!     })
//!     .collect::<Vec<_>>();
//!
//! for worker in workers {
//!     worker.join().unwrap();
//! }
//!
//! assert!(pool.is_empty());
//! ```

mod builder;
mod chunk;
mod drop_policy;
mod error;
mod free_list;
mod lock;
mod pool;

pub use builder::*;
pub(crate) use chunk::*;
pub use drop_policy::*;
pub use error::Error;
pub(crate) use error::Result;
pub(crate) use free_list::*;
pub use lock::*;
pub use pool::*;
