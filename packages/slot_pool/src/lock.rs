use std::cell::Cell;

use lock_api::{GuardSend, RawMutex as RawMutexApi};
#[doc(no_inline)]
pub use parking_lot::RawMutex;

/// A lock for pools that are only ever used from one thread at a time.
///
/// Taking the lock costs a single flag update and never blocks. The type is [`Send`] but not
/// [`Sync`], so a pool guarded by it can be moved to another thread but can never be shared
/// between threads, which is what makes skipping real mutual exclusion sound.
///
/// Attempting to take the lock while it is already held (i.e. re-entering the pool from
/// within one of its own critical sections) panics instead of deadlocking.
///
/// Use [`RawMutex`] instead when the pool must be shared between threads.
///
/// # Examples
///
/// ```
/// use slot_pool::{NoLock, SlotPool};
///
/// let pool = SlotPool::<u64, NoLock>::with_counts(8, 8).unwrap();
/// let item = pool.acquire(42).unwrap();
///
/// // SAFETY: The pointer came from this pool and is not used after release.
/// unsafe { pool.release(item) };
/// ```
#[derive(Debug)]
pub struct NoLock {
    locked: Cell<bool>,
}

// SAFETY: `NoLock` is not `Sync`, so all lock operations on an instance happen on one thread
// and never overlap. Re-entrant locking is rejected via the `locked` flag, which makes the
// lock exclusive within that thread.
unsafe impl RawMutexApi for NoLock {
    #[allow(
        clippy::declare_interior_mutable_const,
        reason = "required by the RawMutex trait, every user gets a fresh copy"
    )]
    const INIT: Self = Self {
        locked: Cell::new(false),
    };

    type GuardMarker = GuardSend;

    fn lock(&self) {
        assert!(
            !self.locked.replace(true),
            "NoLock was locked while already held; the pool was re-entered from its own critical section"
        );
    }

    fn try_lock(&self) -> bool {
        !self.locked.replace(true)
    }

    unsafe fn unlock(&self) {
        self.locked.set(false);
    }

    fn is_locked(&self) -> bool {
        self.locked.get()
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(NoLock: Send);
    assert_not_impl_any!(NoLock: Sync);
    assert_impl_all!(RawMutex: Send, Sync);

    #[test]
    fn lock_and_unlock() {
        let lock = NoLock::INIT;
        assert!(!lock.is_locked());

        lock.lock();
        assert!(lock.is_locked());
        assert!(!lock.try_lock());

        // SAFETY: We hold the lock.
        unsafe { lock.unlock() };
        assert!(!lock.is_locked());

        assert!(lock.try_lock());
        // SAFETY: We hold the lock.
        unsafe { lock.unlock() };
    }

    #[test]
    #[should_panic]
    fn reentrant_lock_panics() {
        let lock = NoLock::INIT;
        lock.lock();
        lock.lock();
    }
}
