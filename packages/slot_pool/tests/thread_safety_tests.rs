//! Thread safety integration tests for `slot_pool`.
//!
//! These tests hammer a shared pool from many threads and verify that no slot is ever on loan
//! to two callers at the same time and that the pool ends up consistent.

use std::collections::HashSet;
use std::hint::black_box;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use slot_pool::{SlotPool, SyncSlotPool};
use testing::{run_on_threads, with_watchdog};

const THREAD_COUNT: usize = 8;
const CYCLES_PER_THREAD: usize = 2_000;
const ITEMS_PER_CYCLE: usize = 3;

#[test]
#[cfg_attr(miri, ignore)] // Too many iterations for Miri to finish in reasonable time.
fn concurrent_acquire_release_never_shares_a_slot() {
    with_watchdog(|| {
        let pool = Arc::new(SyncSlotPool::<[usize; 4]>::with_counts(8, 4).unwrap());
        let on_loan = Arc::new(Mutex::new(HashSet::new()));

        run_on_threads(THREAD_COUNT, {
            let pool = Arc::clone(&pool);
            let on_loan = Arc::clone(&on_loan);

            move |thread_index| {
                for cycle in 0..CYCLES_PER_THREAD {
                    let marker = [thread_index, cycle, thread_index, cycle];

                    let items = (0..ITEMS_PER_CYCLE)
                        .map(|_| {
                            let item = pool.acquire(marker).unwrap();

                            let newly_loaned = on_loan.lock().unwrap().insert(item.addr().get());
                            assert!(newly_loaned, "slot {item:p} handed out twice");

                            item
                        })
                        .collect::<Vec<_>>();

                    for item in items {
                        // SAFETY: The pointer came from the pool and has not been released.
                        let stored = unsafe { *item.as_ref() };
                        assert_eq!(stored, marker, "another thread wrote into our slot");

                        on_loan.lock().unwrap().remove(&item.addr().get());

                        // SAFETY: Released once, not used afterwards.
                        unsafe { pool.release(item) };
                    }
                }
            }
        });

        assert!(pool.is_empty());
        assert!(on_loan.lock().unwrap().is_empty());
        assert_eq!(pool.available(), pool.capacity());

        // Growth happened in whole chunks of the configured size.
        assert_eq!((pool.capacity() - 8) % 4, 0);
    });
}

#[test]
#[cfg_attr(miri, ignore)] // Too many iterations for Miri to finish in reasonable time.
fn concurrent_growth_keeps_every_slot_accounted_for() {
    with_watchdog(|| {
        // Tiny chunks so that nearly every acquire grows the pool while others validate.
        let pool = Arc::new(SyncSlotPool::<u64>::with_counts(1, 1).unwrap());

        let loaned_per_thread = run_on_threads(THREAD_COUNT, {
            let pool = Arc::clone(&pool);

            move |thread_index| {
                let items = (0..100)
                    .map(|i| {
                        let value = u64::try_from(thread_index * 1000 + i).unwrap();
                        pool.acquire(value).unwrap()
                    })
                    .collect::<Vec<_>>();

                let count = items.len();

                for item in items {
                    assert!(pool.contains(item));

                    // SAFETY: Released once, not used afterwards.
                    unsafe { pool.release(item) };
                }

                count
            }
        });

        let total: usize = loaned_per_thread.iter().sum();
        assert_eq!(total, THREAD_COUNT * 100);

        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), pool.chunk_count());
        assert!(pool.capacity() >= 100);
    });
}

#[test]
#[cfg_attr(miri, ignore)] // Spawns threads, slow under Miri.
fn droppable_values_are_dropped_exactly_once_under_contention() {
    with_watchdog(|| {
        let pool = Arc::new(SyncSlotPool::<Arc<()>>::with_counts(4, 4).unwrap());
        let token = Arc::new(());

        run_on_threads(THREAD_COUNT, {
            let pool = Arc::clone(&pool);
            let token = Arc::clone(&token);

            move |_| {
                for _ in 0..500 {
                    let item = pool.acquire(Arc::clone(&token)).unwrap();
                    black_box(item);

                    // SAFETY: Released once, not used afterwards.
                    unsafe { pool.release(item) };
                }
            }
        });

        // Only the copy captured by the closure remains apart from ours, and run_on_threads
        // has dropped that closure by now.
        assert_eq!(Arc::strong_count(&token), 1);
        assert!(pool.is_empty());
    });
}

/// Takes its time being dropped, so a second release can arrive while the first is underway.
struct SlowDrop {
    drops: Arc<AtomicUsize>,
}

impl Drop for SlowDrop {
    fn drop(&mut self) {
        thread::sleep(Duration::from_millis(50));
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
#[cfg_attr(miri, ignore)] // Spawns threads and sleeps, slow under Miri.
fn concurrent_double_release_is_rejected_once() {
    with_watchdog(|| {
        let pool = Arc::new(SyncSlotPool::<SlowDrop>::with_counts(4, 4).unwrap());
        let drops = Arc::new(AtomicUsize::new(0));

        let item = pool
            .acquire(SlowDrop {
                drops: Arc::clone(&drops),
            })
            .unwrap();

        // Pointers are not Send, so the address crosses the thread boundary instead.
        let address = item.as_ptr().expose_provenance();

        let mut accepted = run_on_threads(2, {
            let pool = Arc::clone(&pool);

            move |_| {
                let item = NonNull::new(ptr::with_exposed_provenance_mut::<SlowDrop>(address))
                    .unwrap();

                catch_unwind(AssertUnwindSafe(|| {
                    // SAFETY: Both threads release the same pointer on purpose. The pool must
                    // reject one of them before touching the value.
                    unsafe { pool.release(item) };
                }))
                .is_ok()
            }
        });

        accepted.sort_unstable();
        assert_eq!(accepted, [false, true]);

        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(pool.is_empty());
        assert_eq!(pool.available(), pool.capacity());
        assert_eq!(pool.capacity(), 4);
    });
}

#[test]
fn single_threaded_pool_can_move_between_threads() {
    let pool = SlotPool::<String>::with_counts(2, 2).unwrap();

    let item = pool.acquire("moved".to_string()).unwrap();

    let pool = thread::spawn(move || {
        let again = pool.acquire("on another thread".to_string()).unwrap();

        // SAFETY: Released once, not used afterwards.
        unsafe { pool.release(again) };

        pool
    })
    .join()
    .unwrap();

    // The slot we kept is still on loan and its value is intact.
    assert_eq!(pool.len(), 1);
    assert!(pool.contains(item));

    // SAFETY: The pointer came from the pool and has not been released.
    assert_eq!(unsafe { item.as_ref() }, "moved");

    // SAFETY: Released once, not used afterwards.
    unsafe { pool.release(item) };

    assert!(pool.is_empty());
}
