#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for tests, benchmarks and examples of the pool and allocator packages.

use std::env;
use std::panic;
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::Duration;

/// Runs a test with a timeout to prevent infinite hangs.
///
/// If the test takes longer than the timeout to complete, this panics instead of letting
/// CI hang on a deadlocked pool. The timeout is 10 seconds under normal conditions and
/// 60 seconds under Miri, where thread synchronization is significantly slower.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog is disabled
/// and the test function is executed directly, so that mutation testing can detect mutations
/// that cause hangs.
///
/// # Panics
///
/// Panics if the test exceeds the timeout (when not in mutation testing mode) or if the test
/// itself panics.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// with_watchdog(|| {
///     assert_eq!(2 + 2, 4);
/// });
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // If this fails, the receiver has already timed out.
        drop(tx.send(result));
    });

    let timeout = if cfg!(miri) {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(10)
    };

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_handle.join().expect("test thread should not panic");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("test exceeded {} second timeout", timeout.as_secs());
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_handle.join() {
            Ok(()) => panic!("test thread disconnected unexpectedly"),
            Err(e) => panic::resume_unwind(e),
        },
    }
}

/// Runs `f` on `thread_count` threads at once and collects the results in thread order.
///
/// Each invocation receives the index of its thread. All threads wait on a barrier before
/// calling `f`, so that the calls overlap as much as the scheduler allows. This is what
/// concurrency tests want: maximum contention on whatever `f` touches.
///
/// # Panics
///
/// Panics if any of the threads panics. The panic of the first such thread (in thread order)
/// is propagated.
///
/// # Example
///
/// ```rust
/// use testing::run_on_threads;
///
/// let squares = run_on_threads(4, |index| index * index);
/// assert_eq!(squares, vec![0, 1, 4, 9]);
/// ```
pub fn run_on_threads<F, R>(thread_count: usize, f: F) -> Vec<R>
where
    F: Fn(usize) -> R + Send + Sync + 'static,
    R: Send + 'static,
{
    let f = Arc::new(f);
    let start = Arc::new(Barrier::new(thread_count));

    let handles = (0..thread_count)
        .map(|index| {
            let f = Arc::clone(&f);
            let start = Arc::clone(&start);

            thread::spawn(move || {
                start.wait();
                f(index)
            })
        })
        .collect::<Vec<_>>();

    handles
        .into_iter()
        .map(|handle| match handle.join() {
            Ok(result) => result,
            Err(e) => panic::resume_unwind(e),
        })
        .collect()
}
