//! Basic usage of the `slot_pool` crate:
//!
//! * Creating a pool.
//! * Acquiring slots for values.
//! * Accessing values through the returned pointers.
//! * Releasing slots and watching them get reused.

use slot_pool::SlotPool;

fn main() {
    let pool = SlotPool::<String>::with_counts(2, 1).unwrap();

    let mut alice = pool.acquire("Alice".to_string()).unwrap();
    let bob = pool.acquire("Bob".to_string()).unwrap();

    // The initial chunk is full now, so this grows the pool by a chunk of one slot.
    let charlie = pool.acquire("Charlie".to_string()).unwrap();

    println!(
        "Pool has {} slots on loan out of {} in {} chunks",
        pool.len(),
        pool.capacity(),
        pool.chunk_count()
    );

    // The pool hands out pointers, not references. The caller decides how to access them.
    // SAFETY: The pointer came from the pool, has not been released and nobody else
    // references the value.
    unsafe { alice.as_mut() }.push_str(" Smith");

    // SAFETY: The pointer came from the pool and has not been released.
    println!("Modified item: {}", unsafe { alice.as_ref() });

    // SAFETY: Released once, not used afterwards.
    unsafe { pool.release(bob) };

    // Bob's slot is at the front of the free list again, so Dave gets it.
    let dave = pool.acquire("Dave".to_string()).unwrap();
    println!("Dave reuses Bob's slot: {}", dave == bob);

    // SAFETY: Each released once, not used afterwards.
    unsafe {
        pool.release(alice);
        pool.release(charlie);
        pool.release(dave);
    }

    println!("Pool has {} slots on loan after cleanup", pool.len());
}
