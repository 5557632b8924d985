//! Basic usage of the `bucket_alloc` crate:
//!
//! * Creating an allocator.
//! * Allocating blocks of various sizes.
//! * Inspecting which size classes are in use.
//! * Releasing blocks without remembering their sizes.

use bucket_alloc::{BucketAllocator, size_class_for};

fn main() {
    let allocator = BucketAllocator::new().unwrap();

    let sizes = [3, 20, 150, 500, 2000];

    let blocks = sizes
        .iter()
        .map(|&size| {
            match size_class_for(size) {
                Some(class_size) => {
                    println!("{size} bytes are served by the {class_size}-byte class");
                }
                None => println!("{size} bytes are served directly by the heap"),
            }

            allocator.try_alloc(size).unwrap()
        })
        .collect::<Vec<_>>();

    let stats = allocator.stats();

    for class in stats.size_classes().iter().filter(|class| class.in_use() > 0) {
        println!(
            "Class {:>3}: {} in use, {} available",
            class.class_size(),
            class.in_use(),
            class.available()
        );
    }

    println!("Large allocations: {}", stats.large_allocations());

    for block in blocks {
        // SAFETY: Every block came from this allocator and is released once.
        unsafe { allocator.dealloc(Some(block)) };
    }

    println!("Blocks in use after cleanup: {}", allocator.stats().blocks_in_use());
}
