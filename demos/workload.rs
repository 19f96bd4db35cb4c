//! Randomized alloc/free driver. Every live block is filled with its own
//! index and checked after each step, and the heap must be clean at the end.

use std::ptr::NonNull;

use chunkalloc::DefaultAllocator;
use rand::{Rng, SeedableRng, rngs::StdRng};

const N: usize = 100;

fn check_data(blocks: &[Option<(NonNull<u8>, usize)>]) {
    for (i, block) in blocks.iter().enumerate() {
        let Some((ptr, size)) = *block else { continue };
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size) };
        assert!(bytes.iter().all(|&b| b == i as u8), "block {i} was corrupted");
    }
}

fn main() {
    let mut allocator = DefaultAllocator::new().expect("failed to map the heap");
    let mut rng = StdRng::seed_from_u64(std::process::id() as u64);
    let mut blocks: Vec<Option<(NonNull<u8>, usize)>> = vec![None; N];

    for i in 0..N {
        if rng.random_range(0..10) >= 5 {
            let size = rng.random_range(0..2 * 4096);
            match allocator.alloc(size) {
                Some(ptr) => {
                    println!("Allocated {size} bytes @ {ptr:?}.");
                    unsafe { ptr.as_ptr().write_bytes(i as u8, size) };
                    blocks[i] = Some((ptr, size));
                }
                None => println!("Failed to allocate {size} bytes."),
            }
        } else {
            for block in blocks.iter_mut() {
                if let Some((ptr, size)) = block.take() {
                    unsafe { ptr.as_ptr().write_bytes(0, size) };
                    println!("Freeing {ptr:?}.");
                    allocator.free(ptr.as_ptr());
                }
            }
        }
        check_data(&blocks);
    }

    for (ptr, _) in blocks.iter_mut().filter_map(Option::take) {
        println!("Freeing {ptr:?}.");
        allocator.free(ptr.as_ptr());
    }

    assert!(allocator.is_clean());
    println!("{:#?}", allocator.stats());
    println!("All done.");
}
