use std::ptr::NonNull;

use chunkalloc::DefaultAllocator;

fn log_alloc(addr: Option<NonNull<u8>>, size: usize, allocator: &DefaultAllocator) {
    println!("Requested {size} bytes of memory");
    match addr {
        Some(addr) => println!(
            "Received this address: {addr:?} ({} bytes reserved)",
            allocator.allocation_size(addr.as_ptr()).unwrap_or(0)
        ),
        None => println!("Allocation failed"),
    }
}

fn main() {
    let mut allocator = DefaultAllocator::new().expect("failed to map the heap");
    println!("Heap of {} bytes at {:?}", DefaultAllocator::HEAP_SIZE, allocator.base());

    let addr1 = allocator.alloc(8);
    log_alloc(addr1, 8, &allocator);

    let addr2 = allocator.alloc(2048);
    log_alloc(addr2, 2048, &allocator);

    let addr3 = allocator.alloc(2049);
    log_alloc(addr3, 2049, &allocator);

    for addr in [addr1, addr2, addr3].into_iter().flatten() {
        allocator.free(addr.as_ptr());
    }

    // Ignored, with a warning through `log`.
    allocator.free(std::ptr::null_mut());

    let addr4 = allocator.alloc(8);
    println!("Reused first address? {}", addr4 == addr1);

    println!("{:#?}", allocator.stats());
}
