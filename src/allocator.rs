use std::ptr::NonNull;

use crate::{
    chunk::{ChunkTable, Runs},
    error::ChunkError,
    freelist::FreeList,
    region::HeapStore,
    utils::chunks_for,
};

/// Snapshot of how the heap is partitioned, see [`ChunkAllocator::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Chunks belonging to free runs, the last chunk included.
    pub free_chunks: usize,
    /// Chunks handed out to callers.
    pub allocated_chunks: usize,
    /// Number of free runs in the heap.
    pub free_runs: usize,
    /// Number of free runs the allocator can still find.
    pub tracked_free_runs: usize,
    /// Number of live allocations.
    pub allocated_runs: usize,
}

/// Allocator over a fixed heap of `NUM_CHUNKS` chunks of `CHUNK_SIZE` bytes.
///
/// Requests are rounded up to whole chunks and served from contiguous runs
/// of free chunks. Free runs are found through a table of at most
/// `MAX_FREE_BLOCKS` heads, scanned in slot order (first-fit).
///
/// ```text
///                 FreeList (slot order)
///            +-----+-----+-----+-----+
///            |  4  |  0  |     | ... |
///            +--|--+--|--+-----+-----+
///               |     +-------------------+
///               v                         v
/// +------+------+------+------+------+ +------+------+
/// | free | free | used | used | free | | .... | last |
/// +------+------+------+------+------+ +------+------+
///  chunk 0                     chunk 4          ^
///                                               never handed out
/// ```
///
/// The last chunk of the heap is never handed out, so at most
/// `(NUM_CHUNKS - 1) * CHUNK_SIZE` bytes can be live at once.
///
/// Freed runs are not merged with their neighbours. The only merging is done
/// right after an allocation: the free chunks that follow the new allocation
/// are gathered under a single head, swallowing any free run that starts
/// inside them.
///
/// Not thread safe. Wrap it in a lock if it has to be shared.
pub struct ChunkAllocator<
    const CHUNK_SIZE: usize = { crate::CHUNK_SIZE },
    const NUM_CHUNKS: usize = { crate::NUM_CHUNKS },
    const MAX_FREE_BLOCKS: usize = { crate::MAX_FREE_BLOCKS },
> {
    heap: HeapStore<CHUNK_SIZE, NUM_CHUNKS>,
    chunks: ChunkTable<NUM_CHUNKS>,
    free_list: FreeList<MAX_FREE_BLOCKS>,
}

impl<const CHUNK_SIZE: usize, const NUM_CHUNKS: usize, const MAX_FREE_BLOCKS: usize>
    ChunkAllocator<CHUNK_SIZE, NUM_CHUNKS, MAX_FREE_BLOCKS>
{
    /// Size of the heap in bytes.
    pub const HEAP_SIZE: usize = CHUNK_SIZE * NUM_CHUNKS;

    const VALID_GEOMETRY: () = assert!(
        CHUNK_SIZE > 0 && NUM_CHUNKS >= 2 && MAX_FREE_BLOCKS > 0,
        "a chunk allocator needs a non-empty chunk, two chunks and one free list slot"
    );

    /// Creates an allocator whose heap is mapped from the platform.
    ///
    /// The heap is mapped once, here, and returned when the allocator is
    /// dropped.
    pub fn new() -> Result<Self, ChunkError> {
        Self::with_heap(HeapStore::map()?)
    }

    /// Creates an allocator whose heap lives in `region`.
    ///
    /// Only the first `HEAP_SIZE` bytes of `region` are used. Useful where
    /// there is nothing to map memory from, e.g. with a `static` buffer.
    pub fn with_region(region: &'static mut [u8]) -> Result<Self, ChunkError> {
        Self::with_heap(HeapStore::over(region)?)
    }

    fn with_heap(heap: HeapStore<CHUNK_SIZE, NUM_CHUNKS>) -> Result<Self, ChunkError> {
        let () = Self::VALID_GEOMETRY;

        let mut allocator = Self {
            heap,
            chunks: ChunkTable::new(),
            free_list: FreeList::new(),
        };
        allocator.init();

        Ok(allocator)
    }

    /// Resets the allocator: the heap is zeroed and becomes a single free
    /// run. Every pointer handed out before is invalidated.
    pub fn init(&mut self) {
        self.heap.zero();
        self.chunks.reset();
        self.free_list.clear();
        self.free_list.insert(0);
    }

    /// Reserves enough whole chunks for `size` bytes and returns the address
    /// of the first one.
    ///
    /// A zero-byte request takes one chunk. Returns `None` if no registered
    /// free run is large enough, which doesn't mean the heap is full: the
    /// free space may be split across runs or sit in runs the free list could
    /// not register.
    pub fn alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        let needed = chunks_for(size, CHUNK_SIZE);

        let Some(head) = self.find_chunks(needed) else {
            log::debug!("alloc({size}): no free run of {needed} chunks");
            return None;
        };

        if let Err(err) = self.chunks.reserve(head, needed) {
            log::error!("alloc({size}): free run at chunk {head} is corrupted: {err}");
            return None;
        }
        self.free_list.remove(head);

        let next = head + needed;
        if self.chunks.is_free(next) {
            self.track_free_run(next);
        }

        let addr = self.heap.address_of(head);
        log::trace!("alloc({size}) -> {:p} ({needed} chunks at {head})", addr);

        Some(addr)
    }

    /// Gives back an allocation made by [`ChunkAllocator::alloc`].
    ///
    /// Any value is accepted. Null pointers, addresses outside the heap or in
    /// the middle of a chunk and addresses that are not a live allocation are
    /// logged and ignored without touching the allocator.
    ///
    /// The freed run is not merged with free runs around it.
    pub fn free(&mut self, ptr: *mut u8) {
        if let Err(err) = self.try_free(ptr) {
            log::warn!("trying to free {:p}: {err}", ptr);
        }
    }

    fn try_free(&mut self, ptr: *mut u8) -> Result<(), ChunkError> {
        if ptr.is_null() {
            return Err(ChunkError::NullPointer);
        }

        let head = self.heap.index_of(ptr)?;
        let len = self.chunks.release(head)?;

        if !self.free_list.insert(head) {
            log::debug!("free list is full, run of {len} chunks at {head} is untracked");
        }
        log::trace!("free({:p}) -> {len} chunks at {head}", ptr);

        Ok(())
    }

    /// First registered free run with at least `needed` allocatable chunks.
    fn find_chunks(&self, needed: usize) -> Option<usize> {
        self.free_list.find(|head| {
            self.chunks
                .free_run_length(head)
                .is_some_and(|len| Self::allocatable(head, len) >= needed)
        })
    }

    /// Chunks of the free run `[head, head + len)` that may be handed out,
    /// which is all of them unless the run reaches the last chunk.
    #[inline]
    fn allocatable(head: usize, len: usize) -> usize {
        if head + len >= NUM_CHUNKS {
            len.saturating_sub(1)
        } else {
            len
        }
    }

    /// Gathers the free chunks starting at `head` under a single head and
    /// makes sure the free list knows about it.
    fn track_free_run(&mut self, head: usize) {
        let free_list = &mut self.free_list;
        let len = self.chunks.extend_free_run(head, |absorbed| {
            free_list.remove(absorbed);
        });

        if !free_list.contains(head) && !free_list.insert(head) {
            log::debug!("free list is full, run of {len} chunks at {head} is untracked");
        }
    }

    /// Bytes reserved for the allocation at `ptr`, always a whole number of
    /// chunks. `None` if `ptr` is not a live allocation.
    pub fn allocation_size(&self, ptr: *const u8) -> Option<usize> {
        let head = self.heap.index_of(ptr).ok()?;
        let len = self.chunks.allocated_run_length(head)?;

        Some(len * CHUNK_SIZE)
    }

    /// Whether `ptr` points inside the heap.
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.heap.contains(ptr)
    }

    /// Address of the first byte of the heap.
    pub fn base(&self) -> NonNull<u8> {
        self.heap.base()
    }

    /// Maximum number of bytes that can be live at once.
    pub const fn capacity(&self) -> usize {
        (NUM_CHUNKS - 1) * CHUNK_SIZE
    }

    /// Whether every chunk of the heap is free.
    pub fn is_clean(&self) -> bool {
        self.chunks.is_clean()
    }

    /// Runs of the heap in address order.
    pub fn runs(&self) -> Runs<'_, NUM_CHUNKS> {
        self.chunks.runs()
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            free_chunks: self.chunks.free_chunks(),
            tracked_free_runs: self.free_list.len(),
            ..HeapStats::default()
        };

        for run in self.runs() {
            if run.is_free {
                stats.free_runs += 1;
            } else {
                stats.allocated_chunks += run.len;
                stats.allocated_runs += 1;
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::{Rng, SeedableRng, rngs::StdRng};

    type Small = ChunkAllocator<2048, 4, 1024>;
    type Tiny = ChunkAllocator<64, 8, 8>;

    fn chunk_of<const C: usize, const N: usize, const M: usize>(
        allocator: &ChunkAllocator<C, N, M>,
        ptr: NonNull<u8>,
    ) -> usize {
        (ptr.as_ptr() as usize - allocator.base().as_ptr() as usize) / C
    }

    fn assert_partition<const C: usize, const N: usize, const M: usize>(
        allocator: &ChunkAllocator<C, N, M>,
    ) {
        let total: usize = allocator.runs().map(|run| run.len).sum();
        assert_eq!(total, N, "runs don't cover the heap: {:?}", allocator.runs().collect::<Vec<_>>());

        for head in allocator.free_list.iter() {
            assert!(
                allocator.chunks.free_run_length(head).is_some(),
                "free list points at chunk {head} which is not a free head"
            );
        }
    }

    #[test]
    fn init_is_a_single_free_run() {
        let allocator = Tiny::new().unwrap();

        assert!(allocator.is_clean());
        assert_eq!(allocator.free_list.iter().collect::<Vec<_>>(), vec![0]);
        assert_eq!(
            allocator.stats(),
            HeapStats {
                free_chunks: 8,
                allocated_chunks: 0,
                free_runs: 1,
                tracked_free_runs: 1,
                allocated_runs: 0,
            }
        );
        assert_eq!(allocator.capacity(), 7 * 64);
    }

    #[test]
    fn basic_alloc() {
        let mut allocator = ChunkAllocator::<2048, 16, 16>::new().unwrap();

        let ptr = allocator.alloc(std::mem::size_of::<u32>()).unwrap().cast::<u32>();
        unsafe {
            ptr.write(23);
            assert_eq!(23, ptr.read());
        }
    }

    #[test]
    fn zero_size_takes_one_chunk() {
        let mut allocator = Tiny::new().unwrap();

        let ptr = allocator.alloc(0).unwrap();

        assert_eq!(allocator.allocation_size(ptr.as_ptr()), Some(64));
        assert_eq!(allocator.stats().allocated_chunks, 1);
    }

    #[test]
    fn sizes_round_up_to_whole_chunks() {
        let mut allocator = Tiny::new().unwrap();

        let exact = allocator.alloc(64).unwrap();
        let over = allocator.alloc(65).unwrap();

        assert_eq!(allocator.allocation_size(exact.as_ptr()), Some(64));
        assert_eq!(allocator.allocation_size(over.as_ptr()), Some(128));
        assert_eq!(chunk_of(&allocator, over) - chunk_of(&allocator, exact), 1);
        assert_eq!(allocator.stats().allocated_chunks, 3);
        assert_partition(&allocator);
    }

    #[test]
    fn addresses_are_chunk_aligned_and_inside_the_heap() {
        let mut allocator = Tiny::new().unwrap();
        let base = allocator.base().as_ptr() as usize;

        for size in [1, 64, 100, 3] {
            let ptr = allocator.alloc(size).unwrap();
            let offset = ptr.as_ptr() as usize - base;
            assert_eq!(offset % 64, 0);
            assert!(offset < Tiny::HEAP_SIZE);
            assert!(allocator.contains(ptr.as_ptr()));
        }
    }

    #[test]
    fn exhaustion() {
        let mut allocator = Small::new().unwrap();

        assert!(allocator.alloc(2048).is_some());
        assert!(allocator.alloc(2048).is_some());
        assert!(allocator.alloc(2048).is_some());
        assert!(allocator.alloc(2048).is_none());

        assert_eq!(allocator.stats().allocated_chunks, 3);
        assert_partition(&allocator);
    }

    #[test]
    fn requests_larger_than_the_heap_fail() {
        let mut allocator = Tiny::new().unwrap();

        assert!(allocator.alloc(Tiny::HEAP_SIZE).is_none());
        assert!(allocator.alloc(usize::MAX).is_none());
        assert!(allocator.alloc(allocator.capacity()).is_some());
        assert!(allocator.alloc(1).is_none());
    }

    #[test]
    fn freed_block_is_reused() {
        let mut allocator = Small::new().unwrap();

        let first = allocator.alloc(100).unwrap();
        let _second = allocator.alloc(100).unwrap();
        let _third = allocator.alloc(100).unwrap();

        allocator.free(first.as_ptr());

        assert_eq!(allocator.alloc(100), Some(first));
    }

    #[test]
    fn invalid_free_is_harmless() {
        let mut allocator = Tiny::new().unwrap();
        let a = allocator.alloc(100).unwrap();
        let _b = allocator.alloc(10).unwrap();

        let chunks = allocator.chunks.clone();
        let free_list = allocator.free_list.clone();

        let outside = Box::into_raw(Box::new(0u8));
        unsafe {
            allocator.free(std::ptr::null_mut());
            allocator.free(a.as_ptr().add(1));
            // Second chunk of `a`.
            allocator.free(a.as_ptr().add(64));
            // Free run right after `b`.
            allocator.free(a.as_ptr().add(3 * 64));
            allocator.free(allocator.base().as_ptr().add(Tiny::HEAP_SIZE));
            allocator.free(outside);
            drop(Box::from_raw(outside));
        }

        assert_eq!(allocator.chunks, chunks);
        assert_eq!(allocator.free_list, free_list);
    }

    #[test]
    fn double_free_is_ignored() {
        let mut allocator = Tiny::new().unwrap();
        let a = allocator.alloc(1).unwrap();
        let _b = allocator.alloc(1).unwrap();

        allocator.free(a.as_ptr());
        let chunks = allocator.chunks.clone();
        let free_list = allocator.free_list.clone();

        allocator.free(a.as_ptr());

        assert_eq!(allocator.chunks, chunks);
        assert_eq!(allocator.free_list, free_list);
        assert_eq!(allocator.allocation_size(a.as_ptr()), None);
    }

    #[test]
    fn freed_runs_are_not_merged() {
        let mut allocator = Small::new().unwrap();
        let a = allocator.alloc(2048).unwrap();
        let b = allocator.alloc(2048).unwrap();
        let c = allocator.alloc(2048).unwrap();

        allocator.free(a.as_ptr());
        allocator.free(c.as_ptr());

        assert_eq!(allocator.stats().free_chunks, 3);
        assert!(allocator.alloc(2 * 2048).is_none());

        allocator.free(b.as_ptr());
        assert!(allocator.alloc(2 * 2048).is_none());
        assert!(allocator.is_clean());
        assert_partition(&allocator);
    }

    #[test]
    fn first_fit_follows_free_list_order() {
        let mut allocator = Tiny::new().unwrap();
        let _a = allocator.alloc(1).unwrap();
        let b = allocator.alloc(1).unwrap();
        let _c = allocator.alloc(1).unwrap();

        // The rest of the heap (chunk 3) was registered before `b` was freed.
        allocator.free(b.as_ptr());
        let d = allocator.alloc(1).unwrap();

        assert_eq!(chunk_of(&allocator, d), 3);
        assert_partition(&allocator);
    }

    #[test]
    fn allocation_gathers_following_free_runs() {
        let mut allocator = Tiny::new().unwrap();
        let x = allocator.alloc(3 * 64).unwrap();
        let y = allocator.alloc(64).unwrap();
        let _z = allocator.alloc(3 * 64).unwrap();

        // Chunk 7 is the only run left in slot 0.
        assert_eq!(allocator.free_list.iter().collect::<Vec<_>>(), vec![7]);

        allocator.free(x.as_ptr());
        allocator.free(y.as_ptr());
        assert_eq!(allocator.free_list.iter().collect::<Vec<_>>(), vec![7, 0, 3]);

        // Splitting x's run leaves chunk 2 free, right before y's old run.
        let w = allocator.alloc(2 * 64).unwrap();
        assert_eq!(chunk_of(&allocator, w), 0);
        assert_eq!(allocator.chunks.free_run_length(2), Some(2));
        assert!(!allocator.free_list.contains(3));
        assert_partition(&allocator);

        let v = allocator.alloc(2 * 64).unwrap();
        assert_eq!(chunk_of(&allocator, v), 2);
        assert_partition(&allocator);
    }

    #[test]
    fn exact_fit_registers_the_following_free_run() {
        let mut allocator = Tiny::new().unwrap();
        let a = allocator.alloc(2 * 64).unwrap();
        let b = allocator.alloc(64).unwrap();
        let d = allocator.alloc(4 * 64).unwrap();

        allocator.free(a.as_ptr());
        allocator.free(b.as_ptr());
        allocator.free(d.as_ptr());

        // Free list: [7 (len 1), 0 (len 2), 2 (len 1), 3 (len 4)]. Every
        // chunk is free but no single run has room for 5.
        assert!(allocator.is_clean());
        assert!(allocator.alloc(5 * 64).is_none());

        // Exact fit on chunk 0. The run at 2 is already registered and stays
        // where it is, but now covers everything up to the end of the heap.
        let c = allocator.alloc(2 * 64).unwrap();
        assert_eq!(chunk_of(&allocator, c), 0);
        assert_eq!(allocator.chunks.free_run_length(2), Some(6));
        assert_eq!(allocator.free_list.iter().collect::<Vec<_>>(), vec![2]);
        assert_partition(&allocator);

        assert_eq!(allocator.alloc(5 * 64).map(|ptr| chunk_of(&allocator, ptr)), Some(2));
    }

    #[test]
    fn full_free_list_leaves_runs_untracked() {
        let mut allocator = ChunkAllocator::<64, 8, 2>::new().unwrap();
        let a = allocator.alloc(1).unwrap();
        let _b = allocator.alloc(1).unwrap();
        let c = allocator.alloc(1).unwrap();
        let _d = allocator.alloc(1).unwrap();

        allocator.free(a.as_ptr());
        allocator.free(c.as_ptr());

        let stats = allocator.stats();
        assert_eq!(stats.free_runs, 3);
        assert_eq!(stats.tracked_free_runs, 2);
        assert_partition(&allocator);

        let mut handed_out = Vec::new();
        while let Some(ptr) = allocator.alloc(1) {
            handed_out.push(ptr);
        }

        // Chunks 4, 5, 6 and then `a`'s chunk. `c`'s chunk is never found.
        assert_eq!(handed_out.len(), 4);
        assert!(!handed_out.contains(&c));
        assert!(allocator.chunks.free_run_length(2).is_some());
    }

    #[test]
    fn init_resets_state_and_contents() {
        let mut allocator = Tiny::new().unwrap();
        let ptr = allocator.alloc(100).unwrap();
        unsafe { ptr.as_ptr().write_bytes(0xCD, 100) };

        allocator.init();

        assert!(allocator.is_clean());
        assert_eq!(allocator.free_list.iter().collect::<Vec<_>>(), vec![0]);
        unsafe { assert_eq!(*ptr.as_ptr().add(99), 0) };

        allocator.init();
        assert_eq!(allocator.alloc(1), Some(allocator.base()));
    }

    #[test]
    fn static_region_backing() {
        let region: &'static mut [u8] = Box::leak(vec![0xAAu8; 8 * 64 + 13].into_boxed_slice());
        let start = region.as_ptr();

        let mut allocator = Tiny::with_region(region).unwrap();

        assert_eq!(allocator.base().as_ptr() as *const u8, start);
        let ptr = allocator.alloc(10).unwrap();
        unsafe { assert_eq!(*ptr.as_ptr(), 0) };
    }

    #[test]
    fn allocate_then_free_everything_is_clean() {
        let mut allocator = ChunkAllocator::<2048, 64, 64>::new().unwrap();
        let mut rng = StdRng::seed_from_u64(0x5eed);

        let mut blocks = Vec::new();
        for _ in 0..10 {
            let size = rng.random_range(0..2 * 4096);
            if let Some(ptr) = allocator.alloc(size) {
                unsafe { ptr.as_ptr().write_bytes(blocks.len() as u8, size) };
                blocks.push(ptr);
            }
        }
        assert_eq!(blocks.len(), 10);

        while !blocks.is_empty() {
            let index = rng.random_range(0..blocks.len());
            allocator.free(blocks.swap_remove(index).as_ptr());
        }

        assert!(allocator.is_clean());
        assert_eq!(allocator.stats().free_chunks, 64);
        assert_partition(&allocator);
    }

    /// Interleaves allocations and bulk frees, checking after every step that
    /// live blocks keep their contents and never overlap.
    #[test]
    fn randomized_alloc_free_simulation() {
        const N: usize = 100;

        let mut allocator = ChunkAllocator::<2048, 256, 32>::new().unwrap();
        let mut rng = StdRng::seed_from_u64(0x42);
        let mut live: Vec<Option<(NonNull<u8>, usize)>> = vec![None; N];

        fn check(live: &[Option<(NonNull<u8>, usize)>]) {
            let mut ranges = Vec::new();
            for (i, (ptr, size)) in live.iter().enumerate().filter_map(|(i, b)| Some((i, (*b)?))) {
                let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size) };
                assert!(bytes.iter().all(|&byte| byte == i as u8), "block {i} was overwritten");
                let start = ptr.as_ptr() as usize;
                ranges.push(start..start + size.max(1));
            }

            ranges.sort_by_key(|range| range.start);
            for pair in ranges.windows(2) {
                assert!(pair[0].end <= pair[1].start, "{:?} overlaps {:?}", pair[0], pair[1]);
            }
        }

        for i in 0..N {
            if rng.random_range(0..10) >= 5 {
                let size = rng.random_range(0..2 * 4096);
                if let Some(ptr) = allocator.alloc(size) {
                    unsafe { ptr.as_ptr().write_bytes(i as u8, size) };
                    live[i] = Some((ptr, size));
                }
            } else {
                for block in live.iter_mut() {
                    if let Some((ptr, size)) = block.take() {
                        unsafe { ptr.as_ptr().write_bytes(0, size) };
                        allocator.free(ptr.as_ptr());
                    }
                }
            }

            check(&live);
            assert_partition(&allocator);
        }

        for block in live.iter_mut() {
            if let Some((ptr, _)) = block.take() {
                allocator.free(ptr.as_ptr());
            }
        }

        let stats = allocator.stats();
        assert!(allocator.is_clean());
        assert_eq!(stats.allocated_chunks, 0);
        assert_eq!(stats.free_chunks, 256);
    }
}
