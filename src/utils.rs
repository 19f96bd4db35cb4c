//! Helper functions that don't particularly belong to any single component of
//! the allocator.

/// It aligns `to_be_aligned` using `aligment`, which must be a power of two.
///
/// Used to round the heap size up to a multiple of
/// [`crate::kernel::page_size`] before asking the platform for memory.
pub fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Number of `chunk_size` chunks needed to hold `size` bytes.
///
/// Always rounds up, so exactly `chunk_size` bytes is one chunk and one byte
/// more is two. A zero-byte request still takes one chunk.
pub fn chunks_for(size: usize, chunk_size: usize) -> usize {
    size.max(1).div_ceil(chunk_size)
}
