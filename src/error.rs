use std::fmt;

/// Everything that can go wrong inside the allocator.
///
/// Callers only ever see these from the constructors. `alloc` reports
/// exhaustion as `None` and `free` swallows its errors after logging them,
/// but the internal helpers return them so nothing has to abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkError {
    /// A null pointer was handed to `free`.
    NullPointer,
    /// The address is inside the store but not on a chunk boundary.
    Misaligned { address: usize },
    /// The address lies outside `[base, base + HEAP_SIZE)`.
    OutOfBounds { address: usize },
    /// A chunk range does not fit in the allocatable part of the table.
    RangeOutOfBounds { start: usize, len: usize },
    /// Tried to reserve a chunk that is already allocated.
    ChunkInUse { index: usize },
    /// Tried to release an index that is not the head of a live allocation.
    NotAllocated { index: usize },
    /// The buffer given to [`crate::ChunkAllocator::with_region`] is too short.
    RegionTooSmall { needed: usize, given: usize },
    /// The platform refused to map the store.
    PlatformMemory { len: usize },
}

impl fmt::Display for ChunkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ChunkError::NullPointer => write!(f, "null pointer"),
            ChunkError::Misaligned { address } => {
                write!(f, "address {address:#x} is not aligned to a chunk boundary")
            }
            ChunkError::OutOfBounds { address } => {
                write!(f, "address {address:#x} is outside of the heap")
            }
            ChunkError::RangeOutOfBounds { start, len } => {
                write!(f, "chunk range {start}..{} is out of bounds", start + len)
            }
            ChunkError::ChunkInUse { index } => write!(f, "chunk {index} is already allocated"),
            ChunkError::NotAllocated { index } => {
                write!(f, "chunk {index} is not the head of an allocation")
            }
            ChunkError::RegionTooSmall { needed, given } => {
                write!(f, "region of {given} bytes cannot hold a heap of {needed} bytes")
            }
            ChunkError::PlatformMemory { len } => {
                write!(f, "platform failed to map {len} bytes")
            }
        }
    }
}

impl std::error::Error for ChunkError {}
