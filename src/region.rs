use std::ptr::NonNull;

use crate::{error::ChunkError, kernel, utils::align};

/// Where the bytes of a [`HeapStore`] come from.
enum Backing {
    /// Mapped from the platform, `len` bytes (page rounded) to hand back on drop.
    Platform { len: usize },
    /// A buffer owned by the caller for the rest of the program.
    Static,
}

/// The single contiguous byte region every address comes from.
///
/// The store is `CHUNK_SIZE * NUM_CHUNKS` bytes and never grows. Chunk `i`
/// starts at `base + i * CHUNK_SIZE`:
///
/// ```text
/// base
///  |
///  v
///  +----------+----------+----------+-----+----------+
///  | chunk 0  | chunk 1  | chunk 2  | ... | chunk N-1|
///  +----------+----------+----------+-----+----------+
///  <---------->
///   CHUNK_SIZE
/// ```
pub(crate) struct HeapStore<const CHUNK_SIZE: usize, const NUM_CHUNKS: usize> {
    base: NonNull<u8>,
    backing: Backing,
}

impl<const CHUNK_SIZE: usize, const NUM_CHUNKS: usize> HeapStore<CHUNK_SIZE, NUM_CHUNKS> {
    pub(crate) const HEAP_SIZE: usize = CHUNK_SIZE * NUM_CHUNKS;

    /// Maps a fresh store from the platform.
    pub(crate) fn map() -> Result<Self, ChunkError> {
        let len = align(Self::HEAP_SIZE, kernel::page_size());

        let base = unsafe { kernel::request_memory(len) }
            .ok_or(ChunkError::PlatformMemory { len })?;

        log::debug!("mapped {len} bytes of heap at {:p}", base);

        Ok(Self {
            base,
            backing: Backing::Platform { len },
        })
    }

    /// Lays the store over the front of `region`.
    pub(crate) fn over(region: &'static mut [u8]) -> Result<Self, ChunkError> {
        if region.len() < Self::HEAP_SIZE {
            return Err(ChunkError::RegionTooSmall {
                needed: Self::HEAP_SIZE,
                given: region.len(),
            });
        }

        // A `&mut [u8]` is never null.
        let base = NonNull::from(region).cast::<u8>();

        Ok(Self {
            base,
            backing: Backing::Static,
        })
    }

    #[inline]
    pub(crate) fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Fills the whole store with zeroes.
    pub(crate) fn zero(&mut self) {
        unsafe { self.base.as_ptr().write_bytes(0, Self::HEAP_SIZE) }
    }

    /// Address of the first byte of chunk `index`.
    #[inline]
    pub(crate) fn address_of(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < NUM_CHUNKS);
        // `index < NUM_CHUNKS` keeps the offset inside the store.
        unsafe { self.base.add(index * CHUNK_SIZE) }
    }

    /// Maps an address back to the chunk that starts there.
    ///
    /// Fails for addresses outside the store and for addresses that fall in
    /// the middle of a chunk.
    pub(crate) fn index_of(&self, ptr: *const u8) -> Result<usize, ChunkError> {
        let address = ptr as usize;
        let base = self.base.as_ptr() as usize;

        if !self.contains(ptr) {
            return Err(ChunkError::OutOfBounds { address });
        }

        let offset = address - base;
        if offset % CHUNK_SIZE != 0 {
            return Err(ChunkError::Misaligned { address });
        }

        Ok(offset / CHUNK_SIZE)
    }

    /// Whether `ptr` points inside `[base, base + HEAP_SIZE)`.
    #[inline]
    pub(crate) fn contains(&self, ptr: *const u8) -> bool {
        let address = ptr as usize;
        let base = self.base.as_ptr() as usize;

        address >= base && address - base < Self::HEAP_SIZE
    }
}

impl<const CHUNK_SIZE: usize, const NUM_CHUNKS: usize> Drop for HeapStore<CHUNK_SIZE, NUM_CHUNKS> {
    fn drop(&mut self) {
        if let Backing::Platform { len } = self.backing {
            unsafe { kernel::return_memory(self.base.as_ptr(), len) }
        }
    }
}
