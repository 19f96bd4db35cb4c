//! # chunkalloc - A fixed heap chunk allocator
//!
//! This crate partitions one fixed-size byte region (the heap) into
//! equal-size chunks and serves variable-size requests by reserving
//! contiguous runs of chunks. It is meant to stand in for a general-purpose
//! heap where no underlying allocator exists: the heap is either mapped once
//! from the platform or laid over a caller-provided `static` buffer, and it
//! never grows.
//!
//! ```text
//!   Heap (CHUNK_SIZE * NUM_CHUNKS bytes):
//!
//!   +------+------+------+------+------+------+------+------+
//!   |  A   |  A   |  B   | free | free |  C   | free | last |
//!   +------+------+------+------+------+------+------+------+
//!    ^             ^      ^             ^      ^
//!    |             |      |             |      |
//!    alloc(3000)   |      free run      |      free run (tail)
//!                  alloc(1)             alloc(2048)
//! ```
//!
//! Every request is rounded up to whole chunks (`alloc(0)` still takes
//! one). Free runs are tracked by a bounded free list of run heads which is
//! scanned in slot order, taking the first run large enough (first-fit).
//!
//! ## Crate Structure
//!
//! ```text
//!   chunkalloc
//!   ├── allocator  - ChunkAllocator: alloc / free / init
//!   ├── chunk      - per-chunk metadata and run bookkeeping
//!   ├── freelist   - bounded list of free run heads
//!   ├── region     - the heap store, address <-> chunk index
//!   ├── kernel     - platform memory (mmap / VirtualAlloc)
//!   ├── error      - ChunkError
//!   └── utils      - rounding helpers
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chunkalloc::DefaultAllocator;
//!
//! let mut allocator = DefaultAllocator::new().unwrap();
//!
//! let ptr = allocator.alloc(100).unwrap();
//! unsafe { ptr.as_ptr().write_bytes(0xAB, 100) };
//!
//! allocator.free(ptr.as_ptr());
//! assert!(allocator.is_clean());
//! ```
//!
//! ## Limitations
//!
//! - **Whole chunks only**: small requests waste the rest of their chunk.
//! - **No merging on free**: two freed neighbours stay two runs. Only the free
//!   chunks right after a new allocation get gathered under one head.
//! - **Bounded free list**: once `MAX_FREE_BLOCKS` runs are registered, newly
//!   freed runs can't be found anymore.
//! - **Last chunk is never handed out**.
//! - **Single-threaded only**: No synchronization primitives.
//!
//! Diagnostics (invalid frees, exhaustion, untracked runs) go through the
//! [`log`] facade.

mod allocator;
mod chunk;
mod error;
mod freelist;
mod kernel;
mod region;
mod utils;

pub use allocator::{ChunkAllocator, HeapStats};
pub use chunk::{Run, Runs};
pub use error::ChunkError;
pub use utils::chunks_for;

/// Default size of a chunk in bytes.
pub const CHUNK_SIZE: usize = 2 * 1024;

/// Default number of chunks in the heap.
pub const NUM_CHUNKS: usize = 2 * 1024;

/// Default size of the heap in bytes.
pub const HEAP_SIZE: usize = CHUNK_SIZE * NUM_CHUNKS;

/// Default capacity of the free list.
pub const MAX_FREE_BLOCKS: usize = 1024;

/// Allocator with the default geometry: a 4 MiB heap of 2 KiB chunks and a
/// free list of 1024 runs.
pub type DefaultAllocator = ChunkAllocator<CHUNK_SIZE, NUM_CHUNKS, MAX_FREE_BLOCKS>;
