use crate::error::ChunkError;

/// Metadata of one chunk slot of the heap.
///
/// Chunks are grouped in runs: contiguous sequences that are either all free
/// or all allocated. Only the first chunk of a run (its head) carries the
/// length of the run; the rest of the slots keep `len == 0`.
///
/// ```text
///   head            head                 head
///    |               |                    |
/// +------+------+ +------+------+------+ +------+
/// | used | used | | free | free | free | | used |
/// | len 2| len 0| | len 3| len 0| len 0| | len 1|
/// +------+------+ +------+------+------+ +------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
    /// Flag to tell whether the chunk belongs to a free run.
    pub is_free: bool,
    /// Flag to tell whether the chunk is the first one of its run.
    pub is_head: bool,
    /// Number of chunks in the run. Only meaningful when `is_head` is set.
    pub len: usize,
}

impl Chunk {
    const FREE: Self = Self {
        is_free: true,
        is_head: false,
        len: 0,
    };
}

/// A run of chunks as seen when walking the table in address order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    /// Index of the head chunk.
    pub head: usize,
    /// Number of chunks in the run.
    pub len: usize,
    /// Whether the run is free.
    pub is_free: bool,
}

/// Per-slot state of the whole heap.
///
/// The heads partition `0..NUM_CHUNKS`: starting at chunk `0` and jumping by
/// each head's `len` visits every head and lands exactly on `NUM_CHUNKS`.
/// The last chunk is never reserved, it only ever belongs to a free run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChunkTable<const NUM_CHUNKS: usize> {
    chunks: [Chunk; NUM_CHUNKS],
}

impl<const NUM_CHUNKS: usize> ChunkTable<NUM_CHUNKS> {
    /// A table with a single free run covering every chunk.
    pub fn new() -> Self {
        let mut table = Self {
            chunks: [Chunk::FREE; NUM_CHUNKS],
        };
        table.reset();
        table
    }

    /// Back to a single free run covering every chunk.
    pub fn reset(&mut self) {
        self.chunks = [Chunk::FREE; NUM_CHUNKS];
        self.chunks[0].is_head = true;
        self.chunks[0].len = NUM_CHUNKS;
    }

    #[inline]
    pub fn is_free(&self, index: usize) -> bool {
        self.chunks[index].is_free
    }

    /// Length of the free run starting at `index`, or `None` if `index` is
    /// not the head of a free run.
    pub fn free_run_length(&self, index: usize) -> Option<usize> {
        match self.chunks.get(index) {
            Some(chunk) if chunk.is_free && chunk.is_head => Some(chunk.len),
            _ => None,
        }
    }

    /// Length of the allocated run starting at `index`, or `None` if `index`
    /// is not the head of a live allocation.
    pub fn allocated_run_length(&self, index: usize) -> Option<usize> {
        match self.chunks.get(index) {
            Some(chunk) if !chunk.is_free && chunk.is_head => Some(chunk.len),
            _ => None,
        }
    }

    /// Marks `[start, start + len)` as one allocated run headed at `start`.
    ///
    /// Every chunk in the range must be free and the range must end before
    /// the last chunk. Nothing is modified if either check fails. Whatever
    /// follows the range is left alone: re-heading the rest of a split run is
    /// up to the caller.
    pub fn reserve(&mut self, start: usize, len: usize) -> Result<(), ChunkError> {
        let end = start
            .checked_add(len)
            .filter(|&end| len > 0 && end < NUM_CHUNKS)
            .ok_or(ChunkError::RangeOutOfBounds { start, len })?;

        if let Some(offset) = self.chunks[start..end].iter().position(|c| !c.is_free) {
            return Err(ChunkError::ChunkInUse {
                index: start + offset,
            });
        }

        for chunk in &mut self.chunks[start..end] {
            *chunk = Chunk {
                is_free: false,
                is_head: false,
                len: 0,
            };
        }

        self.chunks[start].is_head = true;
        self.chunks[start].len = len;

        Ok(())
    }

    /// Turns the allocated run headed at `start` back into a free run of the
    /// same length and returns that length.
    ///
    /// The freed run is not merged with its neighbours.
    pub fn release(&mut self, start: usize) -> Result<usize, ChunkError> {
        let len = self
            .allocated_run_length(start)
            .ok_or(ChunkError::NotAllocated { index: start })?;

        if len == 0 || start + len > NUM_CHUNKS {
            return Err(ChunkError::RangeOutOfBounds { start, len });
        }

        for chunk in &mut self.chunks[start..start + len] {
            *chunk = Chunk::FREE;
        }

        self.chunks[start].is_head = true;
        self.chunks[start].len = len;

        Ok(len)
    }

    /// Makes `start` the head of every contiguous free chunk from there up to
    /// the next allocated chunk (or the end of the heap) and returns the new
    /// length.
    ///
    /// Free runs swallowed by the extension lose their head, `on_absorbed`
    /// is called with each of them.
    pub fn extend_free_run(&mut self, start: usize, mut on_absorbed: impl FnMut(usize)) -> usize {
        let extent = self.chunks[start..]
            .iter()
            .take_while(|chunk| chunk.is_free)
            .count();

        for index in start + 1..start + extent {
            let chunk = &mut self.chunks[index];
            if chunk.is_head {
                chunk.is_head = false;
                chunk.len = 0;
                on_absorbed(index);
            }
        }

        if extent > 0 {
            self.chunks[start].is_head = true;
            self.chunks[start].len = extent;
        }

        extent
    }

    /// Walks the runs in address order.
    pub fn runs(&self) -> Runs<'_, NUM_CHUNKS> {
        Runs {
            table: self,
            current: 0,
        }
    }

    /// Whether every chunk of the heap is free.
    pub fn is_clean(&self) -> bool {
        self.chunks.iter().all(|chunk| chunk.is_free)
    }

    /// Number of free chunks, counted slot by slot.
    pub fn free_chunks(&self) -> usize {
        self.chunks.iter().filter(|chunk| chunk.is_free).count()
    }
}

/// Iterator over the runs of the heap in address order.
pub struct Runs<'a, const NUM_CHUNKS: usize> {
    table: &'a ChunkTable<NUM_CHUNKS>,
    current: usize,
}

impl<'a, const NUM_CHUNKS: usize> Iterator for Runs<'a, NUM_CHUNKS> {
    type Item = Run;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.table.chunks.get(self.current)?;

        // A broken partition ends the walk instead of looping forever.
        if !chunk.is_head || chunk.len == 0 {
            self.current = NUM_CHUNKS;
            return None;
        }

        let run = Run {
            head: self.current,
            len: chunk.len,
            is_free: chunk.is_free,
        };
        self.current += chunk.len;

        Some(run)
    }
}
