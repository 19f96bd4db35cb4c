/// Bounded table to keep track of free runs.
///
/// Every occupied slot holds the index of the head chunk of a free run, so
/// looking for room only has to visit `MAX_FREE_BLOCKS` slots instead of
/// every chunk of the heap.
///
/// ```text
///          slot 0   slot 1   slot 2   slot 3
///        +--------+--------+--------+--------+
///        |   12   |  empty |    3   |  empty |
///        +---|----+--------+---|----+--------+
///            |                 |
///            |        +--------+
///            v        v
/// +------+------+---+------+------+---+------+-------+
/// | used | .... |   | free | .... |   | free | ..... |
/// +------+------+---+------+------+---+------+-------+
///                    chunk 3            chunk 12
/// ```
///
/// New heads go in the first empty slot, so iteration follows slot order and
/// not address order. The capacity is a hard limit: once every slot is taken
/// new free runs are simply not registered and can't be found by the
/// allocator anymore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FreeList<const MAX_FREE_BLOCKS: usize> {
    slots: [Option<usize>; MAX_FREE_BLOCKS],
}

impl<const MAX_FREE_BLOCKS: usize> FreeList<MAX_FREE_BLOCKS> {
    /// Creates a new empty FreeList
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_FREE_BLOCKS],
        }
    }

    /// Forgets every registered run.
    pub fn clear(&mut self) {
        self.slots = [None; MAX_FREE_BLOCKS];
    }

    /// Registers `index` in the first empty slot.
    ///
    /// Returns `false` when the table is full, in which case the run stays
    /// untracked.
    pub fn insert(&mut self, index: usize) -> bool {
        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(index);
                true
            }
            None => false,
        }
    }

    /// Clears the first slot holding `index`. Removing an index that was never
    /// registered does nothing.
    pub fn remove(&mut self, index: usize) -> bool {
        match self.slots.iter_mut().find(|slot| **slot == Some(index)) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.slots.contains(&Some(index))
    }

    /// Registered heads in slot order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots.iter().filter_map(|slot| *slot)
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns the first registered head for which `fits` holds.
    ///
    /// This is first-fit in registry order: the earliest slot wins even if a
    /// later one would waste less space.
    pub fn find(&self, mut fits: impl FnMut(usize) -> bool) -> Option<usize> {
        self.iter().find(|&index| fits(index))
    }
}
