//! Index-Array Pool
//!
//! Recomputation bookkeeping (the scratch lists of master edges seen during a
//! run, invalidation worklists, check-resolution snapshots) needs a short
//! lived `Vec` per evaluation. In hot graphs that is an allocation per
//! recomputation, so the runtime draws these arrays from a reusable pool.
//!
//! # Discipline
//!
//! Leases are strictly nested: a lease is taken when a recomputation starts
//! and released before that recomputation returns, so the pool behaves as a
//! stack and needs no per-block tracking beyond "leased or not". Blocks are
//! warmed to a mean row capacity, the block table is defragmented (leased
//! blocks swapped to the front) before it grows, and growth is geometric up
//! to a hard cap.

/// A block checked out of an [`ArrayPool`].
///
/// The vector is cleared on release, not on take, so capacity is retained
/// across uses.
pub(crate) struct Lease<T> {
    vec: Vec<T>,
    slot: usize,
}

impl<T> std::ops::Deref for Lease<T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Vec<T> {
        &self.vec
    }
}

impl<T> std::ops::DerefMut for Lease<T> {
    fn deref_mut(&mut self) -> &mut Vec<T> {
        &mut self.vec
    }
}

pub(crate) struct ArrayPool<T> {
    /// `None` marks a block currently out on lease.
    blocks: Vec<Option<Vec<T>>>,
    /// First table index worth scanning for a free block.
    cursor: usize,
    /// Number of outstanding leases.
    usage: usize,
    /// Blocks added on the next growth; doubles each time.
    grow: usize,
    max_blocks: usize,
    mean_row: usize,
}

impl<T> ArrayPool<T> {
    pub(crate) fn new() -> Self {
        Self::with_shape(8, 1024, 16)
    }

    pub(crate) fn with_shape(grow: usize, max_blocks: usize, mean_row: usize) -> Self {
        let mut pool = Self {
            blocks: Vec::new(),
            cursor: 0,
            usage: 0,
            grow,
            max_blocks,
            mean_row,
        };
        pool.grow_blocks();
        pool
    }

    fn grow_blocks(&mut self) {
        assert!(
            self.blocks.len() < self.max_blocks,
            "array pool exhausted: {} blocks leased without release",
            self.blocks.len(),
        );
        let add = self.grow.min(self.max_blocks - self.blocks.len());
        for _ in 0..add {
            self.blocks.push(Some(Vec::with_capacity(self.mean_row)));
        }
        self.grow *= 2;
    }

    /// Swap leased blocks to the front of the table and leave the cursor at
    /// the first free one.
    fn defragment(&mut self) {
        let mut leased = 0;
        for i in 0..self.blocks.len() {
            if self.blocks[i].is_none() {
                self.blocks.swap(leased, i);
                leased += 1;
            }
        }
        self.cursor = leased;
    }

    pub(crate) fn take(&mut self) -> Lease<T> {
        let slot = match (self.cursor..self.blocks.len()).find(|&i| self.blocks[i].is_some()) {
            Some(slot) => slot,
            None => {
                self.defragment();
                if self.cursor >= self.blocks.len() {
                    self.grow_blocks();
                }
                self.cursor
            }
        };

        let vec = self.blocks[slot]
            .take()
            .expect("pool cursor points at a free block");
        self.cursor = slot + 1;
        self.usage += 1;
        Lease { vec, slot }
    }

    pub(crate) fn release(&mut self, mut lease: Lease<T>) {
        lease.vec.clear();
        self.blocks[lease.slot] = Some(lease.vec);
        self.usage -= 1;
        if self.usage == 0 {
            self.cursor = 0;
        }
    }
}
