//! The headerless allocator: split-on-alloc, coalesce-on-free.
//!
//! [`HeaderlessAllocator`] ties the pieces together: it owns the backing
//! [`Pool`], satisfies allocations from the segregated freelists (splitting
//! off any representable leftover), falls back to bumping the pool frontier,
//! and on deallocation eagerly merges the freed region with its free physical
//! neighbors before filing it back under its size class.
//!
//! Because live blocks carry no metadata, the caller must pass the original
//! size back to [`deallocate`](HeaderlessAllocator::deallocate); in exchange
//! every allocated byte is usable.

use pool::Pool;
use snafu::{ResultExt as _, Snafu};

use crate::{
    AUDIT,
    boundary_tags::BoundaryTagManager,
    freed_block::{FreedBlock, HEADER_ID, MIN_ALIGN, is_valid_size},
    segregated_range_lists::SegregatedRangeLists,
    stats::{Stats, StatsSnapshot},
};

/// Failure to create a [`HeaderlessAllocator`].
#[derive(Debug, Snafu)]
pub enum CreateError {
    /// The backing pool could not be reserved.
    #[snafu(display("failed to create backing pool: {source}"))]
    PoolCreate {
        /// Where the allocator was created.
        #[snafu(implicit)]
        location: snafu::Location,
        /// The underlying pool failure.
        #[snafu(source)]
        source: pool::CreateError,
    },
    /// The requested pool size exceeds what a block's size field can record.
    #[snafu(display("pool size {pool_size} exceeds the largest representable block"))]
    PoolTooLarge {
        /// The rejected pool size.
        pool_size: usize,
        /// Where the allocator was created.
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

/// A fixed-capacity allocator whose live blocks carry zero metadata.
///
/// See the crate documentation for the overall design.
pub struct HeaderlessAllocator {
    pool: Pool,
    segregated_range_lists: SegregatedRangeLists,
    boundary_tag_manager: BoundaryTagManager,
    stats: Stats,
}

unsafe impl Send for HeaderlessAllocator {}

impl HeaderlessAllocator {
    /// Creates an allocator over a fresh reservation of `pool_size` bytes.
    ///
    /// # Errors
    ///
    /// Fails if the reservation cannot be obtained or `pool_size` is larger
    /// than the biggest block the boundary tags can describe (coalescing may
    /// merge the whole pool into one block).
    pub fn new(pool_size: usize) -> Result<Self, CreateError> {
        snafu::ensure!(
            u32::try_from(pool_size).is_ok(),
            PoolTooLargeSnafu { pool_size }
        );
        let pool = Pool::create(pool_size).context(PoolCreateSnafu)?;
        log::debug!(
            "HeaderlessAllocator::new({pool_size}) -> pool at {:p}",
            pool.base()
        );

        let allocator = Self {
            pool,
            segregated_range_lists: SegregatedRangeLists::new(),
            boundary_tag_manager: BoundaryTagManager::new(),
            stats: Stats::new(),
        };
        allocator.validate();
        Ok(allocator)
    }

    /// Allocates a block of exactly `size` bytes, aligned to [`MIN_ALIGN`].
    ///
    /// The freelists are searched first, preferring the tightest-fitting size
    /// class and the lowest address within it; only when no tracked block
    /// suffices is the pool frontier bumped. Returns `None` once both
    /// sources are exhausted. Exhaustion is a common condition for cache-like
    /// users, so it is not an error and leaves the allocator unchanged.
    ///
    /// # Panics
    ///
    /// Panics if `size` does not satisfy [`is_valid_size`]; callers must
    /// round up.
    pub fn allocate(&mut self, size: usize) -> Option<*mut u8> {
        assert!(is_valid_size(size), "allocation size {size} is not valid");
        self.validate();

        let p = self
            .take_and_split_free_block(size)
            .or_else(|| self.pool.alloc(size))?;

        // statistics must not change when the allocation failed
        self.stats.on_allocate(size);
        log::trace!("allocate({size}) -> {p:p}");

        self.validate();
        Some(p)
    }

    /// Returns the block at `p` to the allocator.
    ///
    /// The freed region is immediately coalesced with any free physical
    /// neighbor on either side, then filed under its size class.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `p` was returned by [`allocate`](Self::allocate) on this allocator
    ///   with this exact `size`
    /// - the block has not been deallocated before, nor has the allocator
    ///   been reset since
    /// - the block's memory is no longer accessed afterwards
    pub unsafe fn deallocate(&mut self, p: *mut u8, size: usize) {
        assert!(
            p.addr() % MIN_ALIGN == 0,
            "deallocated address {p:p} is misaligned"
        );
        assert!(is_valid_size(size), "deallocation size {size} is not valid");
        assert!(
            self.pool.contains(p) && self.pool.contains(p.map_addr(|addr| addr + size - 1)),
            "deallocated range is not inside the pool"
        );
        if AUDIT {
            // a region that still recognizes as a free block was freed twice
            unsafe {
                assert!(
                    !FreedBlock::is_freed_block(p.cast(), HEADER_ID),
                    "double free of {p:p}"
                );
            }
        }
        self.validate();
        log::trace!("deallocate({p:p}, {size})");

        self.stats.on_deallocate(size);
        let (p, size) = unsafe { self.coalesce(p, size) };
        unsafe {
            self.add_to_freelist(p, size);
        }

        self.validate();
    }

    /// Frees everything at once.
    ///
    /// The pool is truncated to empty and all bookkeeping is cleared; tags
    /// still present in memory are not destroyed because the memory is
    /// logically released. Callers must not touch previously returned blocks
    /// afterwards.
    pub fn reset(&mut self) {
        log::debug!("reset ({} bytes carved)", self.pool.pos());

        self.pool.free_all();
        self.segregated_range_lists.reset();
        self.boundary_tag_manager.reset();
        self.stats.on_reset();

        self.validate();
    }

    /// Audits every component, then cross-checks the three independent
    /// free-block counters against each other.
    ///
    /// A no-op unless auditing is enabled (debug builds or the
    /// `sanity-checks` feature). Failure means the heap is inconsistent and
    /// is reported by panic; there is no recovery.
    pub fn validate(&self) {
        if !AUDIT {
            return;
        }

        self.segregated_range_lists.validate(HEADER_ID);
        self.stats.validate();

        assert_equal(
            self.stats.free_blocks(),
            self.segregated_range_lists.free_blocks(),
            self.boundary_tag_manager.free_blocks(),
        );
        assert_equal(
            self.stats.free_bytes(),
            self.segregated_range_lists.free_bytes(),
            self.boundary_tag_manager.free_bytes(),
        );
    }

    /// Size of the backing reservation.
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Bytes carved off the pool so far (live, free, and absorbed alike).
    pub fn committed(&self) -> usize {
        self.pool.pos()
    }

    /// Current counter values.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Takes the best tracked block for `size` bytes, returning any leftover
    /// to the freelists if it is itself representable.
    ///
    /// An unrepresentable leftover is absorbed into the returned allocation:
    /// losing those bytes is preferable to tracking fragments that could
    /// never be handed out.
    fn take_and_split_free_block(&mut self, size: usize) -> Option<*mut u8> {
        let block = self.segregated_range_lists.find(size)?;

        unsafe {
            let p = FreedBlock::start(block);
            let leftover_size = FreedBlock::size(block) - size;
            self.remove_from_freelist(block);

            if is_valid_size(leftover_size) {
                self.add_to_freelist(p.map_addr(|addr| addr + size), leftover_size);
            }

            Some(p)
        }
    }

    /// Expands the region being freed over its free physical neighbors.
    unsafe fn coalesce(&mut self, mut p: *mut u8, mut size: usize) -> (*mut u8, usize) {
        unsafe {
            if let Some(preceding_block) = self
                .boundary_tag_manager
                .preceding_block(p, self.pool.base())
            {
                p = p.map_addr(|addr| addr - FreedBlock::size(preceding_block));
                size += FreedBlock::size(preceding_block);
                self.remove_from_freelist(preceding_block);
            }

            if let Some(following_block) =
                self.boundary_tag_manager
                    .following_block(p, size, self.pool.end())
            {
                size += FreedBlock::size(following_block);
                self.remove_from_freelist(following_block);
            }
        }

        (p, size)
    }

    unsafe fn add_to_freelist(&mut self, p: *mut u8, size: usize) {
        unsafe {
            let block = self.boundary_tag_manager.write_tags(p, size);
            self.segregated_range_lists.insert(block);
        }
        self.stats.on_add_to_freelist(size);
    }

    unsafe fn remove_from_freelist(&mut self, block: *mut FreedBlock) {
        unsafe {
            self.stats.on_remove_from_freelist(FreedBlock::size(block));
            self.segregated_range_lists.remove(block);
            self.boundary_tag_manager.remove_tags(block);
        }
    }

    #[cfg(test)]
    fn size_class_bitmap(&self) -> usize {
        self.segregated_range_lists.bitmap()
    }
}

impl Drop for HeaderlessAllocator {
    fn drop(&mut self) {
        self.validate();
    }
}

fn assert_equal(x1: usize, x2: usize, x3: usize) {
    assert!(
        x1 == x2 && x2 == x3,
        "bookkeeping mismatch: stats={x1} lists={x2} tags={x3}"
    );
}
