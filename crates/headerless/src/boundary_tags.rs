//! Boundary tags: constant-time discovery of free physical neighbors.
//!
//! Policy: immediately coalesce. Mechanism: every free block carries a full
//! tag at each end, so the block physically preceding an address can be found
//! by reading the tentative footer just before it, and the following block by
//! reading the tentative header just past it.
//!
//! The magic and id values are all that differentiates tags from live caller
//! data, because live blocks deliberately carry no metadata. Recognition is
//! therefore probabilistic; see [`FreedBlock::is_freed_block`]. The manager
//! keeps its own `{blocks, bytes}` counters, which the allocator audits
//! against the range lists and the stats.

use crate::{
    AUDIT,
    freed_block::{FOOTER_ID, FreedBlock, HEADER_ID},
};

pub(crate) struct BoundaryTagManager {
    free_blocks: usize,
    free_bytes: usize,
}

impl BoundaryTagManager {
    #[must_use]
    pub(crate) const fn new() -> Self {
        Self {
            free_blocks: 0,
            free_bytes: 0,
        }
    }

    /// Forgets all tracked blocks; the memory they live in has been logically
    /// released.
    pub(crate) fn reset(&mut self) {
        self.free_blocks = 0;
        self.free_bytes = 0;
    }

    /// Writes a header tag at `p` and a footer tag at `p + size - tag size`,
    /// both recording `size`.
    ///
    /// # Safety
    ///
    /// `p` must be aligned to the tag alignment and `p..p + size` must be
    /// valid, unused memory exclusively owned by the allocator.
    pub(crate) unsafe fn write_tags(&mut self, p: *mut u8, size: usize) -> *mut FreedBlock {
        let block = unsafe { FreedBlock::write(p, HEADER_ID, size) };
        let footer_ptr = p.map_addr(|addr| addr + size - size_of::<FreedBlock>());
        unsafe {
            let _ = FreedBlock::write(footer_ptr, FOOTER_ID, size);
        }

        self.free_blocks += 1;
        self.free_bytes += size;

        unsafe {
            self.validate_block(block);
        }
        block
    }

    /// Destroys both tags of `block`, clearing their recognizable fields so
    /// stale memory will not be mistaken for a tag later.
    ///
    /// # Safety
    ///
    /// `block` must be a live header tag written by
    /// [`write_tags`](Self::write_tags).
    pub(crate) unsafe fn remove_tags(&mut self, block: *mut FreedBlock) {
        unsafe {
            self.validate_block(block);

            let size = FreedBlock::size(block);
            assert!(self.free_blocks != 0, "removing unknown boundary tags");
            assert!(self.free_bytes >= size, "boundary tag byte counter underflow");
            self.free_blocks -= 1;
            self.free_bytes -= size;

            let footer = Self::footer(block);
            FreedBlock::clear(block);
            FreedBlock::clear(footer);
        }
    }

    /// Returns the free block physically preceding `p`, if there is one.
    ///
    /// # Safety
    ///
    /// `p` must lie within the pool `[pool_base, pool_base + pos]`, aligned,
    /// with every block between `pool_base` and `p` either live or tagged.
    pub(crate) unsafe fn preceding_block(
        &self,
        p: *mut u8,
        pool_base: *mut u8,
    ) -> Option<*mut FreedBlock> {
        // avoid reading before the pool
        if core::ptr::eq(p, pool_base) {
            return None;
        }

        let footer: *mut FreedBlock = p
            .map_addr(|addr| addr - size_of::<FreedBlock>())
            .cast();
        unsafe {
            if !FreedBlock::is_freed_block(footer, FOOTER_ID) {
                return None;
            }
            FreedBlock::validate(footer, FOOTER_ID);

            let preceding_block: *mut FreedBlock =
                p.map_addr(|addr| addr - FreedBlock::size(footer)).cast();
            self.validate_block(preceding_block);
            Some(preceding_block)
        }
    }

    /// Returns the free block physically following `[p, p + size)`, if there
    /// is one.
    ///
    /// # Safety
    ///
    /// `[p, p + size)` must lie within the pool and `pool_end` must be
    /// `pool_base + pos`.
    pub(crate) unsafe fn following_block(
        &self,
        p: *mut u8,
        size: usize,
        pool_end: *mut u8,
    ) -> Option<*mut FreedBlock> {
        let candidate = p.map_addr(|addr| addr + size);
        // avoid reading past the carved range
        if core::ptr::eq(candidate, pool_end) {
            return None;
        }

        let following_block: *mut FreedBlock = candidate.cast();
        unsafe {
            if !FreedBlock::is_freed_block(following_block, HEADER_ID) {
                return None;
            }
            self.validate_block(following_block);
            Some(following_block)
        }
    }

    pub(crate) fn free_blocks(&self) -> usize {
        self.free_blocks
    }

    pub(crate) fn free_bytes(&self) -> usize {
        self.free_bytes
    }

    unsafe fn footer(block: *mut FreedBlock) -> *mut FreedBlock {
        unsafe {
            FreedBlock::end(block)
                .map_addr(|addr| addr - size_of::<FreedBlock>())
                .cast()
        }
    }

    /// The existence of `block` means the bookkeeping must record at least
    /// that much memory, and both tags must be intact.
    unsafe fn validate_block(&self, block: *mut FreedBlock) {
        if !AUDIT {
            return;
        }

        assert!(self.free_blocks != 0);
        unsafe {
            assert!(self.free_bytes >= FreedBlock::size(block));
            FreedBlock::validate(block, HEADER_ID);
            FreedBlock::validate(Self::footer(block), FOOTER_ID);
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::boxed::Box;

    use super::*;

    #[repr(align(16))]
    struct Heap([u8; 1024]);

    fn with_heap<F: FnOnce(&mut BoundaryTagManager, *mut u8)>(test_fn: F) {
        // 0x33 so no stale zeroes accidentally resemble anything
        let mut heap = Box::new(Heap([0x33u8; 1024]));
        let mut manager = BoundaryTagManager::new();
        test_fn(&mut manager, heap.0.as_mut_ptr());
    }

    #[test]
    fn test_write_tags_counts_and_validates() {
        with_heap(|manager, base| unsafe {
            let block = manager.write_tags(base, 128);
            assert_eq!(FreedBlock::size(block), 128);
            assert_eq!(manager.free_blocks(), 1);
            assert_eq!(manager.free_bytes(), 128);

            let footer: *const FreedBlock =
                base.map_addr(|addr| addr + 128 - size_of::<FreedBlock>()).cast();
            assert!(FreedBlock::is_freed_block(footer, FOOTER_ID));
        });
    }

    #[test]
    fn test_remove_tags_destroys_recognition() {
        with_heap(|manager, base| unsafe {
            let block = manager.write_tags(base, 128);
            manager.remove_tags(block);

            assert_eq!(manager.free_blocks(), 0);
            assert_eq!(manager.free_bytes(), 0);
            assert!(!FreedBlock::is_freed_block(base.cast(), HEADER_ID));
            let footer: *const FreedBlock =
                base.map_addr(|addr| addr + 128 - size_of::<FreedBlock>()).cast();
            assert!(!FreedBlock::is_freed_block(footer, FOOTER_ID));
        });
    }

    #[test]
    fn test_preceding_block_found_via_footer() {
        with_heap(|manager, base| unsafe {
            let block = manager.write_tags(base, 128);

            // a block being freed at offset 128 has `block` as its neighbor
            let p = base.map_addr(|addr| addr + 128);
            assert_eq!(manager.preceding_block(p, base), Some(block));
        });
    }

    #[test]
    fn test_preceding_block_none_at_pool_start() {
        with_heap(|manager, base| unsafe {
            assert_eq!(manager.preceding_block(base, base), None);
        });
    }

    #[test]
    fn test_preceding_block_none_when_neighbor_live() {
        with_heap(|manager, base| unsafe {
            // the bytes before offset 256 are caller data (0x33 fill)
            let p = base.map_addr(|addr| addr + 256);
            assert_eq!(manager.preceding_block(p, base), None);
        });
    }

    #[test]
    fn test_following_block_found_via_header() {
        with_heap(|manager, base| unsafe {
            let following = manager.write_tags(base.map_addr(|addr| addr + 192), 64);

            let pool_end = base.map_addr(|addr| addr + 1024);
            assert_eq!(manager.following_block(base, 192, pool_end), Some(following));
        });
    }

    #[test]
    fn test_following_block_none_at_pool_end() {
        with_heap(|manager, base| unsafe {
            let pool_end = base.map_addr(|addr| addr + 256);
            assert_eq!(manager.following_block(base, 256, pool_end), None);
        });
    }

    #[test]
    fn test_following_block_none_when_neighbor_live() {
        with_heap(|manager, base| unsafe {
            let pool_end = base.map_addr(|addr| addr + 1024);
            assert_eq!(manager.following_block(base, 192, pool_end), None);
        });
    }
}
