//! One address-ordered freelist of similarly-sized blocks.
//!
//! The list is circular and doubly linked, threaded through the header tags
//! of the free blocks themselves, with a sentinel node eliminating the null
//! cases in insert and remove. The sentinel is boxed once at construction so
//! that the list may be moved without dangling the circular links.
//!
//! Blocks are kept in strictly ascending address order: allocation then
//! prefers low addresses, which concentrates reuse at the front of the pool
//! and keeps high addresses free to coalesce.

use alloc::boxed::Box;
use core::ptr;

use crate::{AUDIT, freed_block::FreedBlock};

/// Circular doubly-linked list of free blocks, ascending by address.
pub(crate) struct RangeList {
    sentinel: *mut FreedBlock,
    free_blocks: usize,
    free_bytes: usize,
}

impl RangeList {
    #[must_use]
    pub(crate) fn new() -> Self {
        let sentinel = Box::into_raw(Box::new(FreedBlock::unlinked()));
        let mut list = Self {
            sentinel,
            free_blocks: 0,
            free_bytes: 0,
        };
        list.reset();
        list
    }

    /// Relinks the sentinel to itself and zeroes the counters.
    ///
    /// Any blocks still linked are abandoned in place; the caller is expected
    /// to have logically released the memory they live in.
    pub(crate) fn reset(&mut self) {
        unsafe {
            (*self.sentinel).prev = self.sentinel;
            (*self.sentinel).next = self.sentinel;
        }
        self.free_blocks = 0;
        self.free_bytes = 0;
    }

    /// Splices `block` in before the first successor at a higher address,
    /// preserving ascending order.
    ///
    /// # Safety
    ///
    /// `block` must be a live header tag that is not linked into any list.
    pub(crate) unsafe fn insert(&mut self, block: *mut FreedBlock) {
        unsafe {
            // find the block before which to insert
            let mut successor = (*self.sentinel).next;
            while !ptr::eq(successor, self.sentinel) {
                if block < successor {
                    break;
                }
                successor = (*successor).next;
            }

            (*block).prev = (*successor).prev;
            (*block).next = successor;
            (*(*successor).prev).next = block;
            (*successor).prev = block;

            self.free_blocks += 1;
            self.free_bytes += FreedBlock::size(block);
        }
    }

    /// Returns the first (lowest-addressed) block of size >= `min_size`, or
    /// `None` if no such block exists.
    pub(crate) fn find(&self, min_size: usize) -> Option<*mut FreedBlock> {
        unsafe {
            let mut block = (*self.sentinel).next;
            while !ptr::eq(block, self.sentinel) {
                if FreedBlock::size(block) >= min_size {
                    return Some(block);
                }
                block = (*block).next;
            }
        }

        // none found, so the average block size is below the request
        if AUDIT && self.free_blocks != 0 {
            assert!(self.free_bytes / self.free_blocks < min_size);
        }
        None
    }

    /// Unlinks `block` and updates the counters.
    ///
    /// # Safety
    ///
    /// `block` must be linked into this list.
    pub(crate) unsafe fn remove(&mut self, block: *mut FreedBlock) {
        unsafe {
            (*(*block).next).prev = (*block).prev;
            (*(*block).prev).next = (*block).next;

            let size = FreedBlock::size(block);
            assert!(self.free_blocks != 0, "removing from an empty range list");
            assert!(self.free_bytes >= size, "range list byte counter underflow");
            self.free_blocks -= 1;
            self.free_bytes -= size;
        }
    }

    /// Audits the list: independent forward and backward traversals must agree
    /// with each other and with the counters, every tag must validate, and
    /// addresses must strictly increase.
    pub(crate) fn validate(&self, id: u32) {
        if !AUDIT {
            return;
        }

        let mut free_blocks = 0;
        let mut free_bytes = 0;

        unsafe {
            let mut prev_addr = 0;
            let mut block = (*self.sentinel).next;
            while !ptr::eq(block, self.sentinel) {
                FreedBlock::validate(block, id);
                assert!(
                    block.addr() > prev_addr,
                    "range list addresses must strictly increase"
                );
                prev_addr = block.addr();
                free_blocks += 1;
                free_bytes += FreedBlock::size(block);
                block = (*block).next;
            }

            let mut block = (*self.sentinel).prev;
            while !ptr::eq(block, self.sentinel) {
                FreedBlock::validate(block, id);
                free_blocks += 1;
                free_bytes += FreedBlock::size(block);
                block = (*block).prev;
            }
        }

        // both traversals agree with the counters
        assert!(free_blocks == self.free_blocks * 2 && free_bytes == self.free_bytes * 2);
        // if empty, state must be as established by reset
        if self.is_empty() {
            unsafe {
                assert!(ptr::eq((*self.sentinel).next, self.sentinel));
                assert!(ptr::eq((*self.sentinel).prev, self.sentinel));
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.free_blocks == 0
    }

    pub(crate) fn free_blocks(&self) -> usize {
        self.free_blocks
    }

    pub(crate) fn free_bytes(&self) -> usize {
        self.free_bytes
    }
}

impl Drop for RangeList {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(self.sentinel));
        }
    }
}
