//! Redundant allocation counters.
//!
//! The stats track every allocator event independently of the free lists and
//! the boundary tags, which makes them a cheap third oracle for the
//! cross-component audit: all three views must agree on the number of free
//! blocks and free bytes at all times.

use crate::AUDIT;

/// Point-in-time copy of the allocator's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Blocks handed out since creation or the last reset.
    pub total_allocated_blocks: usize,
    /// Bytes handed out since creation or the last reset.
    pub total_allocated_bytes: usize,
    /// Blocks returned since creation or the last reset.
    pub total_deallocated_blocks: usize,
    /// Bytes returned since creation or the last reset.
    pub total_deallocated_bytes: usize,
    /// Blocks currently owned by callers.
    pub current_extant_blocks: usize,
    /// Bytes currently owned by callers.
    pub current_extant_bytes: usize,
    /// Free blocks currently tracked by the allocator.
    pub current_free_blocks: usize,
    /// Free bytes currently tracked by the allocator.
    pub current_free_bytes: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Stats {
    total_allocated_blocks: usize,
    total_allocated_bytes: usize,
    total_deallocated_blocks: usize,
    total_deallocated_bytes: usize,
    current_extant_blocks: usize,
    current_extant_bytes: usize,
    current_free_blocks: usize,
    current_free_bytes: usize,
}

impl Stats {
    #[must_use]
    pub(crate) const fn new() -> Self {
        Self {
            total_allocated_blocks: 0,
            total_allocated_bytes: 0,
            total_deallocated_blocks: 0,
            total_deallocated_bytes: 0,
            current_extant_blocks: 0,
            current_extant_bytes: 0,
            current_free_blocks: 0,
            current_free_bytes: 0,
        }
    }

    pub(crate) fn on_reset(&mut self) {
        *self = Self::new();
    }

    pub(crate) fn on_allocate(&mut self, size: usize) {
        self.total_allocated_blocks += 1;
        self.total_allocated_bytes += size;

        self.current_extant_blocks += 1;
        self.current_extant_bytes += size;
    }

    pub(crate) fn on_deallocate(&mut self, size: usize) {
        self.total_deallocated_blocks += 1;
        self.total_deallocated_bytes += size;
        if AUDIT {
            assert!(
                self.total_deallocated_blocks <= self.total_allocated_blocks,
                "deallocated more blocks than were ever allocated"
            );
            assert!(
                self.total_deallocated_bytes <= self.total_allocated_bytes,
                "deallocated more bytes than were ever allocated"
            );
        }

        assert!(self.current_extant_blocks != 0, "deallocate without extant blocks");
        assert!(self.current_extant_bytes >= size, "deallocate exceeds extant bytes");
        self.current_extant_blocks -= 1;
        self.current_extant_bytes -= size;
    }

    pub(crate) fn on_add_to_freelist(&mut self, size: usize) {
        self.current_free_blocks += 1;
        self.current_free_bytes += size;
    }

    pub(crate) fn on_remove_from_freelist(&mut self, size: usize) {
        assert!(self.current_free_blocks != 0, "freelist removal without free blocks");
        assert!(self.current_free_bytes >= size, "freelist removal exceeds free bytes");
        self.current_free_blocks -= 1;
        self.current_free_bytes -= size;
    }

    /// Asserts the monotone and conservation laws.
    pub(crate) fn validate(&self) {
        if !AUDIT {
            return;
        }

        assert!(self.total_deallocated_blocks <= self.total_allocated_blocks);
        assert!(self.total_deallocated_bytes <= self.total_allocated_bytes);

        assert!(
            self.current_extant_blocks == self.total_allocated_blocks - self.total_deallocated_blocks
        );
        assert!(
            self.current_extant_bytes == self.total_allocated_bytes - self.total_deallocated_bytes
        );
    }

    pub(crate) fn free_blocks(&self) -> usize {
        self.current_free_blocks
    }

    pub(crate) fn free_bytes(&self) -> usize {
        self.current_free_bytes
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_allocated_blocks: self.total_allocated_blocks,
            total_allocated_bytes: self.total_allocated_bytes,
            total_deallocated_blocks: self.total_deallocated_blocks,
            total_deallocated_bytes: self.total_deallocated_bytes,
            current_extant_blocks: self.current_extant_blocks,
            current_extant_bytes: self.current_extant_bytes,
            current_free_blocks: self.current_free_blocks,
            current_free_bytes: self.current_free_bytes,
        }
    }
}
