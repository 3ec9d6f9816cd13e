//! Headerless pool-based heap allocator.
//!
//! This crate provides a fixed-capacity, single-threaded, general-purpose
//! allocator that carves variable-size blocks out of one contiguous pool
//! without storing any per-allocation header in the returned memory. The
//! caller must remember each block's size and pass it back on deallocation;
//! in exchange, allocated blocks carry zero metadata overhead. That trade is
//! attractive when many allocations share a known size, e.g. a file cache of
//! sized pages.
//!
//! # Algorithm
//!
//! The allocator combines three classic mechanisms:
//!
//! - **Segregated freelists**: free blocks are filed by power-of-two size
//!   class, each class an address-ordered circular list. A word-sized bitmap
//!   records which classes are non-empty, so the search for the tightest
//!   adequate class is O(1).
//! - **Boundary tags**: every free block carries a recognizable tag at both
//!   ends. When a block is freed, the allocator peeks just before and just
//!   after it; a recognized tag identifies a free neighbor, which is merged
//!   immediately (eager coalescing).
//! - **Bump fallback**: when no tracked block fits, the request is served by
//!   extending the pool's high-water mark.
//!
//! # Memory Layout
//!
//! ```text
//! Pool: ┌────────┬────────────────┬────────┬──────────────┬─────────────┐
//!       │ live   │ free           │ live   │ free         │ untouched   │
//!       └────────┴────────────────┴────────┴──────────────┴─────────────┘
//!                ▲                         ▲              ▲
//!                │                         │              └─ bump frontier
//!        ┌───────┴───────────────┐  (same structure)
//!        │ header tag │ ... │ footer tag │
//!        └───────────────────────┘
//!        tags carry {magic, prev, next, size, id}; live blocks carry nothing
//! ```
//!
//! # Usage Example
//!
//! ```rust
//! use headerless::{HeaderlessAllocator, MIN_ALIGN, MIN_BLOCK_SIZE};
//!
//! let mut allocator = HeaderlessAllocator::new(4096).unwrap();
//!
//! // sizes must be multiples of MIN_ALIGN and at least MIN_BLOCK_SIZE
//! let size = MIN_BLOCK_SIZE.max(64);
//! if let Some(p) = allocator.allocate(size) {
//!     assert_eq!(p.addr() % MIN_ALIGN, 0);
//!
//!     // the caller remembers the size; the allocator does not
//!     unsafe {
//!         allocator.deallocate(p, size);
//!     }
//! }
//! ```
//!
//! # Failure Model
//!
//! Exhaustion is an expected condition and surfaces as `None` from
//! [`allocate`](HeaderlessAllocator::allocate). Caller contract violations
//! (invalid sizes, foreign pointers, double frees) and internal corruption
//! are programming errors and surface as panics; the expensive structural
//! audits behind the latter run in debug builds, or in any build with the
//! `sanity-checks` feature enabled.
//!
//! # Performance Characteristics
//!
//! | Operation | Cost |
//! |-----------|------|
//! | `allocate` | O(1) class lookup + within-class scan |
//! | `deallocate` | O(1) neighbor discovery + within-class insert scan |
//! | `reset` | O(number of size classes) |
//!
//! # Thread Safety
//!
//! The allocator is `Send` but not `Sync`. Callers needing shared access
//! wrap it in a lock:
//!
//! ```rust,ignore
//! struct SharedAllocator {
//!     inner: spin::Mutex<HeaderlessAllocator>,
//! }
//! ```
//!
//! # Reliability Note
//!
//! Because live blocks carry no metadata, free-neighbor detection relies on
//! recognizing the magic+id pattern in raw memory. A live allocation whose
//! bytes happen to match at exactly the right offset is misidentified; the
//! wide magic word and the two distinct ids at opposite ends of the tag make
//! that astronomically unlikely, but the design assumes cooperative callers.

#![no_std]

extern crate alloc;

mod allocator;
mod boundary_tags;
mod freed_block;
mod range_list;
mod segregated_range_lists;
mod stats;

pub use self::{
    allocator::{CreateError, HeaderlessAllocator},
    freed_block::{FOOTER_ID, HEADER_ID, MAGIC, MIN_ALIGN, MIN_BLOCK_SIZE, is_valid_size},
    segregated_range_lists::NUM_RANGE_LISTS,
    stats::StatsSnapshot,
};

/// Whether the expensive self-audits are compiled in.
pub(crate) const AUDIT: bool = cfg!(debug_assertions) || cfg!(feature = "sanity-checks");
