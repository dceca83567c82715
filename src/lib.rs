//! This crate implements a boundary-tag heap allocator with segregated,
//! address-ordered explicit free lists.
//!
//!  - **The heap lives in a single growable region supplied by the
//!    application.** A [`Region`] is an append-only byte buffer. The heap
//!    requests more bytes from it when it runs out of free space, and never
//!    gives any back. [`VecRegion`] and (on Unix) [`MmapRegion`] are
//!    provided.
//!
//!  - **Blocks are coalesced immediately.** Every block carries its size in a
//!    header and a footer word, so freeing a block merges it with free
//!    neighbors in constant time. No two free blocks are ever adjacent.
//!
//!  - **Free blocks are found by segregated first fit.** Free blocks are
//!    indexed by power-of-two size class, and each class is kept sorted by
//!    address so that allocations gravitate toward the start of the region.
//!
//!  - **The heap can validate itself.** [`Heap::check`] walks every block and
//!    free list and reports the first broken invariant. Enable the
//!    `debug_checks` feature (or [`HeapConfig::debug_checks`]) to run it after
//!    every operation.
//!
//!  - **This crate supports `#![no_std]`.** It only needs `alloc` (for
//!    [`VecRegion`]).
//!
//! Client memory is addressed by [`BlockPtr`] handles, which are offsets into
//! the region rather than raw pointers, and accessed through
//! [`Heap::payload`] and [`Heap::payload_mut`].
//!
//! # Examples
//!
//! ```rust
//! use segfit::{Heap, HeapConfig, VecRegion};
//!
//! let mut heap = Heap::with_config(
//!     VecRegion::new(),
//!     HeapConfig::INIT.with_debug_checks(true),
//! )
//! .unwrap();
//!
//! let ptr1 = heap.allocate(8).unwrap();
//! let ptr2 = heap.allocate(100).unwrap();
//! heap.payload_mut(ptr1)[..8].copy_from_slice(&42u64.to_le_bytes());
//! heap.payload_mut(ptr2)[..8].copy_from_slice(&56u64.to_le_bytes());
//! assert_eq!(heap.payload(ptr1)[..8], 42u64.to_le_bytes());
//! assert_eq!(heap.payload(ptr2)[..8], 56u64.to_le_bytes());
//!
//! heap.free(ptr1);
//! heap.free(ptr2);
//!
//! // Everything was merged back into one free block
//! assert_eq!(heap.stats().free_blocks, 1);
//! ```
#![no_std]
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]

extern crate alloc;
#[cfg(test)]
extern crate std;

mod arena;
pub mod codec;
mod config;
mod heap;
mod index;
mod region;

pub use self::{
    codec::{ALIGNMENT, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, OVERHEAD, WORD_SIZE},
    config::{HeapConfig, Init, DEFAULT_CHUNK_SIZE, DEFAULT_REALLOC_SLACK},
    heap::{BlockInfo, BlockPtr, Blocks, Heap, HeapStats, InitError, Violation},
    index::{bucket_of, BUCKET_COUNT},
    region::{Region, VecRegion, MAX_REGION_LEN},
};

#[cfg(unix)]
pub use self::region::MmapRegion;
