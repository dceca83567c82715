//! The allocator core
use core::num::NonZeroUsize;

use crate::{
    arena::Arena,
    codec::{self, ALIGNMENT, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, OVERHEAD, WORD_SIZE},
    config::{HeapConfig, Init},
    index::{FreeListIndex, BUCKET_COUNT},
    region::{Region, MAX_REGION_LEN},
};

mod check;
pub use self::check::Violation;

/// The header of the prologue block, which is permanently allocated and has
/// no payload. Offset 0 holds a padding word that aligns payloads to
/// [`ALIGNMENT`].
const PROLOGUE: usize = WORD_SIZE;
const PROLOGUE_SIZE: usize = OVERHEAD;
/// The header of the first real block, or of the epilogue in a heap that
/// has not grown yet.
const FIRST_BLOCK: usize = PROLOGUE + PROLOGUE_SIZE;
/// Padding + prologue + epilogue.
const INITIAL_LEN: usize = FIRST_BLOCK + WORD_SIZE;

#[doc = svgbobdoc::transform!(
/// A heap manager for a single growable [`Region`].
///
/// # Data Structure Overview
///
/// <center>
/// ```svgbob
///   Region
///
///    0   4    12                                                      len-4  len
///   ,---+----+------------------+------------------------------------+------,
///   |pad|prol| allocated block  |            free block              | epil |
///   '---+----+------------------+------------------------------------+------'
///             |                 |                                    |
///             v                 v                                    v
///            ,---+---------+---,,---+------+------+----------------+---,
///            | H | payload | F || H | next | prev |                | F |
///            '---+---------+---''---+--+---+------+----------------+---'
///                                      |
/// ╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶|╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶
///   Free-list index                    |   (next free block of the same
///                                      v    bucket, at a higher address)
///        ,-----+-----+-----+-----+-----+-----,
///  heads |  0  |  1  |  2  |  O  | ... | 27  |
///        +-----+-----+-----+--|--+-----+-----+
///  size  | 16  | 32  | 64  | 128 |     | 2³¹ |
///        '-----+-----+-----+--|--+-----+-----'
///                             |
///                             '--> first free block of 128..256 bytes
/// ```
/// </center>
)]
///
/// # Properties
///
/// Header (`H`) and footer (`F`) words hold the block size and an allocation
/// flag. Block sizes are multiples of [`ALIGNMENT`] and at least
/// [`MIN_BLOCK_SIZE`]. Payloads start at multiples of [`ALIGNMENT`] relative
/// to the start of the region.
///
/// No two free blocks are ever physically adjacent between calls.
///
/// # Examples
///
/// ```
/// use segfit::{Heap, VecRegion};
///
/// let mut heap = Heap::init(VecRegion::new()).unwrap();
///
/// let ptr = heap.allocate(12).unwrap();
/// heap.payload_mut(ptr)[..12].copy_from_slice(b"hello, world");
///
/// let ptr = heap.reallocate(Some(ptr), 5000).unwrap();
/// assert_eq!(&heap.payload(ptr)[..12], b"hello, world");
///
/// heap.free(ptr);
/// assert_eq!(heap.check(), Ok(()));
/// ```
#[derive(Debug)]
pub struct Heap<R> {
    arena: Arena<R>,
    index: FreeListIndex,
    config: HeapConfig,
}

/// An opaque handle to an allocated block, returned by [`Heap::allocate`] and
/// [`Heap::reallocate`].
///
/// A handle is only meaningful to the heap that produced it, and only until
/// it is freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockPtr(NonZeroUsize);

impl BlockPtr {
    /// Get the offset of the payload's first byte within the region.
    #[inline]
    pub fn offset(self) -> usize {
        self.0.get()
    }

    #[inline]
    fn from_block(block: usize) -> Option<Self> {
        NonZeroUsize::new(block + WORD_SIZE).map(Self)
    }

    /// Get the offset of the block header.
    #[inline]
    fn block(self) -> usize {
        self.0.get() - WORD_SIZE
    }
}

/// A block as seen by [`Heap::blocks`] and [`Heap::free_list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// The offset of the block header within the region.
    pub offset: usize,
    /// The size of the whole block, including the header and the footer.
    pub size: usize,
    pub allocated: bool,
}

impl BlockInfo {
    /// The offset of the payload, i.e., [`BlockPtr::offset`] if the block is
    /// allocated.
    #[inline]
    pub fn payload_offset(&self) -> usize {
        self.offset + WORD_SIZE
    }

    #[inline]
    pub fn usable_size(&self) -> usize {
        codec::usable_size(self.size)
    }
}

/// Occupancy figures of a [`Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// The length of the region, including the sentinel blocks.
    pub region_len: usize,
    /// The total size of free blocks, including their headers and footers.
    pub free_bytes: usize,
    pub free_blocks: usize,
    /// The total size of allocated blocks, including their headers and
    /// footers.
    pub allocated_bytes: usize,
    pub allocated_blocks: usize,
}

/// The error type returned by [`Heap::init`] and [`Heap::with_config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    /// A heap must be built on an empty region.
    #[error("the region already holds {len} bytes")]
    RegionNotEmpty { len: usize },
    /// The region could not supply the initial bytes.
    #[error("the region could not supply {requested} bytes")]
    Exhausted { requested: usize },
}

impl<R: Region> Heap<R> {
    /// Set up a heap on an empty region with the default configuration.
    ///
    /// This writes the sentinel blocks and grows the region by
    /// [`HeapConfig::chunk_size`] bytes to seed the free space.
    pub fn init(region: R) -> Result<Self, InitError> {
        Self::with_config(region, HeapConfig::INIT)
    }

    /// Set up a heap on an empty region with the specified configuration.
    pub fn with_config(region: R, config: HeapConfig) -> Result<Self, InitError> {
        if !region.is_empty() {
            return Err(InitError::RegionNotEmpty { len: region.len() });
        }

        let mut heap = Self {
            arena: Arena::new(region),
            index: FreeListIndex::INIT,
            config,
        };

        let start = heap.arena.grow(INITIAL_LEN).ok_or(InitError::Exhausted {
            requested: INITIAL_LEN,
        })?;
        debug_assert_eq!(start, 0);

        heap.arena.write_word(0, 0);
        heap.arena.set_tags(PROLOGUE, PROLOGUE_SIZE, true);
        heap.arena.write_word(FIRST_BLOCK, codec::encode(0, true));

        let chunk_size = heap.chunk_size();
        heap.extend(chunk_size)
            .ok_or(InitError::Exhausted {
                requested: chunk_size,
            })?;

        log::debug!("Heap::with_config({config:?}): {} bytes", heap.arena.len());
        heap.debug_check("init");
        Ok(heap)
    }

    /// Get the heap's configuration.
    #[inline]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Get a reference to the underlying region.
    #[inline]
    pub fn region(&self) -> &R {
        self.arena.region()
    }

    /// Tear down the heap, returning the underlying region.
    #[inline]
    pub fn into_region(self) -> R {
        self.arena.into_region()
    }

    /// [`HeapConfig::chunk_size`], made usable as a block size.
    #[inline]
    fn chunk_size(&self) -> usize {
        codec::align_up(self.config.chunk_size)
            .unwrap_or(MAX_BLOCK_SIZE)
            .clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE)
    }

    /// Attempt to allocate a block with at least `size` usable bytes.
    ///
    /// Returns `None` if `size` is zero or if the region cannot grow enough.
    /// A failed allocation leaves the heap unchanged.
    pub fn allocate(&mut self, size: usize) -> Option<BlockPtr> {
        let ptr = self.allocate_inner(size);
        log::trace!("Heap::allocate({size}) -> {ptr:?}");
        self.debug_check("allocate");
        ptr
    }

    fn allocate_inner(&mut self, size: usize) -> Option<BlockPtr> {
        if size == 0 {
            return None;
        }

        let size = codec::adjust(size)?;

        let block = match self.index.find_fit(&self.arena, size) {
            Some(block) => block,
            None => {
                self.extend(size.max(self.chunk_size()))?;
                self.index.find_fit(&self.arena, size)?
            }
        };

        self.index.remove(&mut self.arena, block);
        self.place(block, size);

        BlockPtr::from_block(block)
    }

    /// Turn the free block `block` into an allocated block of at least `size`
    /// bytes, returning any sizable remainder to the index.
    ///
    /// `block` must have been removed from the index.
    fn place(&mut self, block: usize, size: usize) {
        let block_size = self.arena.size(block);
        debug_assert!(block_size >= size);
        debug_assert!(!self.arena.is_allocated(block));

        let remainder = block_size - size;
        if remainder >= MIN_BLOCK_SIZE {
            self.arena.set_tags(block, size, true);

            let rest = block + size;
            self.arena.set_tags(rest, remainder, false);
            self.arena.clear_links(rest);
            self.index.insert(&mut self.arena, rest);

            log::trace!("split {block:#x} into {size} + {remainder} bytes");
        } else {
            // Too small to split
            self.arena.set_tags(block, block_size, true);
        }
    }

    /// Deallocate a previously allocated block.
    ///
    /// `ptr` must denote a block currently allocated from `self`. Freeing a
    /// block twice, or a handle from another heap, corrupts the heap
    /// (detected by [`Self::check`], not here).
    pub fn free(&mut self, ptr: BlockPtr) {
        log::trace!("Heap::free({ptr:?})");
        self.free_inner(ptr);
        self.debug_check("free");
    }

    fn free_inner(&mut self, ptr: BlockPtr) {
        let block = ptr.block();
        let (size, allocated) = self.arena.tag(block);
        debug_assert!(allocated, "{ptr:?} is not allocated");

        self.arena.set_tags(block, size, false);
        let block = self.coalesce(block);
        self.index.insert(&mut self.arena, block);
    }

    /// Merge the free block `block`, which is not in the index, with its
    /// physically adjacent free neighbors.
    ///
    /// Returns the merged block, whose links are cleared. The caller is
    /// responsible for inserting it into the index.
    fn coalesce(&mut self, block: usize) -> usize {
        let mut size = self.arena.size(block);
        let next = self.arena.next_phys(block);

        // The sentinels are allocated, so both neighbors always exist
        let prev_allocated = self.arena.is_prev_phys_allocated(block);
        let next_allocated = self.arena.is_allocated(next);

        let block = match (prev_allocated, next_allocated) {
            (true, true) => block,
            (true, false) => {
                self.index.remove(&mut self.arena, next);
                size += self.arena.size(next);
                log::trace!("merging {block:#x} with the next block {next:#x}");
                block
            }
            (false, true) => {
                let prev = self.arena.prev_phys(block);
                self.index.remove(&mut self.arena, prev);
                size += self.arena.size(prev);
                log::trace!("merging {block:#x} with the previous block {prev:#x}");
                prev
            }
            (false, false) => {
                let prev = self.arena.prev_phys(block);
                self.index.remove(&mut self.arena, prev);
                self.index.remove(&mut self.arena, next);
                size += self.arena.size(prev) + self.arena.size(next);
                log::trace!("merging {block:#x} with {prev:#x} and {next:#x}");
                prev
            }
        };

        self.arena.set_tags(block, size, false);
        self.arena.clear_links(block);
        block
    }

    /// Grow the region by at least `num_bytes` bytes and index the new space
    /// as a free block (merged with a free block at the old end, if any).
    ///
    /// Returns the header of the resulting free block. Nothing is modified
    /// if the region cannot grow.
    fn extend(&mut self, num_bytes: usize) -> Option<usize> {
        let size = codec::align_up(num_bytes)?.max(MIN_BLOCK_SIZE);
        let old_len = self.arena.len();

        if size > MAX_BLOCK_SIZE || old_len.checked_add(size).map_or(true, |x| x > MAX_REGION_LEN)
        {
            log::warn!("Heap::extend({num_bytes}): the region is at its maximum size");
            return None;
        }

        let Some(start) = self.arena.grow(size) else {
            log::warn!("Heap::extend({num_bytes}): the region refused to grow");
            return None;
        };
        debug_assert_eq!(start, old_len, "the region did not grow contiguously");
        log::debug!("Heap::extend({num_bytes}): the region is now {} bytes", old_len + size);

        // The old epilogue becomes the header of the new free block
        let block = start - WORD_SIZE;
        self.arena.set_tags(block, size, false);
        self.arena.write_word(block + size, codec::encode(0, true));

        let block = self.coalesce(block);
        self.index.insert(&mut self.arena, block);
        Some(block)
    }

    /// Shrink or grow a previously allocated block.
    ///
    ///  - `ptr == None` is equivalent to `allocate(size)`.
    ///  - `size == 0` frees the block and returns `None`.
    ///  - If the block is already large enough, `ptr` is returned as it is.
    ///  - If the physically following block is free and large enough, the
    ///    block absorbs it and `ptr` is returned.
    ///  - Otherwise, a new block with [`HeapConfig::realloc_slack`] extra
    ///    bytes is allocated, the contents are copied, and the old block is
    ///    freed.
    ///
    /// Returns `None` on exhaustion, in which case the original block is left
    /// intact.
    ///
    /// `ptr`, if any, must denote a block currently allocated from `self`.
    pub fn reallocate(&mut self, ptr: Option<BlockPtr>, size: usize) -> Option<BlockPtr> {
        let Some(ptr) = ptr else {
            return self.allocate(size);
        };

        if size == 0 {
            self.free(ptr);
            return None;
        }

        let new_ptr = self.reallocate_inner(ptr, size);
        log::trace!("Heap::reallocate({ptr:?}, {size}) -> {new_ptr:?}");
        self.debug_check("reallocate");
        new_ptr
    }

    fn reallocate_inner(&mut self, ptr: BlockPtr, size: usize) -> Option<BlockPtr> {
        let new_size = codec::adjust(size)?;
        let block = ptr.block();
        let old_size = self.arena.size(block);
        debug_assert!(self.arena.is_allocated(block), "{ptr:?} is not allocated");

        if old_size >= new_size {
            return Some(ptr);
        }

        // Try to grow into the next block
        let next = self.arena.next_phys(block);
        let (next_size, next_allocated) = self.arena.tag(next);
        if !next_allocated && old_size + next_size >= new_size {
            self.index.remove(&mut self.arena, next);
            self.arena.set_tags(block, old_size + next_size, true);
            log::trace!("grew {block:#x} in place to {} bytes", old_size + next_size);
            return Some(ptr);
        }

        // Move the block
        let new_ptr = self.allocate_inner(new_size.checked_add(self.config.realloc_slack)?)?;
        let len = codec::usable_size(old_size).min(size);
        self.arena
            .copy_within(ptr.offset()..ptr.offset() + len, new_ptr.offset());
        self.free_inner(ptr);

        Some(new_ptr)
    }

    /// Get the number of payload bytes available in an allocated block. This
    /// may exceed the size it was requested with.
    #[inline]
    pub fn usable_size(&self, ptr: BlockPtr) -> usize {
        codec::usable_size(self.arena.size(ptr.block()))
    }

    /// Get the payload of an allocated block.
    #[inline]
    pub fn payload(&self, ptr: BlockPtr) -> &[u8] {
        let start = ptr.offset();
        self.arena.bytes(start..start + self.usable_size(ptr))
    }

    /// Get the payload of an allocated block mutably.
    #[inline]
    pub fn payload_mut(&mut self, ptr: BlockPtr) -> &mut [u8] {
        let start = ptr.offset();
        let end = start + self.usable_size(ptr);
        self.arena.bytes_mut(start..end)
    }

    /// Iterate over all blocks in address order, excluding the sentinels.
    pub fn blocks(&self) -> Blocks<'_, R> {
        Blocks {
            arena: &self.arena,
            next: FIRST_BLOCK,
        }
    }

    /// Iterate over the free blocks in the specified bucket of the free-list
    /// index, in address order.
    ///
    /// # Panics
    ///
    /// This method panics if `bucket >= BUCKET_COUNT`.
    pub fn free_list(&self, bucket: usize) -> impl Iterator<Item = BlockInfo> + '_ {
        assert!(bucket < BUCKET_COUNT, "bucket {bucket} is out of range");
        self.index
            .free_list(&self.arena, bucket)
            .map(move |offset| {
                let (size, allocated) = self.arena.tag(offset);
                BlockInfo {
                    offset,
                    size,
                    allocated,
                }
            })
    }

    /// Calculate occupancy figures by walking the heap.
    pub fn stats(&self) -> HeapStats {
        self.blocks().fold(
            HeapStats {
                region_len: self.arena.len(),
                ..HeapStats::default()
            },
            |mut stats, block| {
                if block.allocated {
                    stats.allocated_bytes += block.size;
                    stats.allocated_blocks += 1;
                } else {
                    stats.free_bytes += block.size;
                    stats.free_blocks += 1;
                }
                stats
            },
        )
    }

    #[inline]
    fn debug_check(&self, operation: &str) {
        if !self.config.debug_checks {
            return;
        }
        if let Err(violation) = self.check() {
            log::error!("heap corrupted after {operation}: {violation}");
            panic!("heap corrupted after {operation}: {violation}");
        }
    }
}

/// An iterator over the blocks of a [`Heap`], returned by [`Heap::blocks`].
#[derive(Debug)]
pub struct Blocks<'a, R> {
    arena: &'a Arena<R>,
    next: usize,
}

impl<R: Region> Iterator for Blocks<'_, R> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if self.next + WORD_SIZE > self.arena.len() {
            return None;
        }

        let (size, allocated) = self.arena.tag(self.next);
        if size == 0 {
            // Reached the epilogue
            return None;
        }

        let block = BlockInfo {
            offset: self.next,
            size,
            allocated,
        };
        self.next += size;
        Some(block)
    }
}

const _: () = assert!((FIRST_BLOCK + WORD_SIZE) % ALIGNMENT == 0);

#[cfg(test)]
mod tests;
