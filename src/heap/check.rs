//! Heap consistency checker
use super::{Heap, FIRST_BLOCK, INITIAL_LEN, PROLOGUE, PROLOGUE_SIZE};
use crate::{
    codec::{ALIGNMENT, MIN_BLOCK_SIZE, WORD_SIZE},
    index::{bucket_of, BUCKET_COUNT},
    region::Region,
};

/// A broken heap invariant, as reported by [`Heap::check`].
///
/// Offsets are block header offsets within the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("the prologue block is damaged")]
    BadPrologue,
    #[error("the epilogue at {0:#x} is damaged or not at the end of the region")]
    BadEpilogue(usize),
    #[error("block {offset:#x} has a malformed size {size}")]
    MalformedSize { offset: usize, size: usize },
    #[error("block {0:#x} extends past the end of the region")]
    BlockOutOfBounds(usize),
    #[error("the footer of block {0:#x} disagrees with its header")]
    HeaderFooterMismatch(usize),
    #[error("free block {0:#x} is missing from the free-list index")]
    FreeBlockNotIndexed(usize),
    #[error("allocated block {0:#x} is in the free-list index")]
    AllocatedBlockIndexed(usize),
    #[error("block {offset:#x} is in bucket {bucket}, which does not cover its size")]
    WrongBucket { offset: usize, bucket: usize },
    #[error("the `prev` link of block {0:#x} disagrees with its predecessor's `next` link")]
    LinkAsymmetry(usize),
    #[error("block {0:#x} breaks the address order of its free list")]
    UnorderedFreeList(usize),
    #[error("free block {0:#x} immediately follows another free block")]
    AdjacentFreeBlocks(usize),
    #[error("the free-list index holds {0:#x}, which is not a block header")]
    IndexedNonBlock(usize),
}

impl Violation {
    /// Get the offset of the offending block, if any.
    pub fn offset(&self) -> Option<usize> {
        match *self {
            Self::BadPrologue => None,
            Self::BadEpilogue(offset)
            | Self::MalformedSize { offset, .. }
            | Self::BlockOutOfBounds(offset)
            | Self::HeaderFooterMismatch(offset)
            | Self::FreeBlockNotIndexed(offset)
            | Self::AllocatedBlockIndexed(offset)
            | Self::WrongBucket { offset, .. }
            | Self::LinkAsymmetry(offset)
            | Self::UnorderedFreeList(offset)
            | Self::AdjacentFreeBlocks(offset)
            | Self::IndexedNonBlock(offset) => Some(offset),
        }
    }
}

#[inline]
fn is_well_formed(size: usize) -> bool {
    size >= MIN_BLOCK_SIZE && size % ALIGNMENT == 0
}

impl<R: Region> Heap<R> {
    /// Validate every structural invariant of the heap, reporting the first
    /// violation found.
    ///
    /// This walks every block and every free list, and takes time
    /// proportional to the number of blocks times the number of free blocks.
    /// It never modifies the heap and never panics, however badly the heap
    /// is corrupted.
    pub fn check(&self) -> Result<(), Violation> {
        let arena = &self.arena;
        let len = arena.len();

        if len < INITIAL_LEN
            || arena.tag(PROLOGUE) != (PROLOGUE_SIZE, true)
            || arena.footer_tag(PROLOGUE) != (PROLOGUE_SIZE, true)
        {
            return Err(Violation::BadPrologue);
        }

        // The free lists are validated first so that `contains` below walks
        // finite, in-bounds lists
        let indexed_blocks = self.check_free_lists()?;

        let mut block = FIRST_BLOCK;
        let mut prev_free = false;
        let mut free_blocks = 0;
        loop {
            if block + WORD_SIZE > len {
                return Err(Violation::BlockOutOfBounds(block));
            }

            let (size, allocated) = arena.tag(block);
            if size == 0 {
                if !allocated || block + WORD_SIZE != len {
                    return Err(Violation::BadEpilogue(block));
                }

                // Every free block is indexed, so any surplus entry points
                // into the middle of a block
                if free_blocks != indexed_blocks {
                    if let Some(violation) = self.find_stale_entry() {
                        return Err(violation);
                    }
                }
                return Ok(());
            }

            if !is_well_formed(size) {
                return Err(Violation::MalformedSize {
                    offset: block,
                    size,
                });
            }

            // There must be room for at least the epilogue after the block
            if size > len - WORD_SIZE - block {
                return Err(Violation::BlockOutOfBounds(block));
            }

            if arena.footer_tag(block) != (size, allocated) {
                return Err(Violation::HeaderFooterMismatch(block));
            }

            let indexed = self.index.contains(arena, block);
            if allocated {
                if indexed {
                    return Err(Violation::AllocatedBlockIndexed(block));
                }
            } else {
                if prev_free {
                    return Err(Violation::AdjacentFreeBlocks(block));
                }
                if !indexed {
                    return Err(Violation::FreeBlockNotIndexed(block));
                }
            }

            prev_free = !allocated;
            free_blocks += usize::from(!allocated);
            block += size;
        }
    }

    /// Validate every free list, returning the total number of entries.
    fn check_free_lists(&self) -> Result<usize, Violation> {
        let arena = &self.arena;
        let len = arena.len();
        let mut count = 0;

        for bucket in 0..BUCKET_COUNT {
            let mut prev = None;
            let mut cursor = self.index.head(bucket);

            while let Some(block) = cursor {
                // The header and both links must be readable
                if block < FIRST_BLOCK || block + MIN_BLOCK_SIZE > len {
                    return Err(Violation::BlockOutOfBounds(block));
                }

                // Strictly ascending, which also rules out cycles
                if prev.is_some_and(|prev| block <= prev) {
                    return Err(Violation::UnorderedFreeList(block));
                }

                if arena.prev_free(block) != prev {
                    return Err(Violation::LinkAsymmetry(block));
                }

                let (size, allocated) = arena.tag(block);
                if allocated {
                    return Err(Violation::AllocatedBlockIndexed(block));
                }
                if !is_well_formed(size) {
                    return Err(Violation::MalformedSize {
                        offset: block,
                        size,
                    });
                }
                if bucket_of(size) != bucket {
                    return Err(Violation::WrongBucket {
                        offset: block,
                        bucket,
                    });
                }

                prev = Some(block);
                cursor = arena.next_free(block);
                count += 1;
            }
        }

        Ok(count)
    }

    /// Find an index entry the physical walk never reaches. Requires the
    /// block chain to be intact.
    fn find_stale_entry(&self) -> Option<Violation> {
        (0..BUCKET_COUNT)
            .flat_map(|bucket| self.index.free_list(&self.arena, bucket))
            .find(|&entry| !self.blocks().any(|block| block.offset == entry))
            .map(Violation::IndexedNonBlock)
    }
}
