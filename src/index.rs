//! The segregated free-list index.
//!
//! Free blocks are kept in `BUCKET_COUNT` doubly linked lists, one per
//! power-of-two size range. The links live inside the free blocks themselves
//! (see [`Arena`]), and each list is ordered by ascending block offset.
use crate::{
    arena::Arena,
    codec::MIN_BLOCK_SIZE,
    config::Init,
    region::Region,
};

const MIN_BLOCK_SIZE_LOG2: u32 = MIN_BLOCK_SIZE.trailing_zeros();

/// The number of free lists. Enough to cover every size representable in a
/// tag word.
pub const BUCKET_COUNT: usize = (u32::BITS - MIN_BLOCK_SIZE_LOG2) as usize;

/// Find the free list to store a free block of the specified size.
///
/// Bucket `i` holds blocks whose size is in range
/// `MIN_BLOCK_SIZE << i..MIN_BLOCK_SIZE << (i + 1)`.
///
/// # Examples
///
/// ```
/// use segfit::{bucket_of, MIN_BLOCK_SIZE};
///
/// assert_eq!(bucket_of(MIN_BLOCK_SIZE), 0);
/// assert_eq!(bucket_of(MIN_BLOCK_SIZE * 2 - 8), 0);
/// assert_eq!(bucket_of(MIN_BLOCK_SIZE * 2), 1);
/// assert_eq!(bucket_of(4096), 8);
/// ```
#[inline]
pub fn bucket_of(size: usize) -> usize {
    debug_assert!(size >= MIN_BLOCK_SIZE);
    let log2 = usize::BITS - 1 - size.leading_zeros();
    (log2.saturating_sub(MIN_BLOCK_SIZE_LOG2) as usize).min(BUCKET_COUNT - 1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FreeListIndex {
    /// The header offset of the first block of each list.
    heads: [Option<usize>; BUCKET_COUNT],
}

impl Init for FreeListIndex {
    const INIT: Self = Self {
        heads: [None; BUCKET_COUNT],
    };
}

impl FreeListIndex {
    #[inline]
    pub fn head(&self, bucket: usize) -> Option<usize> {
        self.heads[bucket]
    }

    /// Iterate over the blocks of one free list.
    #[inline]
    pub fn free_list<'a, R: Region>(&self, arena: &'a Arena<R>, bucket: usize) -> FreeList<'a, R> {
        FreeList {
            arena,
            next: self.heads[bucket],
        }
    }

    /// Insert the specified free block into the list for its size, keeping
    /// the list in address order.
    ///
    /// `block` must not be in any list. Its link words are overwritten.
    pub fn insert<R: Region>(&mut self, arena: &mut Arena<R>, block: usize) {
        let bucket = bucket_of(arena.size(block));
        debug_assert!(!arena.is_allocated(block));

        let Some(first) = self.heads[bucket] else {
            arena.clear_links(block);
            self.heads[bucket] = Some(block);
            return;
        };

        debug_assert_ne!(first, block, "{block:#x} is already in bucket {bucket}");

        if block < first {
            arena.set_next_free(block, Some(first));
            arena.set_prev_free(block, None);
            arena.set_prev_free(first, Some(block));
            self.heads[bucket] = Some(block);
            return;
        }

        // Find the last block preceding `block`
        let mut prev = first;
        while let Some(next) = arena.next_free(prev) {
            debug_assert_ne!(next, block, "{block:#x} is already in bucket {bucket}");
            if next > block {
                break;
            }
            prev = next;
        }

        let next = arena.next_free(prev);
        arena.set_next_free(prev, Some(block));
        arena.set_prev_free(block, Some(prev));
        arena.set_next_free(block, next);
        if let Some(next) = next {
            arena.set_prev_free(next, Some(block));
        }
    }

    /// Remove the specified free block from its list and clear its links.
    ///
    /// The block's size must still be the one it was inserted with, and the
    /// block must currently be in a list.
    pub fn remove<R: Region>(&mut self, arena: &mut Arena<R>, block: usize) {
        let next = arena.next_free(block);
        let prev = arena.prev_free(block);

        if let Some(next) = next {
            arena.set_prev_free(next, prev);
        }

        if let Some(prev) = prev {
            arena.set_next_free(prev, next);
        } else {
            // No predecessor - `block` must be the head of its list
            let head = &mut self.heads[bucket_of(arena.size(block))];
            debug_assert_eq!(*head, Some(block));
            *head = next;
        }

        arena.clear_links(block);
    }

    /// Check if the specified block is in any list. This takes time
    /// proportional to the number of free blocks.
    pub fn contains<R: Region>(&self, arena: &Arena<R>, block: usize) -> bool {
        (0..BUCKET_COUNT).any(|bucket| self.free_list(arena, bucket).any(|x| x == block))
    }

    /// Find a free block at least `size` bytes large.
    ///
    /// The search starts at `size`'s own bucket, where the first sufficient
    /// block wins. Any block in a higher bucket is large enough, so the search
    /// never needs to look past the first block of a higher non-empty bucket.
    pub fn find_fit<R: Region>(&self, arena: &Arena<R>, size: usize) -> Option<usize> {
        let first_bucket = bucket_of(size);
        if let Some(block) = self
            .free_list(arena, first_bucket)
            .find(|&block| arena.size(block) >= size)
        {
            return Some(block);
        }

        self.heads[first_bucket + 1..].iter().find_map(|&head| head)
    }
}

/// An iterator over the header offsets of one free list, in address order.
#[derive(Debug)]
pub(crate) struct FreeList<'a, R> {
    arena: &'a Arena<R>,
    next: Option<usize>,
}

impl<R: Region> Iterator for FreeList<'_, R> {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        let block = self.next?;
        self.next = self.arena.next_free(block);
        Some(block)
    }
}
