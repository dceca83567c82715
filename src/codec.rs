//! Boundary tag encoding and block layout constants.
//!
//! Every block starts with a header word and ends with a footer word holding
//! the same value: the block size with the allocation flag packed into its
//! lowest bit.

/// The size of a header, footer, or free-list link word.
pub const WORD_SIZE: usize = core::mem::size_of::<u32>();

/// The alignment unit. Block sizes and payload offsets are multiples of this.
pub const ALIGNMENT: usize = 8;

/// The minimum block size. A free block must hold a header, the `next` and
/// `prev` links, and a footer.
pub const MIN_BLOCK_SIZE: usize = WORD_SIZE * 4;

/// The number of bytes a block spends on its header and footer.
pub const OVERHEAD: usize = WORD_SIZE * 2;

/// The largest block size representable in a tag word.
pub const MAX_BLOCK_SIZE: usize = u32::MAX as usize & !(ALIGNMENT - 1);

/// The bit of a tag word indicating whether the block is allocated.
const TAG_ALLOCATED: u32 = 1;
/// The bits of a tag word indicating the block's size.
const TAG_SIZE_MASK: u32 = !(ALIGNMENT as u32 - 1);

/// Pack a block size and its allocation flag into a tag word.
///
/// `size` must be a multiple of [`ALIGNMENT`] no larger than
/// [`MAX_BLOCK_SIZE`].
#[inline]
pub fn encode(size: usize, allocated: bool) -> u32 {
    debug_assert_eq!(size % ALIGNMENT, 0, "unaligned block size {}", size);
    debug_assert!(size <= MAX_BLOCK_SIZE, "block size {} overflows a tag", size);
    size as u32 | (allocated as u32 * TAG_ALLOCATED)
}

/// Unpack a tag word into `(size, allocated)`.
#[inline]
pub fn decode(word: u32) -> (usize, bool) {
    ((word & TAG_SIZE_MASK) as usize, (word & TAG_ALLOCATED) != 0)
}

/// Calculate the block size needed to serve a payload of `request` bytes.
///
/// Returns `None` if the block would not be representable.
#[inline]
pub fn adjust(request: usize) -> Option<usize> {
    let size = if request <= ALIGNMENT {
        MIN_BLOCK_SIZE
    } else {
        request.checked_add(OVERHEAD + ALIGNMENT - 1)? & !(ALIGNMENT - 1)
    };
    Some(size).filter(|&size| size <= MAX_BLOCK_SIZE)
}

/// The number of payload bytes a block of `size` bytes provides.
#[inline]
pub fn usable_size(size: usize) -> usize {
    size - OVERHEAD
}

/// Round `x` up to the next multiple of [`ALIGNMENT`].
#[inline]
pub(crate) fn align_up(x: usize) -> Option<usize> {
    Some(x.checked_add(ALIGNMENT - 1)? & !(ALIGNMENT - 1))
}
