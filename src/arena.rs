//! Word-level view of a heap region.
//!
//! This is the only place where block metadata and client payloads share
//! bytes. Everything above it addresses blocks by the offset of their header
//! word.
use core::ops::Range;

use crate::{
    codec::{self, WORD_SIZE},
    region::Region,
};

/// The offset of a block's `next` free-list link, relative to its header.
const NEXT_FREE: usize = WORD_SIZE;
/// The offset of a block's `prev` free-list link, relative to its header.
const PREV_FREE: usize = WORD_SIZE * 2;

#[derive(Debug)]
pub(crate) struct Arena<R> {
    region: R,
}

impl<R: Region> Arena<R> {
    #[inline]
    pub fn new(region: R) -> Self {
        Self { region }
    }

    #[inline]
    pub fn region(&self) -> &R {
        &self.region
    }

    #[inline]
    pub fn into_region(self) -> R {
        self.region
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.region.as_slice().len()
    }

    /// Extend the region. See [`Region::grow`].
    #[inline]
    pub fn grow(&mut self, num_bytes: usize) -> Option<usize> {
        self.region.grow(num_bytes)
    }

    #[inline]
    pub fn read_word(&self, offset: usize) -> u32 {
        let mut word = [0; WORD_SIZE];
        word.copy_from_slice(&self.region.as_slice()[offset..offset + WORD_SIZE]);
        u32::from_ne_bytes(word)
    }

    #[inline]
    pub fn write_word(&mut self, offset: usize, value: u32) {
        self.region.as_mut_slice()[offset..offset + WORD_SIZE]
            .copy_from_slice(&value.to_ne_bytes());
    }

    #[inline]
    pub fn bytes(&self, range: Range<usize>) -> &[u8] {
        &self.region.as_slice()[range]
    }

    #[inline]
    pub fn bytes_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        &mut self.region.as_mut_slice()[range]
    }

    #[inline]
    pub fn copy_within(&mut self, src: Range<usize>, dest: usize) {
        self.region.as_mut_slice().copy_within(src, dest);
    }

    /// Get the `(size, allocated)` pair stored in the header of `block`.
    #[inline]
    pub fn tag(&self, block: usize) -> (usize, bool) {
        codec::decode(self.read_word(block))
    }

    #[inline]
    pub fn size(&self, block: usize) -> usize {
        self.tag(block).0
    }

    #[inline]
    pub fn is_allocated(&self, block: usize) -> bool {
        self.tag(block).1
    }

    /// Get the `(size, allocated)` pair stored in the footer of `block`,
    /// locating the footer through the header's size.
    #[inline]
    pub fn footer_tag(&self, block: usize) -> (usize, bool) {
        codec::decode(self.read_word(block + self.size(block) - WORD_SIZE))
    }

    /// Write the header and the footer of a block spanning `block..block + size`.
    #[inline]
    pub fn set_tags(&mut self, block: usize, size: usize, allocated: bool) {
        let word = codec::encode(size, allocated);
        self.write_word(block, word);
        self.write_word(block + size - WORD_SIZE, word);
    }

    /// Get the header of the physically following block.
    #[inline]
    pub fn next_phys(&self, block: usize) -> usize {
        block + self.size(block)
    }

    /// Get the header of the physically preceding block, located through the
    /// footer word right before `block`.
    #[inline]
    pub fn prev_phys(&self, block: usize) -> usize {
        block - codec::decode(self.read_word(block - WORD_SIZE)).0
    }

    /// Get the allocation flag of the physically preceding block.
    #[inline]
    pub fn is_prev_phys_allocated(&self, block: usize) -> bool {
        codec::decode(self.read_word(block - WORD_SIZE)).1
    }

    #[inline]
    pub fn next_free(&self, block: usize) -> Option<usize> {
        self.read_link(block + NEXT_FREE)
    }

    #[inline]
    pub fn prev_free(&self, block: usize) -> Option<usize> {
        self.read_link(block + PREV_FREE)
    }

    #[inline]
    pub fn set_next_free(&mut self, block: usize, next: Option<usize>) {
        self.write_link(block + NEXT_FREE, next);
    }

    #[inline]
    pub fn set_prev_free(&mut self, block: usize, prev: Option<usize>) {
        self.write_link(block + PREV_FREE, prev);
    }

    #[inline]
    pub fn clear_links(&mut self, block: usize) {
        self.set_next_free(block, None);
        self.set_prev_free(block, None);
    }

    /// Offset 0 is the region's padding word and is never a block header,
    /// so it doubles as the null link.
    #[inline]
    fn read_link(&self, offset: usize) -> Option<usize> {
        Some(self.read_word(offset) as usize).filter(|&x| x != 0)
    }

    #[inline]
    fn write_link(&mut self, offset: usize, link: Option<usize>) {
        let link = link.unwrap_or(0);
        debug_assert!(link <= u32::MAX as usize);
        self.write_word(offset, link as u32);
    }
}
