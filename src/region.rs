//! Heap region providers
use alloc::vec::Vec;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod mmap;
        #[cfg_attr(feature = "doc_cfg", doc(cfg(unix)))]
        pub use self::mmap::MmapRegion;
    }
}

/// The largest region a [`Heap`] can manage. Block offsets must fit in a
/// free-list link word.
///
/// [`Heap`]: crate::Heap
pub const MAX_REGION_LEN: usize = u32::MAX as usize & !(crate::ALIGNMENT - 1);

/// A contiguous, append-only byte region backing a [`Heap`].
///
/// [`Heap`]: crate::Heap
pub trait Region {
    /// Extend the region by `num_bytes` bytes.
    ///
    /// Returns the offset of the first new byte, which must equal the
    /// region's length before the call. Existing bytes must neither move nor
    /// change. Returns `None` if the region cannot grow by that much, in
    /// which case the region must be left unchanged.
    fn grow(&mut self, num_bytes: usize) -> Option<usize>;

    /// Get the current contents of the region.
    fn as_slice(&self) -> &[u8];

    /// Get the current contents of the region mutably.
    fn as_mut_slice(&mut self) -> &mut [u8];

    /// Get the current length of the region.
    #[inline]
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Check if the region is empty.
    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R: Region + ?Sized> Region for &mut R {
    #[inline]
    fn grow(&mut self, num_bytes: usize) -> Option<usize> {
        (**self).grow(num_bytes)
    }

    #[inline]
    fn as_slice(&self) -> &[u8] {
        (**self).as_slice()
    }

    #[inline]
    fn as_mut_slice(&mut self) -> &mut [u8] {
        (**self).as_mut_slice()
    }
}

/// A [`Region`] backed by a `Vec<u8>`, optionally capped at a fixed number of
/// bytes.
///
/// # Examples
///
/// ```
/// use segfit::{Region, VecRegion};
///
/// let mut region = VecRegion::with_limit(64);
/// assert_eq!(region.grow(48), Some(0));
/// assert_eq!(region.grow(16), Some(48));
/// assert_eq!(region.grow(8), None);
/// assert_eq!(region.len(), 64);
/// ```
#[derive(Debug, Clone)]
pub struct VecRegion {
    bytes: Vec<u8>,
    limit: usize,
}

impl VecRegion {
    /// Construct an empty region that can grow up to [`MAX_REGION_LEN`] bytes.
    pub const fn new() -> Self {
        Self::with_limit(MAX_REGION_LEN)
    }

    /// Construct an empty region that refuses to grow beyond `limit` bytes.
    pub const fn with_limit(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
        }
    }

    /// Get the maximum length of the region.
    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for VecRegion {
    fn default() -> Self {
        Self::new()
    }
}

impl Region for VecRegion {
    fn grow(&mut self, num_bytes: usize) -> Option<usize> {
        let start = self.bytes.len();
        let new_len = start.checked_add(num_bytes).filter(|&x| x <= self.limit);
        let Some(new_len) = new_len else {
            log::debug!(
                "VecRegion::grow({num_bytes}): {start} bytes in use, limit is {}",
                self.limit
            );
            return None;
        };

        if self.bytes.try_reserve_exact(num_bytes).is_err() {
            log::debug!("VecRegion::grow({num_bytes}): backing allocation failed");
            return None;
        }
        self.bytes.resize(new_len, 0);
        Some(start)
    }

    #[inline]
    fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}
