use core::ptr::NonNull;

use super::{Region, MAX_REGION_LEN};

/// A [`Region`] backed by an anonymous memory mapping.
///
/// The whole address range is reserved up front as inaccessible memory.
/// Growing the region makes the covered pages readable and writable, so the
/// region never moves and untouched capacity costs no physical memory.
///
/// # Examples
///
/// ```
/// use segfit::{Heap, MmapRegion};
///
/// let region = MmapRegion::reserve(1 << 20).unwrap();
/// let mut heap = Heap::init(region).unwrap();
/// let ptr = heap.allocate(100).unwrap();
/// heap.payload_mut(ptr)[..5].copy_from_slice(b"hello");
/// assert_eq!(&heap.payload(ptr)[..5], b"hello");
/// heap.free(ptr);
/// ```
#[derive(Debug)]
pub struct MmapRegion {
    base: NonNull<u8>,
    /// The number of bytes handed out by `grow`.
    len: usize,
    /// The number of bytes currently accessible. A multiple of the page size.
    committed: usize,
    /// The size of the reservation. A multiple of the page size.
    reserved: usize,
    /// The memory page size minus 1.
    page_size_m1: usize,
}

// Safety: `MmapRegion` exclusively owns its mapping, and the mapping has no
//         thread affinity.
unsafe impl Send for MmapRegion {}

impl MmapRegion {
    /// Reserve address space for a region of up to `capacity` bytes.
    ///
    /// `capacity` is rounded up to the page size and capped at
    /// [`MAX_REGION_LEN`]. Returns `None` if the reservation fails.
    pub fn reserve(capacity: usize) -> Option<Self> {
        let page_size_m1 = page_size()? - 1;
        let reserved =
            capacity.min(MAX_REGION_LEN).checked_add(page_size_m1)? & !page_size_m1;
        if reserved == 0 {
            return None;
        }

        // Safety: An anonymous mapping at a kernel-chosen address does not
        //         alias anything we own.
        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                reserved,
                libc::PROT_NONE,
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            log::warn!("MmapRegion::reserve({capacity}): mmap failed");
            return None;
        }

        log::debug!("MmapRegion::reserve({capacity}) = {ptr:p} + {reserved:#x}");

        Some(Self {
            base: NonNull::new(ptr as *mut u8)?,
            len: 0,
            committed: 0,
            reserved,
            page_size_m1,
        })
    }

    /// Get the size of the reservation.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.reserved
    }
}

fn page_size() -> Option<usize> {
    // Safety: `sysconf` has no preconditions
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(page_size)
        .ok()
        .filter(|page_size| page_size.is_power_of_two())
}

impl Region for MmapRegion {
    fn grow(&mut self, num_bytes: usize) -> Option<usize> {
        let start = self.len;
        let new_len = start
            .checked_add(num_bytes)
            .filter(|&new_len| new_len <= self.reserved)?;

        if new_len > self.committed {
            // `reserved` is page-aligned, so this cannot exceed it
            let new_committed = (new_len + self.page_size_m1) & !self.page_size_m1;

            // Safety: `committed..new_committed` lies within our reservation
            let result = unsafe {
                libc::mprotect(
                    self.base.as_ptr().add(self.committed) as *mut libc::c_void,
                    new_committed - self.committed,
                    libc::PROT_READ | libc::PROT_WRITE,
                )
            };
            if result != 0 {
                log::warn!("MmapRegion::grow({num_bytes}): mprotect failed");
                return None;
            }

            self.committed = new_committed;
        }

        self.len = new_len;
        Some(start)
    }

    #[inline]
    fn as_slice(&self) -> &[u8] {
        // Safety: The first `len` bytes are committed and were zero-filled by
        //         the kernel. The mapping outlives `self`.
        unsafe { core::slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }

    #[inline]
    fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: See `as_slice`. `&mut self` guarantees exclusive access.
        unsafe { core::slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // Safety: We own the mapping, and no borrow of it can outlive `self`
        unsafe { libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.reserved) };
    }
}
