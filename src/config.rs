//! Heap tuning knobs

/// Provides a constant default value.
pub trait Init {
    /// `Self`'s default value.
    const INIT: Self;
}

/// Tuning parameters of a [`Heap`].
///
/// # Examples
///
/// ```
/// use segfit::{Heap, HeapConfig, VecRegion};
///
/// let config = HeapConfig::INIT
///     .with_chunk_size(1 << 16)
///     .with_debug_checks(true);
/// let heap = Heap::with_config(VecRegion::new(), config).unwrap();
/// assert!(heap.stats().free_bytes >= 1 << 16);
/// ```
///
/// [`Heap`]: crate::Heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// The minimum number of bytes requested from the region whenever the
    /// heap runs out of free space. Rounded up to the alignment unit.
    pub chunk_size: usize,
    /// The extra bytes requested when `reallocate` has to move a block, so
    /// that a block which keeps growing does not move on every call.
    pub realloc_slack: usize,
    /// Run [`Heap::check`] after every mutating operation and panic on the
    /// first violation.
    ///
    /// [`Heap::check`]: crate::Heap::check
    pub debug_checks: bool,
}

/// The default value of [`HeapConfig::chunk_size`].
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

/// The default value of [`HeapConfig::realloc_slack`].
pub const DEFAULT_REALLOC_SLACK: usize = 1 << 9;

impl Init for HeapConfig {
    const INIT: Self = Self::INIT;
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::INIT
    }
}

impl HeapConfig {
    /// The default configuration.
    pub const INIT: Self = Self {
        chunk_size: DEFAULT_CHUNK_SIZE,
        realloc_slack: DEFAULT_REALLOC_SLACK,
        debug_checks: cfg!(feature = "debug_checks"),
    };

    /// Replace [`Self::chunk_size`].
    pub const fn with_chunk_size(self, chunk_size: usize) -> Self {
        Self { chunk_size, ..self }
    }

    /// Replace [`Self::realloc_slack`].
    pub const fn with_realloc_slack(self, realloc_slack: usize) -> Self {
        Self {
            realloc_slack,
            ..self
        }
    }

    /// Replace [`Self::debug_checks`].
    pub const fn with_debug_checks(self, debug_checks: bool) -> Self {
        Self {
            debug_checks,
            ..self
        }
    }
}
