//! Region flags, map modes and allocation parameters.

use super::layout;

bitflags::bitflags! {
    /// Behavioural and informational bits carried by a [`Region`](super::Region).
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RegionFlags: u32 {
        /// The region can never be mapped for writing.
        const READONLY = 1 << 0;
        /// The region cannot be shared.
        const NO_SHARE = 1 << 1;
        /// Bytes before `offset` are zero.
        const ZERO_PREFIXED = 1 << 2;
        /// Bytes after `offset + size` are zero.
        const ZERO_PADDED = 1 << 3;
        /// The backing memory is physically contiguous.
        const PHYSICALLY_CONTIGUOUS = 1 << 4;
        /// The region cannot be mapped at all.
        const NOT_MAPPABLE = 1 << 5;
    }
}

bitflags::bitflags! {
    /// Access mode requested by [`Region::map`](super::Region::map).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapFlags: u32 {
        /// Read access.
        const READ = 1 << 0;
        /// Write access.
        const WRITE = 1 << 1;
        /// Read and write access.
        const READWRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl MapFlags {
    /// Whether this mode needs exclusive access.
    #[inline]
    pub fn is_write(self) -> bool {
        self.contains(MapFlags::WRITE)
    }
}

/// Parameters controlling the layout of a fresh allocation.
///
/// `align` is a mask: the effective boundary is `align + 1`, so `0` means "no
/// alignment beyond what the allocator always provides" and `63` requests a
/// 64-byte boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationParams {
    /// Flags copied onto the new region. `ZERO_PREFIXED` and `ZERO_PADDED`
    /// additionally request zero filling.
    pub flags: RegionFlags,
    /// Alignment mask (power of two minus one).
    pub align: usize,
    /// Bytes reserved before the visible data.
    pub prefix: usize,
    /// Bytes reserved after the visible data.
    pub padding: usize,
}

impl AllocationParams {
    /// Create neutral parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flags.
    pub fn with_flags(mut self, flags: RegionFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the alignment mask.
    ///
    /// # Panics
    ///
    /// Panics if `align + 1` is not a power of two.
    pub fn with_align(mut self, align: usize) -> Self {
        assert!(
            layout::is_align_mask(align),
            "alignment mask {align:#x} is not a power of two minus one"
        );
        self.align = align;
        self
    }

    /// Set the prefix length.
    pub fn with_prefix(mut self, prefix: usize) -> Self {
        self.prefix = prefix;
        self
    }

    /// Set the padding length.
    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    /// `size + prefix + padding`, or `None` on overflow.
    pub fn maxsize(&self, size: usize) -> Option<usize> {
        size.checked_add(self.prefix)?.checked_add(self.padding)
    }
}
