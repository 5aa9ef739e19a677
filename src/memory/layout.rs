//! Alignment and prefix/padding arithmetic for allocator blocks.
//!
//! A block is laid out as:
//!
//! ```text
//! block start
//! │ adjust │ prefix │      size       │ padding │ slack │
//!          ▲        ▲                                    ▲
//!          data     data + offset               data + maxsize
//! ```
//!
//! `adjust` moves the data pointer to the first address satisfying the
//! alignment mask. Whatever slack the block had beyond `adjust` is reported as
//! part of the region's `maxsize`.

use super::RegionFlags;
use std::alloc::Layout;
use std::ptr::NonNull;

/// Whether `mask + 1` is a power of two.
#[inline]
pub fn is_align_mask(mask: usize) -> bool {
    mask.checked_add(1).is_some_and(usize::is_power_of_two)
}

/// Bytes to skip from `addr` to reach the next address aligned to `mask + 1`.
#[inline]
pub fn align_adjust(addr: usize, mask: usize) -> usize {
    match addr & mask {
        0 => 0,
        rem => mask + 1 - rem,
    }
}

/// Size and alignment of a raw block able to hold `maxsize` aligned bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    /// Layout handed to the global allocator.
    pub layout: Layout,
    /// Effective alignment mask of the data pointer.
    pub align: usize,
}

impl BlockLayout {
    /// Compute the block needed for `maxsize` bytes aligned to
    /// `align | base_align`.
    ///
    /// Blocks themselves are aligned to `base_align + 1`, so only the part of
    /// the mask above the base alignment needs slack. Returns `None` when the
    /// size overflows.
    pub fn new(maxsize: usize, align: usize, base_align: usize) -> Option<Self> {
        debug_assert!(is_align_mask(base_align));
        let align = align | base_align;
        let slack = align & !base_align;
        let size = maxsize.checked_add(slack)?.max(1);
        let layout = Layout::from_size_align(size, base_align + 1).ok()?;
        Some(Self { layout, align })
    }

    /// Total bytes of the block.
    #[inline]
    pub fn size(&self) -> usize {
        self.layout.size()
    }
}

/// Zero the prefix and/or padding of a freshly created block.
///
/// # Safety
///
/// `data` must be valid for writes of `maxsize` bytes and
/// `offset + size <= maxsize` must hold.
pub unsafe fn zero_fill(
    data: NonNull<u8>,
    maxsize: usize,
    offset: usize,
    size: usize,
    flags: RegionFlags,
) {
    debug_assert!(offset + size <= maxsize);
    if offset > 0 && flags.contains(RegionFlags::ZERO_PREFIXED) {
        // SAFETY: [0, offset) lies within the block.
        unsafe { std::ptr::write_bytes(data.as_ptr(), 0, offset) };
    }
    let padding = maxsize - offset - size;
    if padding > 0 && flags.contains(RegionFlags::ZERO_PADDED) {
        // SAFETY: [offset + size, maxsize) lies within the block.
        unsafe { std::ptr::write_bytes(data.as_ptr().add(offset + size), 0, padding) };
    }
}
