//! The pluggable allocator interface.
//!
//! An allocator produces backing [`MemorySegment`]s and decides how regions
//! built on them are mapped, copied, shared and checked for adjacency. Only
//! `mem_type` and `alloc` are mandatory; every other hook has a generic
//! implementation that works for any allocator.

use super::{AllocationParams, MapFlags, MemorySegment, MemoryType, Region, RegionFlags, layout};
use crate::error::Result;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// Shared handle to an allocator.
pub type AllocatorRef = Arc<dyn Allocator>;

/// Freshly allocated backing plus the window and flags of the region to build.
pub struct Allocation {
    pub(crate) segment: Box<dyn MemorySegment>,
    pub(crate) flags: RegionFlags,
    pub(crate) align: usize,
    pub(crate) offset: usize,
    pub(crate) size: usize,
}

impl Allocation {
    /// Describe a region of `size` bytes at `offset` inside `segment`.
    ///
    /// # Panics
    ///
    /// Panics if `offset + size` exceeds the segment.
    pub fn new(segment: Box<dyn MemorySegment>, offset: usize, size: usize) -> Self {
        assert!(
            offset
                .checked_add(size)
                .is_some_and(|end| end <= segment.len()),
            "allocation window {offset}+{size} exceeds segment of {} bytes",
            segment.len()
        );
        Self {
            segment,
            flags: RegionFlags::empty(),
            align: 0,
            offset,
            size,
        }
    }

    /// Flags for the new region.
    pub fn with_flags(mut self, flags: RegionFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Alignment mask honoured by the segment's data pointer.
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
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("maxsize", &self.segment.len())
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("align", &self.align)
            .field("flags", &self.flags)
            .finish()
    }
}

/// A factory and strategy for regions.
///
/// Implementations must be thread-safe: regions are mapped, shared and
/// released from arbitrary threads.
pub trait Allocator: Send + Sync + fmt::Debug {
    /// Kind of memory produced by this allocator.
    fn mem_type(&self) -> MemoryType;

    /// Allocate backing for `size` visible bytes laid out per `params`.
    ///
    /// The returned window must start at `params.prefix` and leave at least
    /// `params.padding` bytes after it.
    fn alloc(&self, size: usize, params: &AllocationParams) -> Result<Allocation>;

    /// Release the backing of an owning region.
    ///
    /// Called exactly once, when the last handle to a region created by
    /// [`alloc`](Self::alloc) or a wrap is dropped. Never called for shares.
    fn free(&self, segment: Box<dyn MemorySegment>) {
        drop(segment);
    }

    /// Return the base pointer of the region's backing for the given access.
    ///
    /// The mapping lock is already held when this runs. Returning `None`
    /// fails the map.
    fn map(&self, region: &Region, flags: MapFlags) -> Option<NonNull<u8>> {
        let _ = flags;
        Some(region.data_ptr())
    }

    /// Undo [`map`](Self::map). Runs before the mapping lock is released.
    fn unmap(&self, region: &Region) {
        let _ = region;
    }

    /// Deep-copy `size` bytes (or the remainder when `None`) starting at
    /// `offset` into a new, independent region.
    fn copy(&self, region: &Region, offset: usize, size: Option<usize>) -> Result<Region> {
        copy_via_map(region, offset, size)
    }

    /// Create a read-only view sharing the region's backing.
    fn share(&self, region: &Region, offset: usize, size: Option<usize>) -> Result<Region> {
        share_view(region, offset, size)
    }

    /// If `first` and `second` are adjacent views of one parent, return the
    /// offset of `first` relative to the parent's window.
    ///
    /// Only called once both regions are known to share allocator and parent.
    fn is_span(&self, first: &Region, second: &Region) -> Option<usize> {
        let _ = (first, second);
        None
    }
}

/// Resolve an optional length against the bytes remaining after `offset`.
pub(crate) fn resolve_size(current: usize, offset: usize, size: Option<usize>) -> usize {
    size.unwrap_or_else(|| current.saturating_sub(offset))
}

/// Allocator-agnostic copy: map the source for reading, allocate a region of
/// the same alignment from the same allocator, map it for writing and copy.
pub fn copy_via_map(region: &Region, offset: usize, size: Option<usize>) -> Result<Region> {
    let source = region.map(MapFlags::READ)?;
    let size = resolve_size(source.len(), offset, size);
    if size > 0 {
        assert!(
            offset
                .checked_add(size)
                .is_some_and(|end| end <= source.len()),
            "copy of {size} bytes at offset {offset} exceeds region of {} bytes",
            source.len()
        );
    }

    let params = AllocationParams::new().with_align(region.align());
    let copy = Region::alloc(region.allocator(), size, &params)?;
    if size > 0 {
        let mut target = copy.map(MapFlags::WRITE)?;
        target
            .as_mut_slice()
            .copy_from_slice(&source[offset..offset + size]);
    }
    Ok(copy)
}

/// Allocator-agnostic share: a read-only region over the top-most parent's
/// backing at `region.offset + offset`.
pub fn share_view(region: &Region, offset: usize, size: Option<usize>) -> Result<Region> {
    Region::new_shared(region, offset, size)
}

/// Adjacency check for allocators whose shares all point into one contiguous
/// parent block.
pub fn contiguous_span(first: &Region, second: &Region) -> Option<usize> {
    let parent = first.parent()?;
    let (first_size, first_offset, _) = first.sizes();
    let (_, second_offset, _) = second.sizes();

    if first_offset + first_size != second_offset {
        return None;
    }
    // A parent resized past its child has no non-negative relative offset.
    first_offset.checked_sub(parent.offset())
}
