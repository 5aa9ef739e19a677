//! The system allocator and wrapped external memory.

use super::allocator::{contiguous_span, resolve_size};
use super::defaults::DEFAULT_ALIGN_MASK;
use super::layout::{self, BlockLayout};
use super::{
    Allocation, AllocationParams, Allocator, AllocatorRef, MapFlags, MemorySegment, MemoryType,
    Region, RegionFlags, ReleaseNotify,
};
use crate::error::{Error, Result};
use std::any::Any;
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

/// One aligned heap block per region.
///
/// The block is sized for `maxsize` plus enough slack to move the data
/// pointer up to the requested alignment. Slack left over after alignment is
/// handed to the region as extra `maxsize`.
struct SystemBlock {
    /// Start of the raw block, as returned by the global allocator.
    block: NonNull<u8>,
    layout: std::alloc::Layout,
    /// First aligned byte within the block.
    data: NonNull<u8>,
    len: usize,
}

impl SystemBlock {
    fn allocate(block: BlockLayout) -> Result<Self> {
        // SAFETY: BlockLayout never produces a zero-sized layout.
        let raw = unsafe { std::alloc::alloc(block.layout) };
        let raw = NonNull::new(raw).ok_or(Error::OutOfMemory {
            requested: block.size(),
        })?;

        let adjust = layout::align_adjust(raw.as_ptr() as usize, block.align);
        debug_assert!(adjust <= block.size());
        Ok(Self {
            block: raw,
            layout: block.layout,
            // SAFETY: adjust never exceeds the slack reserved in the block.
            data: unsafe { raw.add(adjust) },
            len: block.size() - adjust,
        })
    }
}

impl Drop for SystemBlock {
    fn drop(&mut self) {
        // SAFETY: block was allocated with exactly this layout.
        unsafe { std::alloc::dealloc(self.block.as_ptr(), self.layout) };
    }
}

// SAFETY: the block is plain bytes exclusively owned by this value.
unsafe impl Send for SystemBlock {}
// SAFETY: access to the bytes is arbitrated by the owning region's map lock.
unsafe impl Sync for SystemBlock {}

// SAFETY: data stays valid for len bytes until the block is dropped.
unsafe impl MemorySegment for SystemBlock {
    fn as_ptr(&self) -> NonNull<u8> {
        self.data
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// Memory owned by someone else, released through a notification.
struct WrappedSegment {
    data: NonNull<u8>,
    len: usize,
    notify: Option<ReleaseNotify>,
    /// Keeps an owned buffer alive; dropped after `notify` runs.
    _owner: Option<Box<dyn Any + Send>>,
}

impl Drop for WrappedSegment {
    fn drop(&mut self) {
        if let Some(notify) = self.notify.take() {
            notify();
        }
    }
}

// SAFETY: the pointer is only dereferenced through regions, and the owner is
// only touched on drop.
unsafe impl Send for WrappedSegment {}
// SAFETY: see above; the owner is never accessed through a shared reference.
unsafe impl Sync for WrappedSegment {}

// SAFETY: the wrap contract requires data to stay valid until the notify runs.
unsafe impl MemorySegment for WrappedSegment {
    fn as_ptr(&self) -> NonNull<u8> {
        self.data
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// Allocator backed by the global heap.
///
/// Every allocation is a single block aligned to at least
/// `base_align + 1` bytes. This allocator also owns all wrapped memory.
///
/// # Example
///
/// ```rust
/// use parallax_alloc::memory::{AllocationParams, MapFlags, Region, SystemAllocator};
///
/// let region = Region::alloc(&SystemAllocator::shared(), 1024, &AllocationParams::default()).unwrap();
/// assert_eq!(region.size(), 1024);
/// region.map(MapFlags::WRITE).unwrap().as_mut_slice()[..5].copy_from_slice(b"hello");
/// ```
#[derive(Debug)]
pub struct SystemAllocator {
    base_align: usize,
}

impl SystemAllocator {
    /// Create a system allocator with the default base alignment.
    pub fn new() -> Self {
        Self::with_base_align(DEFAULT_ALIGN_MASK)
    }

    /// Create a system allocator that always aligns to `base_align + 1`.
    ///
    /// # Panics
    ///
    /// Panics if `base_align + 1` is not a power of two.
    pub fn with_base_align(base_align: usize) -> Self {
        assert!(
            layout::is_align_mask(base_align),
            "alignment mask {base_align:#x} is not a power of two minus one"
        );
        Self { base_align }
    }

    /// The process-wide system allocator.
    ///
    /// Wrapped regions belong to this instance, and every registry registers it
    /// as `"SystemMemory"`.
    pub fn shared() -> AllocatorRef {
        static SYSTEM: OnceLock<AllocatorRef> = OnceLock::new();
        Arc::clone(SYSTEM.get_or_init(|| Arc::new(SystemAllocator::new())))
    }

    /// Alignment mask applied to every allocation.
    pub fn base_align(&self) -> usize {
        self.base_align
    }
}

impl Default for SystemAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for SystemAllocator {
    fn mem_type(&self) -> MemoryType {
        MemoryType::System
    }

    fn alloc(&self, size: usize, params: &AllocationParams) -> Result<Allocation> {
        assert!(
            layout::is_align_mask(params.align),
            "alignment mask {:#x} is not a power of two minus one",
            params.align
        );
        let maxsize = params.maxsize(size).ok_or(Error::OutOfMemory {
            requested: usize::MAX,
        })?;
        let block = BlockLayout::new(maxsize, params.align, self.base_align)
            .ok_or(Error::OutOfMemory { requested: maxsize })?;
        let segment = SystemBlock::allocate(block)?;

        // SAFETY: the segment is freshly allocated and prefix + size <= len.
        unsafe {
            layout::zero_fill(segment.data, segment.len, params.prefix, size, params.flags);
        }

        Ok(Allocation::new(Box::new(segment), params.prefix, size)
            .with_flags(params.flags)
            .with_align(block.align))
    }

    /// Copy the whole backing block so the copy keeps the source's layout
    /// (offset, alignment and surrounding bytes).
    fn copy(&self, region: &Region, offset: usize, size: Option<usize>) -> Result<Region> {
        let source = region.map(MapFlags::READ)?;
        let (current, region_offset, maxsize) = region.sizes();
        let size = resolve_size(current, offset, size);
        // An empty copy past the end starts at the end.
        let copy_offset = region_offset
            .checked_add(offset)
            .map(|start| if size == 0 { start.min(maxsize) } else { start })
            .filter(|start| start.checked_add(size).is_some_and(|end| end <= maxsize))
            .unwrap_or_else(|| {
                panic!("copy of {size} bytes at offset {offset} exceeds region (offset {region_offset}, maxsize {maxsize})")
            });

        let block = BlockLayout::new(maxsize, region.align(), self.base_align)
            .ok_or(Error::OutOfMemory { requested: maxsize })?;
        let segment = SystemBlock::allocate(block)?;
        // SAFETY: the source backing is valid for maxsize bytes and read-locked;
        // the new block holds at least maxsize bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(
                region.data_ptr().as_ptr(),
                segment.data.as_ptr(),
                maxsize,
            );
        }
        drop(source);

        Ok(Region::from_allocation(
            Arc::clone(region.allocator()),
            Allocation::new(Box::new(segment), copy_offset, size).with_align(block.align),
        ))
    }

    fn is_span(&self, first: &Region, second: &Region) -> Option<usize> {
        contiguous_span(first, second)
    }
}

impl Region {
    /// Wrap external memory in a region owned by the system allocator.
    ///
    /// `notify` runs exactly once, after this region and every share of it
    /// have been dropped. `ZERO_PREFIXED` / `ZERO_PADDED` zero the bytes
    /// outside the window immediately, unless `flags` contains `READONLY`.
    ///
    /// # Safety
    ///
    /// `data` must be valid for reads (and writes, unless `READONLY` is set)
    /// of `maxsize` bytes until `notify` runs, and must not be accessed by
    /// anyone else in a way that conflicts with region maps.
    ///
    /// # Panics
    ///
    /// Panics if `offset + size > maxsize`.
    pub unsafe fn wrap(
        flags: RegionFlags,
        data: NonNull<u8>,
        maxsize: usize,
        offset: usize,
        size: usize,
        notify: Option<ReleaseNotify>,
    ) -> Region {
        // SAFETY: forwarded from the caller.
        unsafe { Self::wrap_segment(flags, data, maxsize, offset, size, notify, None) }
    }

    /// Wrap an owned buffer. The buffer is dropped after `notify` runs.
    ///
    /// # Panics
    ///
    /// Panics if `offset + size` exceeds the buffer.
    pub fn wrap_owned<T>(
        flags: RegionFlags,
        data: T,
        offset: usize,
        size: usize,
        notify: Option<ReleaseNotify>,
    ) -> Region
    where
        T: AsMut<[u8]> + Send + 'static,
    {
        let mut owner = Box::new(data);
        let bytes: &mut [u8] = (*owner).as_mut();
        let maxsize = bytes.len();
        let ptr = NonNull::from(bytes).cast::<u8>();
        // SAFETY: the boxed buffer is kept alive by the segment and never
        // accessed other than through the region.
        unsafe {
            Self::wrap_segment(
                flags,
                ptr,
                maxsize,
                offset,
                size,
                notify,
                Some(owner as Box<dyn Any + Send>),
            )
        }
    }

    /// Wrap an immutable buffer. The region is always read-only and zero-fill
    /// flags are ignored.
    ///
    /// # Panics
    ///
    /// Panics if `offset + size` exceeds the buffer.
    pub fn wrap_readonly<T>(
        flags: RegionFlags,
        data: T,
        offset: usize,
        size: usize,
        notify: Option<ReleaseNotify>,
    ) -> Region
    where
        T: AsRef<[u8]> + Send + 'static,
    {
        let owner = Box::new(data);
        let bytes: &[u8] = (*owner).as_ref();
        let maxsize = bytes.len();
        let ptr = NonNull::from(bytes).cast::<u8>();
        let flags = (flags | RegionFlags::READONLY)
            - (RegionFlags::ZERO_PREFIXED | RegionFlags::ZERO_PADDED);
        // SAFETY: READONLY guarantees the pointer is never written through.
        unsafe {
            Self::wrap_segment(
                flags,
                ptr,
                maxsize,
                offset,
                size,
                notify,
                Some(owner as Box<dyn Any + Send>),
            )
        }
    }

    unsafe fn wrap_segment(
        flags: RegionFlags,
        data: NonNull<u8>,
        maxsize: usize,
        offset: usize,
        size: usize,
        notify: Option<ReleaseNotify>,
        owner: Option<Box<dyn Any + Send>>,
    ) -> Region {
        assert!(
            offset.checked_add(size).is_some_and(|end| end <= maxsize),
            "wrap window {offset}+{size} exceeds {maxsize} bytes"
        );
        if !flags.contains(RegionFlags::READONLY) {
            // SAFETY: the caller guarantees data is writable for maxsize bytes.
            unsafe { layout::zero_fill(data, maxsize, offset, size, flags) };
        }

        let segment = WrappedSegment {
            data,
            len: maxsize,
            notify,
            _owner: owner,
        };
        Region::from_allocation(
            SystemAllocator::shared(),
            Allocation::new(Box::new(segment), offset, size).with_flags(flags),
        )
    }
}
