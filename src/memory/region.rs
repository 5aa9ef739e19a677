//! Refcounted byte regions.
//!
//! A [`Region`] is a cheap-to-clone handle describing a window
//! (`offset`/`size`) into backing bytes of `maxsize` length. Regions either own
//! their backing (created by an allocator or a wrap) or share the backing of a
//! parent region. Shares always point at the top-most owner, so the ownership
//! graph is at most one level deep:
//!
//! ```text
//!   share(0, 4) ──┐
//!   share(4, 4) ──┼──► parent ──► backing segment ──► allocator.free()
//!   share(2, 2) ──┘
//! ```
//!
//! Access to the bytes goes through [`Region::map`], which enforces the
//! single-writer / many-readers rule without ever blocking.

use super::allocator::resolve_size;
use super::{
    Allocation, AllocationParams, AllocatorRef, MapFlags, MapLock, MapState, MemorySegment,
    MemoryType, RegionFlags,
};
use crate::error::{Error, Result};
use crate::observability;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Callback run once when wrapped external memory is finally released.
pub type ReleaseNotify = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    offset: usize,
    size: usize,
}

enum Storage {
    /// Backing owned by this region, handed to `Allocator::free` on drop.
    Owned(ManuallyDrop<Box<dyn MemorySegment>>),
    /// View into the backing of the top-most parent.
    Shared(Region),
}

struct RegionInner {
    allocator: AllocatorRef,
    storage: Storage,
    maxsize: usize,
    align: usize,
    window: Mutex<Window>,
    flags: AtomicU32,
    lock: MapLock,
}

impl Drop for RegionInner {
    fn drop(&mut self) {
        match &mut self.storage {
            Storage::Owned(segment) => {
                // SAFETY: `drop` runs once and the segment is not touched again.
                let segment = unsafe { ManuallyDrop::take(segment) };
                let mem_type = self.allocator.mem_type();
                tracing::trace!(%mem_type, maxsize = self.maxsize, "releasing region");
                observability::record_region_freed(mem_type);
                self.allocator.free(segment);
            }
            Storage::Shared(parent) => parent.inner.lock.release_share(),
        }
    }
}

/// A refcounted handle to a window of backing bytes.
///
/// Cloning a `Region` adds a reference to the same region; it does not copy
/// bytes. Use [`copy`](Region::copy) for an independent duplicate and
/// [`share`](Region::share) for a read-only sub-view.
#[derive(Clone)]
pub struct Region {
    inner: Arc<RegionInner>,
}

impl Region {
    /// Allocate a region of `size` visible bytes from `allocator`.
    pub fn alloc(
        allocator: &AllocatorRef,
        size: usize,
        params: &AllocationParams,
    ) -> Result<Region> {
        match allocator.alloc(size, params) {
            Ok(allocation) => Ok(Self::from_allocation(Arc::clone(allocator), allocation)),
            Err(err) => {
                let mem_type = allocator.mem_type();
                tracing::debug!(%mem_type, size, error = %err, "allocation failed");
                observability::record_allocation_failure(mem_type);
                Err(err)
            }
        }
    }

    /// Build an owning region from an allocator's output.
    pub fn from_allocation(allocator: AllocatorRef, allocation: Allocation) -> Region {
        let Allocation {
            segment,
            flags,
            align,
            offset,
            size,
        } = allocation;
        let maxsize = segment.len();
        let mem_type = allocator.mem_type();
        tracing::trace!(%mem_type, offset, size, maxsize, "allocated region");
        observability::record_region_allocated(mem_type, maxsize);

        Region {
            inner: Arc::new(RegionInner {
                allocator,
                storage: Storage::Owned(ManuallyDrop::new(segment)),
                maxsize,
                align,
                window: Mutex::new(Window { offset, size }),
                flags: AtomicU32::new(flags.bits()),
                lock: MapLock::new(),
            }),
        }
    }

    /// Create a read-only view of `region` rooted at its top-most parent.
    pub(crate) fn new_shared(region: &Region, offset: usize, size: Option<usize>) -> Result<Region> {
        let parent = region.parent().unwrap_or(region);
        let window = region.window();
        let size = resolve_size(window.size, offset, size);
        // An empty share past the end starts at the end.
        let shared_offset = window
            .offset
            .checked_add(offset)
            .map(|start| if size == 0 { start.min(parent.inner.maxsize) } else { start })
            .filter(|start| start.checked_add(size).is_some_and(|end| end <= parent.inner.maxsize))
            .unwrap_or_else(|| {
                panic!(
                    "share of {size} bytes at offset {offset} exceeds region (offset {}, maxsize {})",
                    window.offset, parent.inner.maxsize
                )
            });

        if !parent.inner.lock.try_add_share() {
            return Err(Error::MapConflict {
                requested: MapFlags::READ,
                state: parent.inner.lock.state(),
                shares: parent.inner.lock.shares(),
            });
        }

        let mem_type = region.inner.allocator.mem_type();
        tracing::trace!(%mem_type, offset = shared_offset, size, "shared region");
        observability::record_region_shared(mem_type);

        Ok(Region {
            inner: Arc::new(RegionInner {
                allocator: Arc::clone(&region.inner.allocator),
                storage: Storage::Shared(parent.clone()),
                maxsize: parent.inner.maxsize,
                align: parent.inner.align,
                window: Mutex::new(Window {
                    offset: shared_offset,
                    size,
                }),
                flags: AtomicU32::new((parent.flags() | RegionFlags::READONLY).bits()),
                lock: MapLock::new(),
            }),
        })
    }

    fn lock_window(&self) -> MutexGuard<'_, Window> {
        self.inner
            .window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn window(&self) -> Window {
        *self.lock_window()
    }

    /// `(size, offset, maxsize)` of this region.
    pub fn sizes(&self) -> (usize, usize, usize) {
        let window = self.window();
        (window.size, window.offset, self.inner.maxsize)
    }

    /// Length of the visible data.
    pub fn size(&self) -> usize {
        self.window().size
    }

    /// Start of the visible data within the backing.
    pub fn offset(&self) -> usize {
        self.window().offset
    }

    /// Total bytes of backing.
    pub fn maxsize(&self) -> usize {
        self.inner.maxsize
    }

    /// Alignment mask honoured by the backing's base pointer.
    pub fn align(&self) -> usize {
        self.inner.align
    }

    /// Current flags.
    pub fn flags(&self) -> RegionFlags {
        RegionFlags::from_bits_retain(self.inner.flags.load(Ordering::Acquire))
    }

    fn clear_flags(&self, flags: RegionFlags) {
        self.inner.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// The region owning the backing, if this is a share.
    pub fn parent(&self) -> Option<&Region> {
        match &self.inner.storage {
            Storage::Owned(_) => None,
            Storage::Shared(parent) => Some(parent),
        }
    }

    /// The allocator this region came from.
    pub fn allocator(&self) -> &AllocatorRef {
        &self.inner.allocator
    }

    /// Kind of memory backing this region.
    pub fn mem_type(&self) -> MemoryType {
        self.inner.allocator.mem_type()
    }

    /// Whether this region's memory is of the given type.
    pub fn is_type(&self, mem_type: MemoryType) -> bool {
        self.mem_type() == mem_type
    }

    /// Number of live handles to this region, including those held by shares.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Current mapping state.
    pub fn map_state(&self) -> MapState {
        self.inner.lock.state()
    }

    /// Number of live shares rooted at this region.
    pub fn share_count(&self) -> u32 {
        self.inner.lock.shares()
    }

    /// Whether write maps are refused regardless of lock state.
    pub fn is_readonly(&self) -> bool {
        self.flags().contains(RegionFlags::READONLY) || self.parent().is_some()
    }

    /// Whether a write map could currently succeed: not read-only and not
    /// shared. This is a snapshot.
    pub fn is_writable(&self) -> bool {
        !self.is_readonly() && self.share_count() == 0
    }

    /// Whether both handles refer to the same region.
    pub fn ptr_eq(a: &Region, b: &Region) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Base pointer of the backing (offset 0, not the visible data).
    pub fn data_ptr(&self) -> NonNull<u8> {
        match &self.inner.storage {
            Storage::Owned(segment) => segment.as_ptr(),
            Storage::Shared(parent) => parent.data_ptr(),
        }
    }

    /// Map the region and return the raw mapping. Must be matched by exactly
    /// one [`unmap`](Self::unmap).
    ///
    /// Prefer [`map`](Self::map), which unmaps on drop.
    pub fn map_raw(&self, flags: MapFlags) -> Result<MapInfo> {
        if self.flags().contains(RegionFlags::NOT_MAPPABLE) {
            return Err(Error::NotMappable);
        }
        if flags.is_write() && self.is_readonly() {
            return Err(Error::ReadOnly);
        }
        if !self.inner.lock.try_lock(flags) {
            let mem_type = self.mem_type();
            tracing::trace!(%mem_type, ?flags, "map conflict");
            observability::record_map_conflict(mem_type);
            return Err(Error::MapConflict {
                requested: flags,
                state: self.inner.lock.state(),
                shares: self.inner.lock.shares(),
            });
        }

        let Some(base) = self.inner.allocator.map(self, flags) else {
            self.inner.lock.unlock();
            return Err(Error::MapFailed(self.mem_type().as_str()));
        };

        let window = self.window();
        Ok(MapInfo {
            // SAFETY: offset <= maxsize and base is valid for maxsize bytes.
            data: unsafe { base.add(window.offset) },
            size: window.size,
            maxsize: self.inner.maxsize - window.offset,
            flags,
        })
    }

    /// Release one outstanding map.
    ///
    /// # Panics
    ///
    /// Panics if the region has no outstanding map.
    pub fn unmap(&self) {
        assert!(
            self.map_state() != MapState::Unmapped,
            "unmap called on a region with no outstanding map"
        );
        self.inner.allocator.unmap(self);
        self.inner.lock.unlock();
    }

    /// Map the region, returning a guard that unmaps on drop.
    pub fn map(&self, flags: MapFlags) -> Result<RegionMap<'_>> {
        let info = self.map_raw(flags)?;
        Ok(RegionMap { region: self, info })
    }

    /// Move the visible window: the new offset is `offset + offset_delta`, the
    /// new size is `size`.
    ///
    /// Outstanding maps keep pointing at valid memory; the backing is never
    /// reallocated.
    ///
    /// # Panics
    ///
    /// Panics if the new offset would be negative or the window would extend
    /// past `maxsize`.
    pub fn resize(&self, offset_delta: isize, size: usize) {
        let maxsize = self.inner.maxsize;
        let mut window = self.lock_window();
        let offset = window
            .offset
            .checked_add_signed(offset_delta)
            .filter(|offset| offset.checked_add(size).is_some_and(|end| end <= maxsize))
            .unwrap_or_else(|| {
                panic!(
                    "resize by {offset_delta} to {size} bytes out of bounds (offset {}, maxsize {maxsize})",
                    window.offset
                )
            });

        // Bytes uncovered by a shrinking window may hold data now.
        if offset_delta > 0 {
            self.clear_flags(RegionFlags::ZERO_PREFIXED);
        }
        if offset + size < window.offset + window.size {
            self.clear_flags(RegionFlags::ZERO_PADDED);
        }
        *window = Window { offset, size };
    }

    /// Deep-copy `size` bytes (or the remainder when `None`) starting at
    /// `offset`, using this region's allocator.
    pub fn copy(&self, offset: usize, size: Option<usize>) -> Result<Region> {
        self.inner.allocator.copy(self, offset, size)
    }

    /// Create a read-only region sharing `size` bytes (or the remainder when
    /// `None`) starting at `offset`.
    ///
    /// The share always hangs off the top-most parent, so sharing a share
    /// does not build chains.
    pub fn share(&self, offset: usize, size: Option<usize>) -> Result<Region> {
        if self.flags().contains(RegionFlags::NO_SHARE) {
            return Err(Error::NotShareable);
        }
        self.inner.allocator.share(self, offset, size)
    }

    /// If `self` is immediately followed by `other` in a common parent,
    /// return the offset of `self` relative to the parent's window.
    pub fn is_span(&self, other: &Region) -> Option<usize> {
        let (parent, other_parent) = (self.parent()?, other.parent()?);
        if !Region::ptr_eq(parent, other_parent) {
            return None;
        }
        if !std::ptr::addr_eq(
            Arc::as_ptr(&self.inner.allocator),
            Arc::as_ptr(&other.inner.allocator),
        ) {
            return None;
        }
        self.inner.allocator.is_span(self, other)
    }

    /// Return a handle that can be write-mapped: `self` if it is the only,
    /// unshared handle to a writable region, otherwise a deep copy.
    pub fn make_writable(self) -> Result<Region> {
        if self.is_writable() && self.ref_count() == 1 {
            Ok(self)
        } else {
            self.copy(0, None)
        }
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let window = self.window();
        f.debug_struct("Region")
            .field("mem_type", &self.mem_type())
            .field("offset", &window.offset)
            .field("size", &window.size)
            .field("maxsize", &self.inner.maxsize)
            .field("align", &self.inner.align)
            .field("flags", &self.flags())
            .field("shared", &self.parent().is_some())
            .field("state", &self.map_state())
            .finish()
    }
}

/// Raw result of a map.
#[derive(Debug, Clone, Copy)]
pub struct MapInfo {
    /// Pointer to the first visible byte.
    pub data: NonNull<u8>,
    /// Visible bytes at `data`.
    pub size: usize,
    /// Bytes available from `data` to the end of the backing.
    pub maxsize: usize,
    /// Access granted.
    pub flags: MapFlags,
}

/// A mapped region. Unmaps when dropped.
pub struct RegionMap<'a> {
    region: &'a Region,
    info: MapInfo,
}

impl RegionMap<'_> {
    /// The raw mapping.
    pub fn info(&self) -> &MapInfo {
        &self.info
    }

    /// The mapped region.
    pub fn region(&self) -> &Region {
        self.region
    }

    /// Access granted by this map.
    pub fn flags(&self) -> MapFlags {
        self.info.flags
    }

    /// Visible bytes.
    pub fn len(&self) -> usize {
        self.info.size
    }

    /// Returns true if no bytes are visible.
    pub fn is_empty(&self) -> bool {
        self.info.size == 0
    }

    /// The visible bytes.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping lock excludes writers other than this map, and
        // the backing outlives the borrowed region.
        unsafe { std::slice::from_raw_parts(self.info.data.as_ptr(), self.info.size) }
    }

    /// The visible bytes, writable.
    ///
    /// # Panics
    ///
    /// Panics if the region was not mapped for writing.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        assert!(self.info.flags.is_write(), "region is mapped read-only");
        // SAFETY: this map holds the exclusive write lock.
        unsafe { std::slice::from_raw_parts_mut(self.info.data.as_ptr(), self.info.size) }
    }
}

impl Deref for RegionMap<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Drop for RegionMap<'_> {
    fn drop(&mut self) {
        self.region.unmap();
    }
}

impl fmt::Debug for RegionMap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionMap")
            .field("size", &self.info.size)
            .field("maxsize", &self.info.maxsize)
            .field("flags", &self.info.flags)
            .finish()
    }
}
