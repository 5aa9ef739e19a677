//! Pooled allocator over a preallocated arena.

use super::allocator::contiguous_span;
use super::defaults::{
    AUDIO_SLOT_COUNT, AUDIO_SLOT_SIZE, DEFAULT_ALIGN_MASK, NETWORK_SLOT_COUNT, NETWORK_SLOT_SIZE,
    POOL_ARENA_ALIGN, VIDEO_SLOT_COUNT, video_frame_size,
};
use super::{
    Allocation, AllocationParams, Allocator, MemorySegment, MemoryType, Region, SlotBitmap, layout,
};
use crate::error::{Error, Result};
use crate::observability;
use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Source of default pool names.
static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(0);

/// Slot geometry of a [`PoolAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Usable bytes per slot; rounded up to the base alignment.
    pub slot_size: usize,
    /// Number of slots.
    pub slot_count: usize,
    /// Alignment mask every slot honours.
    pub base_align: usize,
}

impl PoolConfig {
    /// `slot_count` slots of `slot_size` bytes.
    pub fn new(slot_size: usize, slot_count: usize) -> Self {
        Self {
            slot_size,
            slot_count,
            base_align: DEFAULT_ALIGN_MASK,
        }
    }

    /// Set the base alignment mask.
    pub fn with_base_align(mut self, base_align: usize) -> Self {
        self.base_align = base_align;
        self
    }

    /// Raw video frames of the given geometry.
    pub fn video(width: usize, height: usize, bytes_per_pixel: usize) -> Self {
        Self::new(video_frame_size(width, height, bytes_per_pixel), VIDEO_SLOT_COUNT)
    }

    /// Audio chunks.
    pub fn audio() -> Self {
        Self::new(AUDIO_SLOT_SIZE, AUDIO_SLOT_COUNT)
    }

    /// Network payloads.
    pub fn network() -> Self {
        Self::new(NETWORK_SLOT_SIZE, NETWORK_SLOT_COUNT)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::network()
    }
}

struct PoolArena {
    name: String,
    base: NonNull<u8>,
    layout: Layout,
    stride: usize,
    base_align: usize,
    slots: SlotBitmap,
}

impl PoolArena {
    fn release(&self, index: usize) {
        let released = self.slots.release(index);
        debug_assert!(released, "pool slot {index} released twice");
        self.record_available();
    }

    fn record_available(&self) {
        observability::record_pool_available(&self.name, self.slots.count_free());
    }
}

impl Drop for PoolArena {
    fn drop(&mut self) {
        // SAFETY: base was allocated with exactly this layout; every slot
        // holds an Arc to the arena, so none are alive.
        unsafe { std::alloc::dealloc(self.base.as_ptr(), self.layout) };
    }
}

// SAFETY: the arena is plain bytes; slot ownership is arbitrated by the bitmap.
unsafe impl Send for PoolArena {}
// SAFETY: see above.
unsafe impl Sync for PoolArena {}

/// One claimed slot. Returns itself to the arena on drop.
struct PoolSlot {
    arena: Arc<PoolArena>,
    index: usize,
    data: NonNull<u8>,
    len: usize,
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.arena.release(self.index);
    }
}

// SAFETY: the slot is exclusively owned until dropped.
unsafe impl Send for PoolSlot {}
// SAFETY: access is arbitrated by the owning region's map lock.
unsafe impl Sync for PoolSlot {}

// SAFETY: data lies within the arena, which outlives the slot.
unsafe impl MemorySegment for PoolSlot {
    fn as_ptr(&self) -> NonNull<u8> {
        self.data
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// Allocator handing out fixed-size slots of one contiguous arena.
///
/// Allocation is lock-free; a slot returns to the pool when the region owning
/// it (and every share of it) is dropped. Copies go through the generic
/// map-and-copy path into another slot of the same pool.
///
/// # Example
///
/// ```rust
/// use parallax_alloc::memory::{AllocationParams, AllocatorRef, PoolAllocator, PoolConfig, Region};
/// use std::sync::Arc;
///
/// let pool: AllocatorRef = Arc::new(PoolAllocator::new(PoolConfig::new(4096, 4)).unwrap());
/// let region = Region::alloc(&pool, 1500, &AllocationParams::default()).unwrap();
/// assert_eq!(region.size(), 1500);
/// ```
pub struct PoolAllocator {
    arena: Arc<PoolArena>,
}

impl PoolAllocator {
    /// Allocate the arena, naming the pool `pool-<n>`.
    pub fn new(config: PoolConfig) -> Result<Self> {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        Self::named(format!("pool-{id}"), config)
    }

    /// Allocate the arena under `name`, which labels the pool's metrics.
    pub fn named(name: impl Into<String>, config: PoolConfig) -> Result<Self> {
        let name = name.into();
        if config.slot_size == 0 {
            return Err(Error::AllocationFailed("slot size must be > 0".into()));
        }
        if config.slot_count == 0 {
            return Err(Error::AllocationFailed("slot count must be > 0".into()));
        }
        if !layout::is_align_mask(config.base_align) {
            return Err(Error::AllocationFailed(format!(
                "alignment mask {:#x} is not a power of two minus one",
                config.base_align
            )));
        }

        let stride = config
            .slot_size
            .checked_add(config.base_align)
            .map(|size| size & !config.base_align)
            .ok_or(Error::OutOfMemory {
                requested: config.slot_size,
            })?;
        let total = stride
            .checked_mul(config.slot_count)
            .ok_or(Error::OutOfMemory {
                requested: usize::MAX,
            })?;
        let layout = Layout::from_size_align(total, POOL_ARENA_ALIGN.max(config.base_align + 1))
            .map_err(|e| Error::AllocationFailed(e.to_string()))?;

        // SAFETY: total is non-zero since stride and slot_count are.
        let base = unsafe { std::alloc::alloc(layout) };
        let base = NonNull::new(base).ok_or(Error::OutOfMemory { requested: total })?;

        tracing::debug!(%name, stride, slots = config.slot_count, "created pool arena");
        observability::record_pool_available(&name, config.slot_count);

        Ok(Self {
            arena: Arc::new(PoolArena {
                name,
                base,
                layout,
                stride,
                base_align: config.base_align,
                slots: SlotBitmap::new(config.slot_count),
            }),
        })
    }

    /// Name labelling this pool's metrics.
    pub fn name(&self) -> &str {
        &self.arena.name
    }

    /// Usable bytes per slot.
    pub fn slot_size(&self) -> usize {
        self.arena.stride
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.arena.slots.len()
    }

    /// Number of free slots. Snapshot only.
    pub fn available(&self) -> usize {
        self.arena.slots.count_free()
    }
}

impl Allocator for PoolAllocator {
    fn mem_type(&self) -> MemoryType {
        MemoryType::Pool
    }

    fn alloc(&self, size: usize, params: &AllocationParams) -> Result<Allocation> {
        assert!(
            layout::is_align_mask(params.align),
            "alignment mask {:#x} is not a power of two minus one",
            params.align
        );
        let arena = &self.arena;
        let maxsize = params.maxsize(size).ok_or(Error::OutOfMemory {
            requested: usize::MAX,
        })?;
        if maxsize > arena.stride {
            return Err(Error::AllocationTooLarge {
                requested: maxsize,
                capacity: arena.stride,
            });
        }

        let Some(index) = arena.slots.acquire() else {
            tracing::debug!(pool = %arena.name, capacity = arena.slots.len(), "pool exhausted");
            return Err(Error::PoolExhausted);
        };

        let align = params.align | arena.base_align;
        // SAFETY: index < slot_count, so the slot lies within the arena.
        let slot = unsafe { arena.base.add(index * arena.stride) };
        let adjust = layout::align_adjust(slot.as_ptr() as usize, align);
        if adjust + maxsize > arena.stride {
            arena.release(index);
            return Err(Error::AllocationTooLarge {
                requested: adjust + maxsize,
                capacity: arena.stride,
            });
        }

        let segment = PoolSlot {
            arena: Arc::clone(arena),
            index,
            // SAFETY: adjust + maxsize fits in the slot.
            data: unsafe { slot.add(adjust) },
            len: arena.stride - adjust,
        };
        // SAFETY: the slot was just claimed and prefix + size <= len.
        unsafe {
            layout::zero_fill(segment.data, segment.len, params.prefix, size, params.flags);
        }
        arena.record_available();

        Ok(Allocation::new(Box::new(segment), params.prefix, size)
            .with_flags(params.flags)
            .with_align(align))
    }

    fn is_span(&self, first: &Region, second: &Region) -> Option<usize> {
        contiguous_span(first, second)
    }
}

impl fmt::Debug for PoolAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("name", &self.name())
            .field("slot_size", &self.slot_size())
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}
