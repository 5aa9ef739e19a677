//! Refcounted memory regions and pluggable allocators.
//!
//! # Architecture
//!
//! - [`Region`]: refcounted window into backing bytes, with mapping, resizing,
//!   copying and zero-copy sharing
//! - [`Allocator`]: trait deciding how backing is produced, mapped, copied and
//!   shared; only `mem_type` and `alloc` are mandatory
//! - [`SystemAllocator`]: aligned heap blocks, also owns wrapped memory
//! - [`PoolAllocator`]: fixed-size slots from a preallocated arena
//! - [`AllocatorRegistry`]: named allocators plus a default
//! - [`MapLock`]: non-blocking single-writer / many-readers mapping lock
//!
//! # Example
//!
//! ```rust
//! use parallax_alloc::memory::{AllocationParams, AllocatorRegistry, MapFlags};
//!
//! let registry = AllocatorRegistry::new();
//! let region = registry.alloc(None, 8, &AllocationParams::default()).unwrap();
//! region.map(MapFlags::WRITE).unwrap().as_mut_slice().copy_from_slice(b"abcdefgh");
//!
//! // Zero-copy, read-only view of the last four bytes.
//! let tail = region.share(4, None).unwrap();
//! assert_eq!(&*tail.map(MapFlags::READ).unwrap(), b"efgh");
//! ```

mod allocator;
mod bitmap;
pub mod defaults;
mod flags;
pub mod layout;
mod lock;
mod pool;
mod region;
mod registry;
mod segment;
mod system;

pub use allocator::{
    Allocation, Allocator, AllocatorRef, contiguous_span, copy_via_map, share_view,
};
pub use bitmap::SlotBitmap;
pub use flags::{AllocationParams, MapFlags, RegionFlags};
pub use lock::{MapLock, MapState};
pub use pool::{PoolAllocator, PoolConfig};
pub use region::{MapInfo, Region, RegionMap, ReleaseNotify};
pub use registry::AllocatorRegistry;
pub use segment::{MemorySegment, MemoryType};
pub use system::SystemAllocator;
