//! # Parallax Alloc
//!
//! Refcounted memory regions with pluggable allocators, the buffer memory
//! layer of the Parallax streaming engine.
//!
//! ## Features
//!
//! - **Windows into backing**: `offset`/`size` views over `maxsize` bytes,
//!   with prefix, padding and alignment control at allocation time
//! - **Zero-copy sharing**: read-only sub-views that keep the parent alive
//! - **Non-blocking mapping**: single writer or many readers, never waits
//! - **Pluggable allocators**: system heap, slot pool, or your own
//!   [`Allocator`](memory::Allocator) looked up by name in a registry
//!
//! ## Quick Start
//!
//! ```rust
//! use parallax_alloc::prelude::*;
//!
//! let registry = AllocatorRegistry::new();
//! let params = AllocationParams::new().with_prefix(16).with_align(63);
//! let region = registry.alloc(None, 1024, &params)?;
//!
//! {
//!     let mut map = region.map(MapFlags::WRITE)?;
//!     map.as_mut_slice().fill(0xab);
//! }
//!
//! let header = region.share(0, Some(16))?;
//! let body = region.share(16, None)?;
//! assert_eq!(header.is_span(&body), Some(0));
//! # Ok::<(), parallax_alloc::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod memory;
pub mod observability;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::memory::{
        AllocationParams, Allocator, AllocatorRef, AllocatorRegistry, MapFlags, MemoryType,
        PoolAllocator, PoolConfig, Region, RegionFlags, SystemAllocator,
    };
}

pub use error::{Error, Result};
