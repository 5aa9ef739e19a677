//! Backing storage trait and memory type tags.

use std::ptr::NonNull;

/// Kind of memory an allocator hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryType {
    /// Aligned blocks from the global heap, including wrapped external memory.
    System,
    /// Fixed-size slots carved out of a preallocated arena.
    Pool,
    /// Memory from an allocator living outside this crate.
    Custom(&'static str),
}

impl MemoryType {
    /// Stable string tag, used for metrics labels and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::System => "SystemMemory",
            MemoryType::Pool => "PoolMemory",
            MemoryType::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contiguous backing bytes owned by a region.
///
/// The allocator decides what the backing is (a heap block, a pool slot,
/// someone else's buffer). Dropping the segment releases it.
///
/// # Safety
///
/// Implementations must ensure that:
/// - `as_ptr` stays valid for `len` bytes until the segment is dropped
/// - the pointer never moves while the segment is alive
/// - the memory may be written through the pointer unless the owning region is
///   read-only
pub unsafe trait MemorySegment: Send + Sync {
    /// Pointer to the first usable byte.
    fn as_ptr(&self) -> NonNull<u8>;

    /// Number of usable bytes.
    fn len(&self) -> usize;

    /// Returns true if the segment has zero length.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
