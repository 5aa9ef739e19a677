//! Error types for parallax-alloc.
//!
//! Only recoverable failures live here. Contract violations (window bounds,
//! unmatched unmaps, malformed alignment masks) panic instead.

use crate::memory::{MapFlags, MapState};
use thiserror::Error;

/// Result type alias using parallax-alloc's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for allocator and region operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The backing allocation could not be satisfied.
    #[error("out of memory: could not allocate {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested (including prefix and padding).
        requested: usize,
    },

    /// Memory pool is exhausted (no slots available).
    #[error("memory pool exhausted: no slots available")]
    PoolExhausted,

    /// The request does not fit into a single pool slot.
    #[error("allocation of {requested} bytes does not fit a {capacity}-byte slot")]
    AllocationTooLarge {
        /// Bytes requested, including alignment adjustment.
        requested: usize,
        /// Usable bytes per slot.
        capacity: usize,
    },

    /// Allocator setup failed.
    #[error("memory allocation failed: {0}")]
    AllocationFailed(String),

    /// The mapping lock is held in a conflicting mode.
    #[error("cannot map {requested:?}: region is {state:?} with {shares} live shares")]
    MapConflict {
        /// The access that was requested.
        requested: MapFlags,
        /// Lock state observed when the request was rejected.
        state: MapState,
        /// Live shares observed when the request was rejected.
        shares: u32,
    },

    /// Write access was requested on a read-only region.
    #[error("region is read-only")]
    ReadOnly,

    /// The region carries the `NOT_MAPPABLE` flag.
    #[error("region is not mappable")]
    NotMappable,

    /// The allocator's map hook refused the request.
    #[error("allocator {0} failed to map region")]
    MapFailed(&'static str),

    /// The region carries the `NO_SHARE` flag.
    #[error("region cannot be shared")]
    NotShareable,

    /// No allocator is registered under the requested name.
    #[error("unknown allocator: {0}")]
    UnknownAllocator(String),
}
