//! Per-region mapping lock.
//!
//! The whole lock lives in one `AtomicU64`:
//!
//! ```text
//!  63        62 ........ 32   31 ......... 0
//! ┌────────┬───────────────┬───────────────┐
//! │ writer │  share count  │ reader count  │
//! └────────┴───────────────┴───────────────┘
//! ```
//!
//! A write map needs the whole word to be zero: no readers, no writer and no
//! live shares. Read maps only need the writer bit clear. Nothing here blocks;
//! a rejected transition simply reports failure.

use super::MapFlags;
use std::sync::atomic::{AtomicU64, Ordering};

const READER_ONE: u64 = 1;
const READER_MASK: u64 = 0xFFFF_FFFF;
const SHARE_ONE: u64 = 1 << 32;
const SHARE_MASK: u64 = 0x7FFF_FFFF << 32;
const WRITER: u64 = 1 << 63;

/// Snapshot of the mapping state of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapState {
    /// No outstanding maps.
    Unmapped,
    /// `n` outstanding read maps.
    Reading(u32),
    /// One outstanding write map.
    Writing,
}

/// Lock-free reader/writer state machine guarding map and unmap.
#[derive(Debug, Default)]
pub struct MapLock {
    state: AtomicU64,
}

impl MapLock {
    /// Create an unlocked state.
    pub const fn new() -> Self {
        Self {
            state: AtomicU64::new(0),
        }
    }

    /// Try to take the lock in the given mode.
    ///
    /// Returns `false` when the request conflicts with the current state.
    pub fn try_lock(&self, flags: MapFlags) -> bool {
        if flags.is_write() {
            return self
                .state
                .compare_exchange(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
                .is_ok();
        }

        self.state
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |state| {
                if state & WRITER != 0 || state & READER_MASK == READER_MASK {
                    None
                } else {
                    Some(state + READER_ONE)
                }
            })
            .is_ok()
    }

    /// Release one map. Returns the mode that was released.
    ///
    /// # Panics
    ///
    /// Panics if there is no outstanding map.
    pub fn unlock(&self) -> MapFlags {
        let previous = self
            .state
            .fetch_update(Ordering::Release, Ordering::Relaxed, |state| {
                if state & WRITER != 0 {
                    Some(state & !WRITER)
                } else if state & READER_MASK != 0 {
                    Some(state - READER_ONE)
                } else {
                    None
                }
            });

        match previous {
            Ok(state) if state & WRITER != 0 => MapFlags::WRITE,
            Ok(_) => MapFlags::READ,
            Err(_) => panic!("unmap called on a region with no outstanding map"),
        }
    }

    /// Register a live share. Fails while a write map is active.
    pub fn try_add_share(&self) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |state| {
                if state & WRITER != 0 || state & SHARE_MASK == SHARE_MASK {
                    None
                } else {
                    Some(state + SHARE_ONE)
                }
            })
            .is_ok()
    }

    /// Drop a share registered with [`try_add_share`](Self::try_add_share).
    pub fn release_share(&self) {
        let previous = self.state.fetch_sub(SHARE_ONE, Ordering::AcqRel);
        debug_assert!(previous & SHARE_MASK != 0, "share count underflow");
    }

    /// Current mapping state.
    pub fn state(&self) -> MapState {
        let state = self.state.load(Ordering::Acquire);
        if state & WRITER != 0 {
            MapState::Writing
        } else {
            match (state & READER_MASK) as u32 {
                0 => MapState::Unmapped,
                n => MapState::Reading(n),
            }
        }
    }

    /// Number of live shares.
    pub fn shares(&self) -> u32 {
        ((self.state.load(Ordering::Acquire) & SHARE_MASK) >> 32) as u32
    }
}
