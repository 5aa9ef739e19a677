//! Lock-free slot occupancy bitmap.

use std::sync::atomic::{AtomicU64, Ordering};

const BITS: usize = u64::BITS as usize;

/// Tracks which pool slots are taken. One bit per slot, 1 = taken.
///
/// Bits past `len` in the last word are set at construction, so scans never
/// need a bounds check.
pub struct SlotBitmap {
    words: Box<[AtomicU64]>,
    len: usize,
}

impl SlotBitmap {
    /// Create a bitmap of `len` free slots.
    pub fn new(len: usize) -> Self {
        let words = (0..len.div_ceil(BITS))
            .map(|i| {
                let valid = (len - i * BITS).min(BITS);
                if valid == BITS {
                    AtomicU64::new(0)
                } else {
                    AtomicU64::new(!0 << valid)
                }
            })
            .collect();

        Self { words, len }
    }

    /// Claim the lowest free slot.
    pub fn acquire(&self) -> Option<usize> {
        for (i, word) in self.words.iter().enumerate() {
            let mut seen = word.load(Ordering::Relaxed);
            while seen != u64::MAX {
                let bit = (!seen).trailing_zeros() as usize;
                let mask = 1u64 << bit;
                let previous = word.fetch_or(mask, Ordering::AcqRel);
                if previous & mask == 0 {
                    return Some(i * BITS + bit);
                }
                // Lost the race for this bit; retry with the fresher value.
                seen = previous | mask;
            }
        }
        None
    }

    /// Free a slot. Returns `false` if it was not taken.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn release(&self, index: usize) -> bool {
        assert!(index < self.len, "slot {index} out of range ({})", self.len);
        let mask = 1u64 << (index % BITS);
        self.words[index / BITS].fetch_and(!mask, Ordering::AcqRel) & mask != 0
    }

    /// Whether a slot is taken. Snapshot only.
    pub fn is_taken(&self, index: usize) -> bool {
        index < self.len
            && self.words[index / BITS].load(Ordering::Relaxed) & (1u64 << (index % BITS)) != 0
    }

    /// Number of free slots. Snapshot only.
    pub fn count_free(&self) -> usize {
        self.words
            .iter()
            .map(|word| word.load(Ordering::Relaxed).count_zeros() as usize)
            .sum()
    }

    /// Total number of slots.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the bitmap tracks no slots.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
