//! Integration tests for region allocation, mapping, sharing and copying.
//!
//! These tests go through the public API only, using isolated registries.

use parallax_alloc::memory::{
    AllocationParams, AllocatorRegistry, MapFlags, MapState, Region, RegionFlags,
};
use parallax_alloc::Error;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn filled(registry: &AllocatorRegistry, bytes: &[u8]) -> Region {
    let region = registry
        .alloc(None, bytes.len(), &AllocationParams::default())
        .unwrap();
    region
        .map(MapFlags::WRITE)
        .unwrap()
        .as_mut_slice()
        .copy_from_slice(bytes);
    region
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

// ============================================================================
// Allocation
// ============================================================================

#[test]
fn test_alloc_any_size_is_mappable() {
    let registry = AllocatorRegistry::new();
    for size in [0, 1, 2, 3, 8, 63, 64, 65, 1000, 4096, 65537] {
        let region = registry
            .alloc(None, size, &AllocationParams::default())
            .unwrap();
        let (s, offset, maxsize) = region.sizes();
        assert_eq!(s, size);
        assert_eq!(offset, 0);
        assert!(maxsize >= size);

        let mut map = region.map(MapFlags::WRITE).unwrap();
        assert_eq!(map.len(), size);
        // Every byte of the mapping must be writable.
        map.as_mut_slice().fill(0x5a);
        assert!(map.iter().all(|&b| b == 0x5a));
    }
}

#[test]
fn test_alloc_honours_prefix_padding_and_alignment() {
    let registry = AllocatorRegistry::new();
    let params = AllocationParams::new()
        .with_align(127)
        .with_prefix(24)
        .with_padding(40);
    let region = registry.alloc(None, 100, &params).unwrap();

    let (size, offset, maxsize) = region.sizes();
    assert_eq!((size, offset), (100, 24));
    assert!(maxsize >= 164);
    assert_eq!(region.data_ptr().as_ptr() as usize & 127, 0);
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_four_byte_share_scenario() {
    let registry = AllocatorRegistry::new();
    let m = registry.alloc(None, 4, &AllocationParams::default()).unwrap();
    {
        let mut map = m.map(MapFlags::WRITE).unwrap();
        map.as_mut_slice().copy_from_slice(&[0, 0, 0, 0]);
    }

    let read = m.map(MapFlags::READ).unwrap();
    let middle = m.share(1, Some(2)).unwrap();
    assert_eq!(middle.size(), 2);
    assert_eq!(&*middle.map(MapFlags::READ).unwrap(), &read[1..3]);

    let head = m.share(0, Some(1)).unwrap();
    let tail = m.share(1, Some(2)).unwrap();
    assert_eq!(head.is_span(&tail), Some(0));
    drop(read);
}

#[test]
#[should_panic(expected = "out of bounds")]
fn test_resize_past_maxsize_is_fatal() {
    let registry = AllocatorRegistry::new();
    let mem100 = registry
        .alloc(None, 100, &AllocationParams::default())
        .unwrap();
    mem100.resize(200, 50);
}

#[test]
fn test_wrap_zero_prefixed_reads_zero() {
    let region = Region::wrap_owned(
        RegionFlags::ZERO_PREFIXED,
        vec![0xffu8; 16],
        4,
        8,
        None,
    );
    assert_eq!(region.sizes(), (8, 4, 16));

    region.resize(-4, 12);
    let map = region.map(MapFlags::READ).unwrap();
    assert_eq!(&map[..4], &[0, 0, 0, 0]);
    assert!(map[4..].iter().all(|&b| b == 0xff));
}

#[test]
fn test_wrap_raw_pointer_notifies_after_last_share() {
    let mut backing = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
    let released = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&released);

    // SAFETY: `backing` outlives every region built on it and is not touched
    // until the notification has run.
    let region = unsafe {
        Region::wrap(
            RegionFlags::empty(),
            NonNull::new(backing.as_mut_ptr()).unwrap(),
            backing.len(),
            2,
            4,
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        )
    };
    assert_eq!(&*region.map(MapFlags::READ).unwrap(), &[3, 4, 5, 6]);

    let share = region.share(1, Some(2)).unwrap();
    drop(region);
    assert_eq!(released.load(Ordering::SeqCst), 0);
    assert_eq!(&*share.map(MapFlags::READ).unwrap(), &[4, 5]);

    drop(share);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    backing[0] = 0;
    assert_eq!(backing[0], 0);
}

#[test]
fn test_wrap_readonly_refuses_writes() {
    let region = Region::wrap_readonly(RegionFlags::empty(), b"static bytes", 0, 6, None);
    assert!(region.is_readonly());
    assert_eq!(region.map(MapFlags::WRITE).unwrap_err(), Error::ReadOnly);
    assert_eq!(&*region.map(MapFlags::READ).unwrap(), b"static");
}

// ============================================================================
// Sharing
// ============================================================================

#[test]
fn test_share_of_share_resolves_to_owner() {
    let registry = AllocatorRegistry::new();
    let m = filled(&registry, &pattern(32));

    let first = m.share(4, Some(20)).unwrap();
    let second = first.share(3, Some(10)).unwrap();
    let third = second.share(2, None).unwrap();

    for share in [&first, &second, &third] {
        let parent = share.parent().unwrap();
        assert!(Region::ptr_eq(parent, &m));
        assert!(parent.parent().is_none());
    }
    assert_eq!(third.offset(), 9);
    assert_eq!(third.size(), 8);
    assert_eq!(m.share_count(), 3);
}

#[test]
fn test_share_preserves_bytes() {
    let registry = AllocatorRegistry::new();
    let bytes = pattern(64);
    let m = filled(&registry, &bytes);

    for (k, n) in [(0, 64), (0, 1), (10, 20), (63, 1), (64, 0), (5, 0)] {
        let share = m.share(k, Some(n)).unwrap();
        assert_eq!(&*share.map(MapFlags::READ).unwrap(), &bytes[k..k + n]);
    }
}

#[test]
fn test_share_remainder() {
    let registry = AllocatorRegistry::new();
    let bytes = pattern(16);
    let m = filled(&registry, &bytes);
    let share = m.share(6, None).unwrap();
    assert_eq!(share.size(), 10);
    assert_eq!(&*share.map(MapFlags::READ).unwrap(), &bytes[6..]);
}

#[test]
fn test_share_remainder_past_end_is_empty() {
    let registry = AllocatorRegistry::new();
    let m = filled(&registry, &pattern(16));
    for offset in [16, m.maxsize(), m.maxsize() + 8] {
        let share = m.share(offset, None).unwrap();
        assert_eq!(share.size(), 0, "offset {offset}");
        assert!(share.offset() <= m.maxsize());
        assert!(share.map(MapFlags::READ).unwrap().is_empty());
    }
}

#[test]
#[should_panic(expected = "exceeds region")]
fn test_share_past_maxsize_panics() {
    let registry = AllocatorRegistry::new();
    let m = registry.alloc(None, 8, &AllocationParams::default()).unwrap();
    let _ = m.share(4, Some(m.maxsize()));
}

#[test]
fn test_shares_block_parent_writes_until_dropped() {
    let registry = AllocatorRegistry::new();
    let m = filled(&registry, &[1, 2, 3, 4]);
    let share = m.share(0, Some(2)).unwrap();

    assert!(matches!(
        m.map(MapFlags::WRITE),
        Err(Error::MapConflict { shares: 1, .. })
    ));
    // Reading is still fine.
    assert_eq!(&*m.map(MapFlags::READ).unwrap(), &[1, 2, 3, 4]);

    drop(share);
    m.map(MapFlags::WRITE).unwrap().as_mut_slice()[0] = 9;
    assert_eq!(m.map(MapFlags::READ).unwrap()[0], 9);
}

// ============================================================================
// Spans
// ============================================================================

#[test]
fn test_every_split_point_is_a_span() {
    let registry = AllocatorRegistry::new();
    let n = 24;
    let m = filled(&registry, &pattern(n));

    for k in 0..=n {
        let head = m.share(0, Some(k)).unwrap();
        let tail = m.share(k, Some(n - k)).unwrap();
        assert_eq!(head.is_span(&tail), Some(0), "split at {k}");
        if k > 0 && k < n {
            assert_eq!(tail.is_span(&head), None, "reversed split at {k}");
        }
    }
}

#[test]
fn test_span_offset_is_relative_to_parent_window() {
    let registry = AllocatorRegistry::new();
    let m = registry
        .alloc(None, 32, &AllocationParams::new().with_prefix(8))
        .unwrap();
    let a = m.share(4, Some(6)).unwrap();
    let b = m.share(10, Some(2)).unwrap();
    assert_eq!(a.is_span(&b), Some(4));
}

#[test]
fn test_parent_never_spans_its_child() {
    let registry = AllocatorRegistry::new();
    let m = filled(&registry, &pattern(8));
    for k in 0..=8 {
        let child = m.share(0, Some(k)).unwrap();
        assert_eq!(m.is_span(&child), None);
        assert_eq!(child.is_span(&m), None);
    }
}

#[test]
fn test_shares_of_different_parents_do_not_span() {
    let registry = AllocatorRegistry::new();
    let a = filled(&registry, &pattern(8));
    let b = filled(&registry, &pattern(8));
    let head = a.share(0, Some(4)).unwrap();
    let tail = b.share(4, Some(4)).unwrap();
    assert_eq!(head.is_span(&tail), None);
}

#[test]
fn test_gap_is_not_a_span() {
    let registry = AllocatorRegistry::new();
    let m = filled(&registry, &pattern(8));
    let head = m.share(0, Some(3)).unwrap();
    let tail = m.share(4, Some(4)).unwrap();
    assert_eq!(head.is_span(&tail), None);
}

// ============================================================================
// Resize
// ============================================================================

#[test]
fn test_resize_identity() {
    let registry = AllocatorRegistry::new();
    let params = AllocationParams::new().with_prefix(5).with_padding(7);
    let m = registry.alloc(None, 20, &params).unwrap();
    let before = m.sizes();
    m.resize(0, m.size());
    assert_eq!(m.sizes(), before);
}

#[test]
fn test_resize_keeps_active_map_valid() {
    let registry = AllocatorRegistry::new();
    let m = filled(&registry, &pattern(16));
    let info = m.map_raw(MapFlags::READ).unwrap();

    m.resize(4, 8);
    // SAFETY: the backing is never reallocated while the map is held.
    let byte = unsafe { *info.data.as_ptr().add(5) };
    assert_eq!(byte, pattern(16)[5]);
    m.unmap();

    assert_eq!(&*m.map(MapFlags::READ).unwrap(), &pattern(16)[4..12]);
}

// ============================================================================
// Copy
// ============================================================================

#[test]
fn test_copy_round_trip() {
    let registry = AllocatorRegistry::new();
    let bytes = pattern(100);
    let m = filled(&registry, &bytes);

    let copy = m.copy(0, None).unwrap();
    assert!(!Region::ptr_eq(&m, &copy));
    assert_eq!(copy.ref_count(), 1);
    assert_eq!(m.ref_count(), 1);
    assert_eq!(&*copy.map(MapFlags::READ).unwrap(), &*m.map(MapFlags::READ).unwrap());

    // Writing the copy leaves the original untouched.
    copy.map(MapFlags::WRITE).unwrap().as_mut_slice()[0] ^= 0xff;
    assert_eq!(m.map(MapFlags::READ).unwrap()[0], bytes[0]);
}

#[test]
fn test_copy_remainder_past_end_is_empty() {
    let registry = AllocatorRegistry::new();
    let m = filled(&registry, &pattern(16));
    for offset in [16, m.maxsize(), m.maxsize() + 8] {
        let copy = m.copy(offset, None).unwrap();
        assert_eq!(copy.size(), 0, "offset {offset}");
        assert!(copy.map(MapFlags::READ).unwrap().is_empty());
    }

    let share = m.share(4, Some(8)).unwrap();
    let copy = share.copy(m.maxsize() + 8, None).unwrap();
    assert_eq!(copy.size(), 0);
}

#[test]
fn test_default_params_carry_no_flags() {
    assert_eq!(AllocationParams::default().flags, RegionFlags::default());
    assert!(RegionFlags::default().is_empty());
}

#[test]
fn test_copy_of_readonly_is_writable() {
    let source = Region::wrap_readonly(RegionFlags::empty(), vec![4u8, 5, 6], 0, 3, None);
    let copy = source.copy(0, None).unwrap();
    assert!(copy.is_writable());
    copy.map(MapFlags::WRITE).unwrap().as_mut_slice()[1] = 0;
    assert_eq!(&*copy.map(MapFlags::READ).unwrap(), &[4, 0, 6]);
    assert_eq!(&*source.map(MapFlags::READ).unwrap(), &[4, 5, 6]);
}

#[test]
fn test_copy_of_share_is_independent() {
    let registry = AllocatorRegistry::new();
    let bytes = pattern(12);
    let m = filled(&registry, &bytes);
    let share = m.share(3, Some(6)).unwrap();

    let copy = share.copy(1, Some(4)).unwrap();
    assert!(copy.parent().is_none());
    assert_eq!(&*copy.map(MapFlags::READ).unwrap(), &bytes[4..8]);
    assert_eq!(m.share_count(), 1);
}

// ============================================================================
// Mapping
// ============================================================================

#[test]
fn test_readers_stack_and_writer_waits_for_all() {
    let registry = AllocatorRegistry::new();
    let m = registry.alloc(None, 8, &AllocationParams::default()).unwrap();

    let r1 = m.map(MapFlags::READ).unwrap();
    let r2 = m.map(MapFlags::READ).unwrap();
    assert_eq!(m.map_state(), MapState::Reading(2));
    assert!(m.map(MapFlags::WRITE).is_err());

    drop(r1);
    assert!(m.map(MapFlags::WRITE).is_err());
    drop(r2);
    assert!(m.map(MapFlags::READWRITE).is_ok());
    assert_eq!(m.map_state(), MapState::Unmapped);
}

#[test]
fn test_raw_map_unmap_pairs() {
    let registry = AllocatorRegistry::new();
    let m = registry.alloc(None, 8, &AllocationParams::default()).unwrap();
    let info = m.map_raw(MapFlags::WRITE).unwrap();
    assert_eq!(info.size, 8);
    assert_eq!(info.flags, MapFlags::WRITE);
    assert_eq!(m.map_state(), MapState::Writing);
    m.unmap();
    assert_eq!(m.map_state(), MapState::Unmapped);
}

#[test]
fn test_make_writable() {
    let registry = AllocatorRegistry::new();
    let m = filled(&registry, &[1, 2, 3]);
    let share = m.share(0, None).unwrap();

    // The parent is shared, so a copy comes back.
    let writable = m.clone().make_writable().unwrap();
    assert!(!Region::ptr_eq(&writable, &m));
    writable.map(MapFlags::WRITE).unwrap().as_mut_slice()[0] = 7;
    assert_eq!(&*share.map(MapFlags::READ).unwrap(), &[1, 2, 3]);

    // Once alone, the handle itself is returned.
    drop(share);
    let ptr = m.data_ptr();
    let same = m.make_writable().unwrap();
    assert_eq!(same.data_ptr(), ptr);
}
