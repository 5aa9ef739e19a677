//! Multi-threaded tests for mapping, sharing and release.

use parallax_alloc::memory::{
    AllocationParams, AllocatorRef, AllocatorRegistry, MapFlags, MapState, PoolAllocator,
    PoolConfig, Region,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 8;

#[test]
fn test_racing_write_maps_single_winner() {
    let registry = AllocatorRegistry::new();
    for _ in 0..50 {
        let region = registry.alloc(None, 64, &AllocationParams::default()).unwrap();
        let barrier = Arc::new(Barrier::new(THREADS));
        let winners = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let region = region.clone();
                let barrier = Arc::clone(&barrier);
                let winners = Arc::clone(&winners);
                let release = Arc::clone(&release);
                thread::spawn(move || {
                    barrier.wait();
                    let map = region.map(MapFlags::WRITE);
                    if map.is_ok() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                    // Hold the winning map until everyone has tried.
                    release.wait();
                    drop(map);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(region.map_state(), MapState::Unmapped);
    }
}

#[test]
fn test_concurrent_readers() {
    let registry = AllocatorRegistry::new();
    let region = registry.alloc(None, 256, &AllocationParams::default()).unwrap();
    region
        .map(MapFlags::WRITE)
        .unwrap()
        .as_mut_slice()
        .iter_mut()
        .enumerate()
        .for_each(|(i, b)| *b = i as u8);

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let region = region.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    let map = region.map(MapFlags::READ).unwrap();
                    assert_eq!(map[200], 200);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(region.map_state(), MapState::Unmapped);
}

#[test]
fn test_concurrent_share_and_drop() {
    let registry = AllocatorRegistry::new();
    let region = registry.alloc(None, 1024, &AllocationParams::default()).unwrap();
    region
        .map(MapFlags::WRITE)
        .unwrap()
        .as_mut_slice()
        .iter_mut()
        .enumerate()
        .for_each(|(i, b)| *b = (i % 251) as u8);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let region = region.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    let offset = (t * 97 + i) % 1000;
                    let share = region.share(offset, Some(16)).unwrap();
                    let nested = share.share(4, Some(4)).unwrap();
                    assert_eq!(
                        nested.map(MapFlags::READ).unwrap()[0],
                        ((offset + 4) % 251) as u8
                    );
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(region.share_count(), 0);
    assert_eq!(region.ref_count(), 1);
    assert!(region.map(MapFlags::WRITE).is_ok());
}

#[test]
fn test_last_share_dropped_on_another_thread_frees_once() {
    let pool = Arc::new(PoolAllocator::new(PoolConfig::new(128, 4)).unwrap());
    let allocator: AllocatorRef = pool.clone();

    for _ in 0..20 {
        let region = Region::alloc(&allocator, 64, &AllocationParams::default()).unwrap();
        let shares: Vec<_> = (0..THREADS)
            .map(|i| region.share(i * 8, Some(8)).unwrap())
            .collect();
        drop(region);
        assert_eq!(pool.available(), 3);

        let handles: Vec<_> = shares
            .into_iter()
            .map(|share| thread::spawn(move || drop(share)))
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.available(), 4);
    }
}

#[test]
fn test_pool_alloc_from_many_threads() {
    let pool = Arc::new(PoolAllocator::new(PoolConfig::new(256, 16)).unwrap());
    let allocator: AllocatorRef = pool.clone();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let allocator = Arc::clone(&allocator);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..500 {
                    let region =
                        Region::alloc(&allocator, 200, &AllocationParams::default()).unwrap();
                    let mut map = region.map(MapFlags::WRITE).unwrap();
                    map.as_mut_slice().fill(t as u8);
                    assert!(map.iter().all(|&b| b == t as u8));
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(pool.available(), 16);
}
