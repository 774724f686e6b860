//! Integration tests for `block_pool`.
//!
//! These tests drive the public API the way an application would: a pool over a region,
//! slots handed out and returned, payloads written through the translated offsets.

use std::collections::HashSet;
use std::ptr::NonNull;
use std::thread;

use block_pool::{
    BlockPool, BlockingLock, Error, HeaderWidth, Region, atomic_region, atomic_region_from_raw,
};

#[test]
fn reference_scenario() {
    let pool = BlockPool::new(4096, 64).unwrap();
    let region = atomic_region(pool.total_size());

    assert_eq!(pool.header_width(), HeaderWidth::Bits16);
    assert_eq!(pool.stride(), 66);

    for expected in 0..11 {
        assert_eq!(pool.allocate(&*region).unwrap(), expected);
    }

    pool.release(&*region, 9).unwrap();
    assert_eq!(pool.allocate(&*region).unwrap(), 9);

    pool.release(&*region, 9).unwrap();
    pool.release(&*region, 3).unwrap();
    assert_eq!(pool.allocate(&*region).unwrap(), 3);

    pool.release(&*region, 5).unwrap();
    pool.release(&*region, 4).unwrap();
    assert_eq!(pool.allocate(&*region).unwrap(), 4);

    let stats = pool.check_integrity(&*region).unwrap();
    assert_eq!(stats.allocated_slots(), 11);
    assert_eq!(stats.used_slots(), 9);
    assert_eq!(stats.free_slots(), 2);

    // Slots 9 and 5 remain on the free list, most recently released first.
    assert_eq!(stats.free_head(), Some(5));
    assert_eq!(pool.allocate(&*region).unwrap(), 5);
    assert_eq!(pool.allocate(&*region).unwrap(), 9);
    assert_eq!(pool.allocate(&*region).unwrap(), 11);
}

#[test]
fn exhausts_at_capacity() {
    let pool = BlockPool::new(4096, 64).unwrap();
    let region = atomic_region(pool.total_size());

    let ids: Vec<usize> = (0..62).map(|_| pool.allocate(&*region).unwrap()).collect();
    assert_eq!(ids, (0..62).collect::<Vec<_>>());

    assert!(matches!(
        pool.allocate(&*region),
        Err(Error::OutOfCapacity {
            allocated_slots: 62,
            ..
        })
    ));
    assert!(!pool.stats().has_vacancy());
}

#[test]
fn offsets_round_trip_through_ids() {
    let pool = BlockPool::new(4096, 64).unwrap();

    for id in 0..pool.max_slots() {
        assert_eq!(pool.id_from_slot_offset(pool.slot_offset(id)).unwrap(), id);
        assert_eq!(pool.id_from_data_offset(pool.data_offset(id)).unwrap(), id);
        assert_eq!(pool.data_range(id).start, pool.data_offset(id));
        assert_eq!(pool.data_range(id).len(), pool.slot_size());
    }

    assert_eq!(
        pool.id_from_data_offset(100),
        Err(Error::Misaligned {
            offset: 100,
            stride: 66,
            suggested: 68
        })
    );
    assert!(matches!(
        pool.id_from_slot_offset(4096),
        Err(Error::OffsetOutOfRange { .. })
    ));

    // The 4 bytes after the last slot belong to no slot.
    assert!(matches!(
        pool.id_from_slot_offset(pool.slot_offset(pool.max_slots())),
        Err(Error::OffsetOutOfRange { .. })
    ));
    assert!(matches!(
        pool.id_from_data_offset(pool.data_offset(pool.max_slots())),
        Err(Error::OffsetOutOfRange { .. })
    ));
}

#[test]
fn payloads_survive_other_traffic() {
    let pool = BlockPool::new(1024, 16).unwrap();
    let region = atomic_region(pool.total_size());

    let kept = pool.allocate(&*region).unwrap();
    region.write_bytes(pool.data_offset(kept), b"sixteen bytes!!!");

    for _ in 0..10 {
        let a = pool.allocate(&*region).unwrap();
        let b = pool.allocate(&*region).unwrap();
        region.write_bytes(pool.data_offset(a), &[0xFF; 16]);
        region.write_bytes(pool.data_offset(b), &[0xEE; 16]);
        pool.release(&*region, b).unwrap();
        pool.release(&*region, a).unwrap();
    }

    let mut payload = [0_u8; 16];
    region.read_bytes(pool.data_offset(kept), &mut payload);
    assert_eq!(&payload, b"sixteen bytes!!!");
}

#[test]
fn pool_over_foreign_memory() {
    let mut backing = vec![0_u8; 512];
    let ptr = NonNull::new(backing.as_mut_ptr()).unwrap();

    let pool = BlockPool::new(backing.len(), 30).unwrap();

    {
        // SAFETY: `backing` outlives the view and is only accessed through it while it exists.
        let region = unsafe { atomic_region_from_raw(ptr, backing.len()) };

        let id = pool.allocate(region).unwrap();
        assert_eq!(id, 0);

        region.write_bytes(pool.data_offset(id), &[7; 30]);
    }

    // Header of slot 0 says "used", followed by the payload.
    assert_eq!(backing[..2], [1, 0]);
    assert_eq!(backing[pool.data_range(0)], [7; 30]);
}

#[test]
fn blocking_lock_pool_shared_between_threads() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 50;

    let pool = BlockPool::builder(64 * 1024, 32)
        .lock(BlockingLock::new())
        .build()
        .unwrap();
    let region = atomic_region(pool.total_size());

    let ids: Vec<usize> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    (0..PER_THREAD)
                        .map(|_| pool.allocate(&*region).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    let distinct: HashSet<usize> = ids.iter().copied().collect();
    assert_eq!(distinct.len(), THREADS * PER_THREAD);
    assert_eq!(pool.stats().used_slots(), THREADS * PER_THREAD);

    thread::scope(|s| {
        for chunk in ids.chunks(PER_THREAD) {
            let pool = &pool;
            let region = &region;

            s.spawn(move || {
                for id in chunk {
                    pool.release(&**region, *id).unwrap();
                }
            });
        }
    });

    let stats = pool.check_integrity(&*region).unwrap();
    assert_eq!(stats.used_slots(), 0);
    assert_eq!(stats.allocated_slots(), THREADS * PER_THREAD);
}
