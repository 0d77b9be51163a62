//! Pools perform no internal synchronization but can be moved between threads and read from
//! many threads at once when the element type allows it.

use std::thread;

use slot_pool::{ByValue, FrameRing, HashPool, SlotPool};

#[test]
#[cfg_attr(miri, ignore)] // Real threads are slow under Miri.
fn pool_can_move_to_another_thread() {
    let mut pool = SlotPool::new();
    let index = pool.add(String::from("moved")).unwrap();

    let pool = thread::spawn(move || {
        assert_eq!(pool.get_item(index).map(String::as_str), Some("moved"));
        pool
    })
    .join()
    .unwrap();

    assert_eq!(pool.len(), 1);
}

#[test]
#[cfg_attr(miri, ignore)] // Real threads are slow under Miri.
fn readers_share_published_snapshots() {
    let mut ring = FrameRing::new();
    let index = ring.add(0_u64).unwrap();

    for value in 1..=8 {
        ring.advance_frame(true);
        *ring.get_item_mut(index).unwrap() = value;
    }

    let now = ring.frame();

    thread::scope(|scope| {
        for frame in now - 8..now {
            let ring = &ring;

            scope.spawn(move || {
                let snapshot = ring.snapshot(frame).unwrap();
                assert_eq!(snapshot.get_item(index), Some(&frame));
            });
        }
    });
}

#[test]
#[cfg_attr(miri, ignore)] // Real threads are slow under Miri.
fn hash_lookups_from_many_threads() {
    let mut pool = HashPool::<u32, ByValue>::new();
    for value in 0..1000 {
        pool.insert_value_slot(value).unwrap();
    }

    thread::scope(|scope| {
        for offset in 0..4 {
            let pool = &pool;

            scope.spawn(move || {
                for value in (offset..1000).step_by(4) {
                    assert!(pool.find_value(&value).is_some());
                }
            });
        }
    });
}
