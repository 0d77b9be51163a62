//! Integration tests for `slot_pool` exercising the pools through their public API only.

use std::collections::HashMap;

use new_zealand::nz;
use slot_pool::{BitmapPool, ByDeref, ChangeTracking, Error, FrameRing, HashPool, SlotPool};

/// Deterministic pseudo-random sequence so that failures are reproducible.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, bound: usize) -> usize {
        usize::try_from(self.next() % u64::try_from(bound).unwrap()).unwrap()
    }
}

fn modified_indices(ring: &FrameRing<u32>, rel_frame: i64) -> Vec<usize> {
    let mut indices = Vec::new();
    ring.for_each_modified(rel_frame, |index, _| indices.push(index));
    indices
}

#[test]
fn deleted_slot_is_reused_by_next_add() {
    let mut pool = SlotPool::new();

    assert_eq!(pool.add('x').unwrap(), 0);
    assert_eq!(pool.add('y').unwrap(), 1);
    assert_eq!(pool.add('z').unwrap(), 2);

    pool.del(1).unwrap();

    assert_eq!(pool.add('w').unwrap(), 1);
    pool.integrity_check();
}

#[test]
fn get_or_create_far_past_end_then_claim_gap_slot() {
    let mut pool = SlotPool::<u32>::new();

    *pool.get_or_create(5).unwrap() = 5;

    assert_eq!(pool.storage_len(), 6);
    assert_eq!(pool.indices().collect::<Vec<_>>(), vec![5]);

    *pool.get_or_create(2).unwrap() = 2;

    assert_eq!(pool.indices().collect::<Vec<_>>(), vec![2, 5]);
    assert!(matches!(
        pool.get_or_create(2),
        Err(Error::NotFree { index: 2 })
    ));
    pool.integrity_check();
}

#[test]
fn erase_removes_all_duplicates_and_keeps_other_keys() {
    let mut pool = HashPool::<String, ByDeref>::new();

    pool.insert_value_slot("foo".to_string()).unwrap();
    pool.insert_value_slot("foo".to_string()).unwrap();
    pool.insert_value_slot("bar".to_string()).unwrap();

    assert_eq!(pool.erase("foo"), 2);
    assert!(pool.find_value("foo").is_none());
    assert!(pool.find_value("bar").is_some());
    pool.integrity_check();
}

#[test]
fn frame_ring_reports_recent_and_ancient_modifications() {
    let mut ring = FrameRing::builder().ring_size(nz!(8)).build();

    for value in 0..6 {
        ring.add(value).unwrap();
    }

    while ring.frame() < 10 {
        ring.advance_frame(true);
    }

    *ring.get_item_mut(4).unwrap() = 40;
    ring.advance_frame(true);
    assert_eq!(ring.frame(), 11);

    assert_eq!(modified_indices(&ring, 0), vec![4]);
    assert!(modified_indices(&ring, -9).contains(&4));

    while ring.frame() < 50 {
        ring.advance_frame(true);
    }

    // The window reaches far past the tracked history, so nothing can be ruled out.
    assert_eq!(modified_indices(&ring, -45), vec![0, 1, 2, 3, 4, 5]);

    ring.integrity_check();
}

#[test]
fn indices_stay_stable_under_random_operations() {
    let mut pool = SlotPool::new();
    let mut model: HashMap<usize, u64> = HashMap::new();
    let mut random = XorShift(0x9e37_79b9_7f4a_7c15);

    for step in 0..5000_u64 {
        if model.is_empty() || random.below(3) != 0 {
            let index = pool.add(step).unwrap();
            assert!(
                model.insert(index, step).is_none(),
                "index {index} handed out while still in use"
            );
        } else {
            let mut live: Vec<usize> = model.keys().copied().collect();
            live.sort_unstable();
            let victim = live[random.below(live.len())];

            assert_eq!(pool.del(victim).unwrap(), model.remove(&victim).unwrap());
        }
    }

    assert_eq!(pool.len(), model.len());
    for (index, value) in &model {
        assert_eq!(pool.get_item(*index), Some(value));
    }

    pool.integrity_check();
}

#[test]
fn liveness_queries_agree_with_contents() {
    let mut slots = SlotPool::new();
    let mut bitmap = BitmapPool::new();
    let mut random = XorShift(42);

    for value in 0..300_u32 {
        slots.add(value).unwrap();
        bitmap.add(value).unwrap();
    }

    for _ in 0..150 {
        let index = random.below(300);
        // Deleting twice must fail without side effects.
        _ = slots.del(index);
        _ = bitmap.del(index);
    }

    for index in 0..400 {
        assert_eq!(slots.is_allocated(index), slots.get_item(index).is_some());
        assert_eq!(bitmap.is_valid(index), bitmap.get_item(index).is_some());
        assert_eq!(slots.is_allocated(index), bitmap.is_valid(index));
    }

    assert_eq!(slots.len(), slots.iter().count());
    assert_eq!(bitmap.len(), bitmap.iter().count());
    slots.integrity_check();
    bitmap.integrity_check();
}

#[test]
fn every_inserted_key_is_found_until_erased() {
    let mut pool = HashPool::<String, ByDeref>::builder().bucket_count(7).build();

    let keys: Vec<String> = (0..200).map(|n| format!("key-{n}")).collect();
    let mut indices = Vec::new();

    for key in &keys {
        indices.push(pool.insert_value_slot(key.clone()).unwrap());
    }

    for (key, index) in keys.iter().zip(&indices) {
        assert_eq!(pool.find_value(key), Some(*index));
        assert_eq!(pool.get_item(*index), Some(key));
    }

    for key in keys.iter().step_by(2) {
        assert_eq!(pool.erase(key), 1);
    }

    for (position, key) in keys.iter().enumerate() {
        assert_eq!(pool.find_value(key).is_some(), position % 2 == 1);
    }

    pool.integrity_check();
}

#[test]
fn widening_the_query_window_never_loses_slots() {
    let mut ring = FrameRing::new();
    let mut random = XorShift(7);

    for value in 0..32 {
        ring.add(value).unwrap();
    }

    for _ in 0..120 {
        for _ in 0..3 {
            let index = random.below(32);
            ring.set_modified(index);
        }

        ring.advance_frame(true);

        for index in 0..32 {
            let mut previously_modified = false;

            for rel_frame in (-60..=0).rev() {
                let modified = ring.is_modified(index, rel_frame);
                assert!(
                    modified || !previously_modified,
                    "slot {index} reported at a narrower window than rel_frame {rel_frame}"
                );
                previously_modified = modified;
            }
        }
    }
}

#[test]
fn snapshots_are_available_for_exactly_ring_size_frames() {
    let mut ring = FrameRing::builder().ring_size(nz!(4)).build();
    let index = ring.add(0_u32).unwrap();

    for _ in 0..20 {
        *ring.get_item_mut(index).unwrap() += 1;
        ring.advance_frame(true);
    }

    let now = ring.frame();

    for frame in now - 4..now {
        let snapshot = ring.snapshot(frame).unwrap();
        assert_eq!(snapshot.get_item(index), Some(&u32::try_from(frame + 1).unwrap()));
    }

    assert!(ring.snapshot(now - 5).is_none());
    assert!(ring.snapshot(now).is_none());
    ring.integrity_check();
}

#[test]
fn change_tracking_is_opt_in() {
    let mut untracked = SlotPool::new();
    untracked.add(1_u8).unwrap();
    assert!(untracked.changesets().is_none());

    let mut tracked = SlotPool::<u8, ChangeTracking>::builder().build();
    tracked.add(1).unwrap();
    assert_eq!(tracked.changesets().map(<[_]>::len), Some(1));
}

#[test]
fn pool_can_be_rebuilt_from_its_iterator() {
    let mut original = SlotPool::new();
    for word in ["alpha", "beta", "gamma", "delta"] {
        original.add(word.to_string()).unwrap();
    }
    original.del(0).unwrap();

    let mut restored = SlotPool::new();
    restored.extend(original.iter().map(|(_, value)| value.clone()));

    let original_values: Vec<_> = original.iter().map(|(_, value)| value).collect();
    let restored_values: Vec<_> = restored.iter().map(|(_, value)| value).collect();

    assert_eq!(original_values, restored_values);
}

#[test]
fn standalone_tracked_pool_advances_through_frames() {
    fn modified(pool: &SlotPool<&str, ChangeTracking>, rel_frame: i64) -> Vec<usize> {
        let mut indices = Vec::new();
        pool.for_each_modified(rel_frame, |index, _| indices.push(index));
        indices
    }

    let mut pool = SlotPool::<&str, ChangeTracking>::builder().build();
    let a = pool.add("a").unwrap();
    let b = pool.add("b").unwrap();
    let c = pool.add("c").unwrap();
    pool.advance_frame();

    *pool.get_item_mut(b).unwrap() = "B";
    pool.advance_frame();

    pool.del(c).unwrap();

    assert_eq!(pool.frame(), Some(2));
    assert_eq!(modified(&pool, 0), vec![b]);
    assert_eq!(modified(&pool, -1), vec![a, b]);

    let mut slots = Vec::new();
    pool.for_each_modified_slot(0, |index, value| slots.push((index, value.copied())));
    assert_eq!(slots, vec![(b, Some("B")), (c, None)]);

    for _ in 0..50 {
        pool.advance_frame();
    }

    assert_eq!(pool.frame(), Some(52));
    assert!(modified(&pool, 0).is_empty());
    assert_eq!(modified(&pool, -45), vec![a, b]);
    pool.integrity_check();
}
