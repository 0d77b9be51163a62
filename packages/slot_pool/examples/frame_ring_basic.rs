//! Basic usage of a `FrameRing`:
//!
//! * Mutating the active pool during a frame.
//! * Publishing frames.
//! * Asking which slots changed recently.
//! * Reading an older published frame.

use slot_pool::FrameRing;

#[derive(Clone, Debug)]
struct Particle {
    x: i32,
    velocity: i32,
}

fn main() {
    let mut ring = FrameRing::new();

    for velocity in [0, 1, 0, -2] {
        ring.add(Particle { x: 0, velocity }).unwrap();
    }

    ring.advance_frame(true);

    for _ in 0..5 {
        // Only particles that actually move are touched, so only they count as modified.
        let moving: Vec<usize> = ring
            .iter()
            .filter(|(_, particle)| particle.velocity != 0)
            .map(|(index, _)| index)
            .collect();

        for index in moving {
            if let Some(particle) = ring.get_item_mut(index) {
                particle.x += particle.velocity;
            }
        }

        ring.advance_frame(true);
    }

    println!("Now in frame {}", ring.frame());

    ring.for_each_modified(0, |index, particle| {
        println!("Particle {index} moved in the last frame: {particle:?}");
    });

    // Readers that fall a few frames behind still see a consistent picture.
    let earlier = ring.frame() - 3;
    if let Some(snapshot) = ring.snapshot(earlier) {
        for (index, particle) in snapshot {
            println!("Frame {earlier}: particle {index} was at {}", particle.x);
        }
    }
}
