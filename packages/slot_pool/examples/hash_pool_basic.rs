//! Basic usage of a `HashPool`:
//!
//! * Elements that carry their own key.
//! * Looking up by key and by index.
//! * Duplicate keys.

use slot_pool::{ByKeyed, HashPool, Keyed};

#[derive(Debug)]
struct Session {
    user: String,
    requests: u32,
}

impl Keyed for Session {
    type Key = str;

    fn key(&self) -> &str {
        &self.user
    }
}

fn main() {
    let mut sessions = HashPool::<Session, ByKeyed>::new();

    for user in ["alice", "bob", "alice"] {
        let (index, inserted) = sessions
            .find_or_insert_value_slot(user, |_| Session {
                user: user.to_string(),
                requests: 0,
            })
            .unwrap();

        if let Some(session) = sessions.get_item_mut(index) {
            session.requests += 1;
        }

        println!("{user} -> slot {index} (new session: {inserted})");
    }

    // Unconditional insertion allows several sessions for the same user.
    sessions
        .insert_value_slot(Session {
            user: "bob".to_string(),
            requests: 0,
        })
        .unwrap();

    println!("bob has {} sessions", sessions.count("bob"));

    if let Some(alice) = sessions.get_value("alice") {
        println!("alice made {} requests", alice.requests);
    }

    let removed = sessions.erase("bob");
    println!("Removed {removed} sessions for bob, {} left", sessions.len());
}
