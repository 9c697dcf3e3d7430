//! Index growth past the initial arena buffer. A deliberately tiny arena
//! forces the zone allocators to chain extra buffers while the set keeps
//! serving lookups.

use std::time::Duration;

use zoneskip::{Config, ZonedSet};

#[test]
fn index_survives_arena_growth() {
    // 4 KiB holds only a few dozen cache-line index nodes; thousands of
    // keys guarantee several growth steps per zone.
    let set = ZonedSet::new(
        Config::new()
            .zones(2)
            .arena_capacity(4096)
            .data_poll(Duration::from_millis(1))
            .index_poll(Duration::from_millis(1)),
    )
    .unwrap();
    set.start();

    let h = set.handle(0).unwrap();
    for key in 0..4000i64 {
        assert!(h.add(key));
    }
    // Give the zones time to index everything through the grown arenas.
    std::thread::sleep(Duration::from_millis(200));

    for zone in 0..set.zones() {
        let reader = set.handle(zone).unwrap();
        for key in 0..4000i64 {
            assert!(reader.contains(key), "zone {} lost key {}", zone, key);
        }
        assert_eq!(reader.len(), 4000);
    }

    // Churn after growth: retire towers, build new ones in chained buffers.
    for key in 0..4000i64 {
        assert!(h.remove(key));
    }
    std::thread::sleep(Duration::from_millis(100));
    for key in 0..2000i64 {
        assert!(h.add(key));
    }
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(h.len(), 2000);
    for key in 0..2000i64 {
        assert!(h.contains(key));
    }
}
