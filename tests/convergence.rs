//! Cross-zone visibility: changes made through one zone's handle must be
//! seen through every other zone, before and after the indexes converge.

use std::time::Duration;

use zoneskip::{Config, Discipline, ZonedSet};

fn fast_config() -> Config {
    let _ = env_logger::builder().is_test(true).try_init();
    Config::new()
        .zones(2)
        .data_poll(Duration::from_millis(1))
        .index_poll(Duration::from_millis(1))
}

#[test]
fn all_zones_see_all_keys() {
    let set = ZonedSet::new(fast_config()).unwrap();
    set.start();

    let writer = set.handle(0).unwrap();
    for key in 0..1000i64 {
        assert!(writer.add(key));
    }

    // Visible from every zone immediately: the data layer is authoritative
    // and the index only steers the walk.
    for zone in 0..set.zones() {
        let reader = set.handle(zone).unwrap();
        for key in 0..1000i64 {
            assert!(reader.contains(key), "zone {} missing key {}", zone, key);
        }
        assert_eq!(reader.len(), 1000);
    }

    // Let the helper fan out and the zones build their indexes, then check
    // the answers did not change.
    std::thread::sleep(Duration::from_millis(100));
    for zone in 0..set.zones() {
        let reader = set.handle(zone).unwrap();
        for key in 0..1000i64 {
            assert!(reader.contains(key));
        }
        assert!(!reader.contains(1000));
        assert!(!reader.contains(-1));
    }
}

#[test]
fn removals_propagate_to_every_zone() {
    let set = ZonedSet::new(fast_config()).unwrap();
    set.start();

    let writer = set.handle(0).unwrap();
    for key in 0..500i64 {
        assert!(writer.add(key));
    }
    std::thread::sleep(Duration::from_millis(50));

    let remover = set.handle(1).unwrap();
    for key in (0..500i64).step_by(2) {
        assert!(remover.remove(key));
    }

    for zone in 0..set.zones() {
        let reader = set.handle(zone).unwrap();
        for key in 0..500i64 {
            assert_eq!(reader.contains(key), key % 2 == 1);
        }
        assert_eq!(reader.len(), 250);
    }

    // After convergence the indexes have dropped the dead towers; answers
    // still hold, including re-adding previously removed keys.
    std::thread::sleep(Duration::from_millis(100));
    let reader = set.handle(0).unwrap();
    for key in (0..500i64).step_by(2) {
        assert!(!reader.contains(key));
        assert!(reader.add(key));
        assert!(reader.contains(key));
    }
    assert_eq!(reader.len(), 500);
}

#[test]
fn lock_free_converges_too() {
    let set = ZonedSet::new(fast_config().discipline(Discipline::LockFree)).unwrap();
    set.start();
    let h0 = set.handle(0).unwrap();
    let h1 = set.handle(1).unwrap();
    for key in 0..300i64 {
        assert!(h0.add(key));
    }
    std::thread::sleep(Duration::from_millis(50));
    for key in 0..300i64 {
        assert!(h1.contains(key));
    }
    for key in 0..300i64 {
        assert!(h1.remove(key));
    }
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(h0.len(), 0);
}
