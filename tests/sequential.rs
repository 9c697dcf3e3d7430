//! Single-threaded semantics for both disciplines.

use zoneskip::{Config, Discipline, ZonedSet};

fn check_set_semantics(discipline: Discipline) {
    let set = ZonedSet::new(Config::new().discipline(discipline)).unwrap();
    let h = set.handle(0).unwrap();

    assert!(!h.contains(1));
    assert!(h.add(1));
    assert!(h.contains(1));
    assert!(!h.add(1), "double add must report already-present");
    assert_eq!(h.len(), 1);

    assert!(h.remove(1));
    assert!(!h.contains(1));
    assert!(!h.remove(1), "double remove must report already-absent");
    assert_eq!(h.len(), 0);

    // A removed key can come back.
    assert!(h.add(1));
    assert!(h.contains(1));
    assert_eq!(h.len(), 1);
}

#[test]
fn lazy_lock_semantics() {
    check_set_semantics(Discipline::LazyLock);
}

#[test]
fn lock_free_semantics() {
    check_set_semantics(Discipline::LockFree);
}

#[test]
fn ordered_population() {
    let set = ZonedSet::new(Config::new()).unwrap();
    let h = set.handle(0).unwrap();
    // Insert out of order, negative keys included.
    let keys = [50i64, -3, 17, 0, -100, 9999, 2];
    for &k in &keys {
        assert!(h.add(k));
    }
    for &k in &keys {
        assert!(h.contains(k));
    }
    assert!(!h.contains(1));
    assert_eq!(h.len(), keys.len());
    for &k in &keys {
        assert!(h.remove(k));
    }
    assert_eq!(h.len(), 0);
}

#[test]
fn works_with_background_running() {
    let set = ZonedSet::new(Config::new().zones(2)).unwrap();
    set.start();
    let h = set.handle(0).unwrap();
    for k in 0..100 {
        assert!(h.add(k));
    }
    for k in 0..100 {
        assert!(h.contains(k));
    }
    for k in (0..100).step_by(2) {
        assert!(h.remove(k));
    }
    for k in 0..100 {
        assert_eq!(h.contains(k), k % 2 == 1);
    }
    assert_eq!(h.len(), 50);
    drop(h);
    set.stop();
}
