//! Reclamation paths: tombstone unlinking, hazard scans with a tiny retire
//! threshold, and teardown with work still in flight.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use zoneskip::{Config, Discipline, ZonedSet};

fn churn_config() -> Config {
    let _ = env_logger::builder().is_test(true).try_init();
    Config::new()
        .zones(2)
        .retire_threshold(1)
        .data_poll(Duration::from_millis(1))
        .index_poll(Duration::from_millis(1))
}

#[test]
fn heavy_churn_with_immediate_scans() {
    // Threshold 1 makes every retirement trigger a hazard scan, so the
    // free/procrastinate decision runs constantly.
    let set = ZonedSet::new(churn_config()).unwrap();
    set.start();
    let h = set.handle(0).unwrap();
    for round in 0..50i64 {
        for key in 0..64i64 {
            assert!(h.add(key));
        }
        for key in 0..64i64 {
            assert!(h.remove(key));
        }
        // Leave a residue that later rounds resurrect.
        assert!(h.add(round));
        assert!(h.remove(round));
    }
    thread::sleep(Duration::from_millis(100));
    assert_eq!(h.len(), 0);
    for key in 0..64i64 {
        assert!(h.add(key));
        assert!(h.contains(key));
    }
}

#[test]
fn teardown_with_pending_garbage() {
    // Drop the set right after heavy churn, while queues and retire lists
    // still hold work. Teardown must reclaim everything without touching
    // freed memory (run under sanitizers to get the full value).
    for _ in 0..10 {
        let set = ZonedSet::new(churn_config().discipline(Discipline::LockFree)).unwrap();
        set.start();
        let h = set.handle(0).unwrap();
        for key in 0..200i64 {
            h.add(key);
        }
        for key in 0..200i64 {
            h.remove(key);
        }
        drop(h);
        drop(set);
    }
}

#[test]
fn stop_start_cycle_preserves_contents() {
    let set = ZonedSet::new(churn_config()).unwrap();
    set.start();
    let h = set.handle(0).unwrap();
    for key in 0..100i64 {
        assert!(h.add(key));
    }
    thread::sleep(Duration::from_millis(50));
    set.stop();

    // Mutate while the background is down; tombstones pile up unlinked.
    for key in 0..50i64 {
        assert!(h.remove(key));
    }
    assert_eq!(h.len(), 50);

    set.start();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(h.len(), 50);
    for key in 0..100i64 {
        assert_eq!(h.contains(key), key >= 50);
    }
}

#[test]
fn handles_outlive_background_churn() {
    let set = Arc::new(ZonedSet::new(churn_config()).unwrap());
    set.start();
    let mut workers = Vec::new();
    for t in 0..4 {
        let set = set.clone();
        workers.push(thread::spawn(move || {
            for _ in 0..100 {
                let h = set.handle(t % set.zones()).unwrap();
                h.add(t as i64);
                h.contains(t as i64);
                h.remove(t as i64);
                // Handle dropped every iteration: slots must recycle.
            }
        }));
    }
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(set.len().unwrap(), 0);
}
