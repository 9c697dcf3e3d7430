//! Multi-threaded correctness for both disciplines.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use zoneskip::{Config, Discipline, ZonedSet};

fn fast_config(discipline: Discipline) -> Config {
    Config::new()
        .zones(2)
        .discipline(discipline)
        .data_poll(Duration::from_millis(1))
        .index_poll(Duration::from_millis(1))
}

fn exactly_one_wins(discipline: Discipline) {
    const THREADS: usize = 8;
    let set = Arc::new(ZonedSet::new(fast_config(discipline)).unwrap());
    set.start();

    for key in 0..50i64 {
        let barrier = Arc::new(Barrier::new(THREADS));
        let wins = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for t in 0..THREADS {
            let set = set.clone();
            let barrier = barrier.clone();
            let wins = wins.clone();
            handles.push(thread::spawn(move || {
                let h = set.handle(t % set.zones()).unwrap();
                barrier.wait();
                if h.add(key) {
                    wins.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(
            wins.load(Ordering::Relaxed),
            1,
            "key {} had multiple winning adds",
            key
        );
    }
    assert_eq!(set.len().unwrap(), 50);
}

#[test]
fn concurrent_add_has_one_winner_lazy() {
    exactly_one_wins(Discipline::LazyLock);
}

#[test]
fn concurrent_add_has_one_winner_lock_free() {
    exactly_one_wins(Discipline::LockFree);
}

fn mixed_stress(discipline: Discipline) {
    const THREADS: usize = 8;
    const OPS: usize = 20_000;
    const KEY_RANGE: i64 = 256;

    let set = Arc::new(ZonedSet::new(fast_config(discipline)).unwrap());
    set.start();

    let barrier = Arc::new(Barrier::new(THREADS));
    let mut workers = Vec::new();
    for t in 0..THREADS {
        let set = set.clone();
        let barrier = barrier.clone();
        workers.push(thread::spawn(move || {
            let h = set.handle(t % set.zones()).unwrap();
            barrier.wait();
            // Cheap thread-local xorshift so threads diverge.
            let mut state = 0x9E37_79B9u32.wrapping_mul(t as u32 + 1) | 1;
            let mut rand = move || {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state
            };
            let mut net = 0i64;
            for _ in 0..OPS {
                let key = i64::from(rand() % KEY_RANGE as u32);
                match rand() % 3 {
                    0 => {
                        if h.add(key) {
                            net += 1;
                        }
                    }
                    1 => {
                        if h.remove(key) {
                            net -= 1;
                        }
                    }
                    _ => {
                        h.contains(key);
                    }
                }
            }
            net
        }));
    }

    let net: i64 = workers.into_iter().map(|w| w.join().unwrap()).sum();
    assert!(net >= 0, "more removes than adds succeeded");
    assert!(net <= KEY_RANGE);

    // Successful adds minus successful removes must equal the live count.
    let len = set.len().unwrap() as i64;
    assert_eq!(len, net);

    // Let reclamation catch up, then verify the structure still answers.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(set.len().unwrap() as i64, net);
    let h = set.handle(0).unwrap();
    let live = (0..KEY_RANGE).filter(|&k| h.contains(k)).count() as i64;
    assert_eq!(live, net);
}

#[test]
fn mixed_stress_lazy() {
    mixed_stress(Discipline::LazyLock);
}

#[test]
fn mixed_stress_lock_free() {
    mixed_stress(Discipline::LockFree);
}

#[test]
fn readers_race_background_unlinking() {
    // Writers churn a small key range so the helper constantly unlinks
    // tombstones while readers traverse the same region.
    let set = Arc::new(ZonedSet::new(fast_config(Discipline::LockFree)).unwrap());
    set.start();

    let barrier = Arc::new(Barrier::new(4));
    let mut workers = Vec::new();
    for t in 0..2 {
        let set = set.clone();
        let barrier = barrier.clone();
        workers.push(thread::spawn(move || {
            let h = set.handle(t % set.zones()).unwrap();
            barrier.wait();
            for round in 0..500i64 {
                for key in 0..16i64 {
                    h.add(key);
                }
                for key in 0..16i64 {
                    h.remove(key);
                }
                let _ = round;
            }
        }));
    }
    for t in 0..2 {
        let set = set.clone();
        let barrier = barrier.clone();
        workers.push(thread::spawn(move || {
            let h = set.handle(t % set.zones()).unwrap();
            barrier.wait();
            for _ in 0..500 {
                for key in 0..16i64 {
                    h.contains(key);
                }
            }
        }));
    }
    for w in workers {
        w.join().unwrap();
    }
    set.stop();
    assert_eq!(set.len().unwrap(), 0);
}
