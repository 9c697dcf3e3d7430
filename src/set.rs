//! The public set: a zone-sharded concurrent skip structure.
//!
//! A [`ZonedSet`] owns one shared data layer, one index layer per zone, the
//! hazard registry, and the background threads that keep them in step.
//! Threads interact with the set through a [`ZoneHandle`], which binds them
//! to a home zone (whose index they traverse) and a hazard slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::{Config, Discipline};
use crate::data::DataLayer;
use crate::error::Error;
use crate::hazard::{self, HazardRegistry, Retired};
use crate::search::{self, SearchLayer};
use crate::topology::ZonePlacement;
use crate::ttas::TTas;

struct Inner {
    config: Config,
    placement: Arc<dyn ZonePlacement>,
    registry: HazardRegistry,
    data: DataLayer,
    layers: Vec<SearchLayer>,
    /// Retired data nodes the helper could not free before it exited; freed
    /// at teardown once nothing can hold a hazard into the set.
    parked: TTas<Vec<Retired>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let parked = std::mem::take(&mut *self.parked.lock());
        for r in parked {
            unsafe { hazard::reclaim(r) };
        }
    }
}

struct Workers {
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

/// Concurrent ordered set of `i64` keys, sharded across NUMA-style zones.
///
/// The data layer is shared and authoritative; each zone keeps its own
/// advisory index over it, converging on data-layer changes through a
/// background fan-out. Reads and writes work against any zone's index at
/// any time, including before the index has caught up: a stale index only
/// costs a longer walk, never a wrong answer.
///
/// Keys `i64::MIN` and `i64::MAX` are reserved for the sentinels and are
/// never members.
pub struct ZonedSet {
    inner: Arc<Inner>,
    workers: TTas<Workers>,
}

impl ZonedSet {
    /// Build a set from a configuration. Background threads are not started
    /// yet; without [`start`](ZonedSet::start) the set still works, with
    /// every operation walking the data layer from its head.
    pub fn new(config: Config) -> Result<Self, Error> {
        let placement = config.resolve()?;
        let data = DataLayer::new();
        let layers = (0..config.zones)
            .map(|zone| SearchLayer::new(zone, config.arena_capacity, data.head))
            .collect();
        let registry = HazardRegistry::new(config.max_threads);
        log::info!(
            "zoned set: {} zones, {:?} discipline",
            config.zones,
            config.discipline
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                placement,
                registry,
                data,
                layers,
                parked: TTas::new(Vec::new()),
            }),
            workers: TTas::new(Workers {
                running: Arc::new(AtomicBool::new(false)),
                handles: Vec::new(),
            }),
        })
    }

    /// Start the background threads: one data-layer helper plus a
    /// maintenance and a GC thread per zone. Idempotent.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.handles.is_empty() {
            return;
        }
        workers.running.store(true, Ordering::Release);

        {
            let inner = self.inner.clone();
            let running = workers.running.clone();
            workers.handles.push(thread::spawn(move || {
                search::helper_loop(
                    &inner.data,
                    &inner.layers,
                    &inner.config,
                    &inner.registry,
                    inner.placement.as_ref(),
                    &running,
                    &inner.parked,
                );
            }));
        }
        for zone in 0..self.inner.layers.len() {
            let inner = self.inner.clone();
            let running = workers.running.clone();
            workers.handles.push(thread::spawn(move || {
                inner.placement.pin_thread(zone);
                search::maintenance_loop(&inner.layers[zone], &inner.config, &running);
            }));
            let inner = self.inner.clone();
            let running = workers.running.clone();
            workers.handles.push(thread::spawn(move || {
                inner.placement.pin_thread(zone);
                search::gc_loop(&inner.layers[zone], &inner.config, &inner.registry, &running);
            }));
        }
        log::info!("background threads started ({})", workers.handles.len());
    }

    /// Stop and join the background threads. Idempotent. The set stays
    /// usable afterwards; indexes just stop converging.
    pub fn stop(&self) {
        let mut workers = self.workers.lock();
        if workers.handles.is_empty() {
            return;
        }
        workers.running.store(false, Ordering::Release);
        for handle in workers.handles.drain(..) {
            let _ = handle.join();
        }
        log::info!("background threads stopped");
    }

    /// Register the calling thread against `zone` and get an operation
    /// handle. Fails if the zone does not exist or the hazard registry is
    /// out of slots.
    pub fn handle(&self, zone: usize) -> Result<ZoneHandle<'_>, Error> {
        if zone >= self.inner.layers.len() {
            return Err(Error::BadZone {
                zone,
                zones: self.inner.layers.len(),
            });
        }
        let slot = self.inner.registry.acquire().ok_or(Error::RegistryFull {
            max_threads: self.inner.registry.max_threads(),
        })?;
        self.inner.placement.pin_thread(zone);
        Ok(ZoneHandle {
            inner: &self.inner,
            zone,
            slot,
        })
    }

    /// Number of zones the set was built with.
    pub fn zones(&self) -> usize {
        self.inner.layers.len()
    }

    /// Count of live keys, via a temporary handle on zone 0.
    pub fn len(&self) -> Result<usize, Error> {
        Ok(self.handle(0)?.len())
    }
}

impl Drop for ZonedSet {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A thread's registration with a [`ZonedSet`]: a home zone and a hazard
/// slot. Dropping it releases the slot.
pub struct ZoneHandle<'a> {
    inner: &'a Inner,
    zone: usize,
    slot: usize,
}

impl ZoneHandle<'_> {
    /// Zone this handle traverses through.
    pub fn zone(&self) -> usize {
        self.zone
    }

    /// Add `key` to the set. Returns `false` if it was already present.
    pub fn add(&self, key: i64) -> bool {
        if key == i64::MIN || key == i64::MAX {
            return false;
        }
        let inner = self.inner;
        let hint = inner.layers[self.zone].index.descend(key);
        let added = match inner.config.discipline {
            Discipline::LazyLock => {
                inner
                    .data
                    .lazy_add(&inner.registry, self.slot, hint, key, key as u64)
            }
            Discipline::LockFree => {
                inner
                    .data
                    .lf_add(&inner.registry, self.slot, hint, key, key as u64)
            }
        };
        inner.registry.clear(self.slot);
        added
    }

    /// Remove `key` from the set. Returns `false` if it was not present.
    pub fn remove(&self, key: i64) -> bool {
        if key == i64::MIN || key == i64::MAX {
            return false;
        }
        let inner = self.inner;
        let hint = inner.layers[self.zone].index.descend(key);
        let removed = match inner.config.discipline {
            Discipline::LazyLock => inner.data.lazy_remove(&inner.registry, self.slot, hint, key),
            Discipline::LockFree => inner.data.lf_remove(&inner.registry, self.slot, hint, key),
        };
        inner.registry.clear(self.slot);
        removed
    }

    /// Membership test.
    pub fn contains(&self, key: i64) -> bool {
        if key == i64::MIN || key == i64::MAX {
            return false;
        }
        let inner = self.inner;
        let hint = inner.layers[self.zone].index.descend(key);
        let found = inner.data.contains(&inner.registry, self.slot, hint, key);
        inner.registry.clear(self.slot);
        found
    }

    /// Count of live keys. Linear walk of the data layer.
    pub fn len(&self) -> usize {
        self.inner.data.len(&self.inner.registry, self.slot)
    }
}

impl Drop for ZoneHandle<'_> {
    fn drop(&mut self) {
        self.inner.registry.release(self.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn works_without_background_threads() {
        let set = ZonedSet::new(Config::new().zones(2)).unwrap();
        let h = set.handle(1).unwrap();
        assert!(h.add(10));
        assert!(!h.add(10));
        assert!(h.contains(10));
        assert!(h.remove(10));
        assert!(!h.contains(10));
        assert_eq!(h.len(), 0);
    }

    #[test]
    fn sentinel_keys_are_reserved() {
        let set = ZonedSet::new(Config::new()).unwrap();
        let h = set.handle(0).unwrap();
        assert!(!h.add(i64::MIN));
        assert!(!h.add(i64::MAX));
        assert!(!h.contains(i64::MIN));
        assert!(!h.contains(i64::MAX));
        assert!(!h.remove(i64::MAX));
    }

    #[test]
    fn bad_zone_and_full_registry_are_typed_errors() {
        let set = ZonedSet::new(Config::new().zones(1).max_threads(1)).unwrap();
        assert!(matches!(
            set.handle(3),
            Err(Error::BadZone { zone: 3, zones: 1 })
        ));
        let h = set.handle(0).unwrap();
        assert!(matches!(
            set.handle(0),
            Err(Error::RegistryFull { max_threads: 1 })
        ));
        drop(h);
        assert!(set.handle(0).is_ok());
    }

    #[test]
    fn start_stop_are_idempotent() {
        let set = ZonedSet::new(Config::new().zones(2)).unwrap();
        set.start();
        set.start();
        let h = set.handle(0).unwrap();
        assert!(h.add(1));
        drop(h);
        set.stop();
        set.stop();
        set.start();
        let h = set.handle(1).unwrap();
        assert!(h.contains(1));
    }
}
