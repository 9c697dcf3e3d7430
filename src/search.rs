//! Per-zone background machinery: the maintenance loop that keeps the
//! zone's index in step with the data layer, and the GC loop that retires
//! unlinked index nodes through the hazard registry.
//!
//! Each zone runs one of each. The maintenance thread is the sole writer of
//! the zone's index and the sole consumer of its update queue; the GC thread
//! is the sole consumer of its garbage queue. Both poll and sleep when idle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::config::Config;
use crate::data::DataLayer;
use crate::hazard::{HazardRegistry, ReclaimKind, Retired, RetiredList};
use crate::index::ZoneIndex;
use crate::node::{DataNode, LevelRng};
use crate::queue::{Garbage, Job, JobQueue};

/// One zone's index plus the queues feeding and draining it.
pub(crate) struct SearchLayer {
    pub(crate) zone: usize,
    pub(crate) index: ZoneIndex,
    pub(crate) updates: JobQueue<Job>,
    pub(crate) garbage: JobQueue<Garbage>,
}

impl SearchLayer {
    pub(crate) fn new(zone: usize, arena_capacity: usize, head: *mut DataNode) -> Self {
        Self {
            zone,
            index: ZoneIndex::new(zone, arena_capacity, head),
            updates: JobQueue::new(),
            garbage: JobQueue::new(),
        }
    }
}

fn to_retired(g: Garbage) -> Retired {
    match g {
        Garbage::Index(p) => Retired {
            addr: p as usize,
            kind: ReclaimKind::Index,
        },
        Garbage::Intermediate(p) => Retired {
            addr: p as usize,
            kind: ReclaimKind::Intermediate,
        },
    }
}

/// Body of a zone's maintenance thread. Returns once `running` goes false,
/// after a final drain of the update queue.
pub(crate) fn maintenance_loop(layer: &SearchLayer, cfg: &Config, running: &AtomicBool) {
    // Per-zone seed so zones do not build identical index shapes.
    let mut rng = LevelRng::new(
        cfg.rng_seed ^ (layer.zone as u32).wrapping_mul(0x9E37_79B9),
    );
    log::debug!("zone {} maintenance thread up", layer.zone);
    while running.load(Ordering::Acquire) {
        let mut applied = 0usize;
        while let Some(job) = layer.updates.pop() {
            layer.index.apply_job(&job, &mut rng, &layer.garbage, cfg.max_height);
            // Release the pin the helper took when it queued the job.
            unsafe { (*job.node()).references.fetch_sub(1, Ordering::AcqRel) };
            applied += 1;
        }
        let (tall_deleted, alive) = layer.index.sweep(&layer.garbage);
        layer.index.raise_pass(cfg.raise_run, cfg.max_height);
        if tall_deleted > u64::from(cfg.lower_ratio) * alive.max(1) {
            layer.index.lower(&layer.garbage);
        }
        if applied == 0 {
            thread::sleep(cfg.index_poll);
        }
    }
    while let Some(job) = layer.updates.pop() {
        layer.index.apply_job(&job, &mut rng, &layer.garbage, cfg.max_height);
        unsafe { (*job.node()).references.fetch_sub(1, Ordering::AcqRel) };
    }
    log::debug!("zone {} maintenance thread down", layer.zone);
}

/// Body of a zone's GC thread. Index-side reclamation only releases
/// reference counts, so the final drain is unconditional.
pub(crate) fn gc_loop(
    layer: &SearchLayer,
    cfg: &Config,
    registry: &HazardRegistry,
    running: &AtomicBool,
) {
    let mut retired = RetiredList::new(cfg.retire_threshold);
    log::debug!("zone {} gc thread up", layer.zone);
    while running.load(Ordering::Acquire) {
        let mut collected = 0usize;
        while let Some(g) = layer.garbage.pop() {
            retired.retire(registry, to_retired(g));
            collected += 1;
        }
        if collected == 0 {
            thread::sleep(cfg.index_poll);
        }
    }
    while let Some(g) = layer.garbage.pop() {
        retired.retire(registry, to_retired(g));
    }
    unsafe { retired.drain_all() };
    log::debug!("zone {} gc thread down", layer.zone);
}

/// Body of the data-layer helper thread: fan fresh changes out to every
/// zone, unlink dead nodes, rotate across zones for placement fairness.
pub(crate) fn helper_loop(
    data: &DataLayer,
    layers: &[SearchLayer],
    cfg: &Config,
    registry: &HazardRegistry,
    placement: &dyn crate::topology::ZonePlacement,
    running: &AtomicBool,
    parked: &crate::ttas::TTas<Vec<Retired>>,
) {
    let mut retired = RetiredList::new(cfg.retire_threshold);
    let mut pass = 0usize;
    log::debug!("data-layer helper up ({} zones)", layers.len());
    while running.load(Ordering::Acquire) {
        placement.pin_thread(pass % layers.len());
        let queues: Vec<&JobQueue<Job>> = layers.iter().map(|l| &l.updates).collect();
        let work = data.helper_pass(registry, &mut retired, &queues);
        pass += 1;
        if work == 0 {
            thread::sleep(cfg.data_poll);
        }
    }
    // Data nodes still hazarded by live handles cannot be freed here; park
    // them for teardown.
    retired.scan(registry);
    let leftover = retired.take_remaining();
    if !leftover.is_empty() {
        log::debug!("helper parking {} hazarded nodes for teardown", leftover.len());
        parked.lock().extend(leftover);
    }
    log::debug!("data-layer helper down after {} passes", pass);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maintenance_drains_updates_on_shutdown() {
        let head = DataNode::alloc_sentinel(i64::MIN);
        let layer = SearchLayer::new(0, 1 << 16, head);
        let cfg = Config::new();
        for key in [3i64, 1, 2] {
            let node = DataNode::alloc(key, key as u64, std::ptr::null_mut(), std::ptr::null_mut());
            // Queued jobs carry a reference, taken by the producer.
            unsafe { (*node).references.fetch_add(1, Ordering::AcqRel) };
            layer.updates.push(Job::Insert { key, node });
        }
        let running = AtomicBool::new(false);
        maintenance_loop(&layer, &cfg, &running);
        unsafe {
            assert!((*layer.index.descend(3)).key < 3);
            assert_eq!((*layer.index.descend(1)).key, i64::MIN);
        }
    }

    #[test]
    fn gc_reclaims_queued_garbage() {
        let head = DataNode::alloc_sentinel(i64::MIN);
        let layer = SearchLayer::new(0, 1 << 16, head);
        let cfg = Config::new();
        let registry = HazardRegistry::new(4);
        let mut rng = LevelRng::new(1);

        let node = DataNode::alloc(9, 9, std::ptr::null_mut(), std::ptr::null_mut());
        layer
            .index
            .apply_job(&Job::Insert { key: 9, node }, &mut rng, &layer.garbage, 8);
        layer
            .index
            .apply_job(&Job::Remove { key: 9, node }, &mut rng, &layer.garbage, 8);
        layer.index.sweep(&layer.garbage);
        layer.index.sweep(&layer.garbage);

        let running = AtomicBool::new(false);
        gc_loop(&layer, &cfg, &registry, &running);
        unsafe { assert_eq!((*node).references.load(Ordering::Acquire), 0) };
    }
}
