//! Zone placement capability.
//!
//! The set does not discover NUMA topology itself. It consumes a
//! [`ZonePlacement`] implementation that knows how to pin a thread to a
//! zone's CPU set and (implicitly) where that zone's memory lives. The
//! default [`Unpinned`] placement treats every "zone" as a plain shard with
//! no affinity, which is what tests and non-NUMA machines get.

/// Maps logical zones onto processor/memory affinity domains.
///
/// Background threads call [`pin_thread`](ZonePlacement::pin_thread) once at
/// startup with the zone they maintain; the data-layer helper calls it each
/// pass as it rotates across zones for fairness.
pub trait ZonePlacement: Send + Sync {
    /// Number of zones this placement can pin to.
    fn zones(&self) -> usize;

    /// Pin the calling thread to `zone`'s CPU set. Must be a no-op for
    /// placements without real affinity control.
    fn pin_thread(&self, zone: usize);
}

/// Placement with no affinity control: zones are plain shards.
#[derive(Debug, Clone)]
pub struct Unpinned {
    zones: usize,
}

impl Unpinned {
    /// Create an unpinned placement exposing `zones` logical zones.
    pub fn new(zones: usize) -> Self {
        Self { zones }
    }
}

impl ZonePlacement for Unpinned {
    fn zones(&self) -> usize {
        self.zones
    }

    fn pin_thread(&self, zone: usize) {
        log::trace!("unpinned placement: thread nominally on zone {zone}");
    }
}
