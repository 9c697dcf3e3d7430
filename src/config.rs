//! Set configuration.
//!
//! Every tuning knob of the structure lives here: zone count, arena sizing,
//! background poll intervals, the hazard retirement threshold, and the index
//! raise/lower thresholds. The thresholds were tuned empirically in earlier
//! versions of this structure and are deliberately configuration, not
//! constants.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::topology::{Unpinned, ZonePlacement};

/// Concurrency-control discipline used by the data layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    /// Optimistic traversal, then per-node locks and a link re-validation
    /// before committing.
    LazyLock,
    /// CAS-only mutation with unbounded retry.
    LockFree,
}

/// Builder-style configuration for [`ZonedSet`](crate::ZonedSet).
#[derive(Clone)]
pub struct Config {
    pub(crate) zones: usize,
    pub(crate) discipline: Discipline,
    /// Initial byte capacity of each zone's arena buffer.
    pub(crate) arena_capacity: usize,
    /// Poll interval of the data-layer helper thread.
    pub(crate) data_poll: Duration,
    /// Poll interval of each zone's maintenance and GC threads.
    pub(crate) index_poll: Duration,
    /// Retired-list depth that triggers a hazard scan.
    pub(crate) retire_threshold: usize,
    /// Consecutive same-level run length that promotes its middle node.
    pub(crate) raise_run: usize,
    /// Lower the bottom index level once tall-but-deleted nodes outnumber
    /// live bottom nodes by this factor.
    pub(crate) lower_ratio: u32,
    /// Hazard slot table size (one slot per registered thread).
    pub(crate) max_threads: usize,
    /// Cap on index tower height.
    pub(crate) max_height: u32,
    /// Seed for the xorshift tower-height generator.
    pub(crate) rng_seed: u32,
    pub(crate) placement: Option<Arc<dyn ZonePlacement>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            zones: 1,
            discipline: Discipline::LazyLock,
            arena_capacity: 1 << 20,
            data_poll: Duration::from_micros(10_000),
            index_poll: Duration::from_micros(10_000),
            retire_threshold: 5,
            raise_run: 3,
            lower_ratio: 10,
            max_threads: 128,
            max_height: 32,
            rng_seed: 2_463_534_242,
            placement: None,
        }
    }
}

impl Config {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of zones to shard the index layer across.
    pub fn zones(mut self, zones: usize) -> Self {
        self.zones = zones;
        self
    }

    /// Concurrency-control discipline for data-layer mutation.
    pub fn discipline(mut self, discipline: Discipline) -> Self {
        self.discipline = discipline;
        self
    }

    /// Initial byte capacity of each zone's arena buffer. Derive this from
    /// the expected node count times the cache-line size; the arena grows by
    /// whole buffers when it runs out.
    pub fn arena_capacity(mut self, bytes: usize) -> Self {
        self.arena_capacity = bytes;
        self
    }

    /// Poll interval of the data-layer helper thread.
    pub fn data_poll(mut self, poll: Duration) -> Self {
        self.data_poll = poll;
        self
    }

    /// Poll interval of the per-zone maintenance and GC threads.
    pub fn index_poll(mut self, poll: Duration) -> Self {
        self.index_poll = poll;
        self
    }

    /// Retired-list depth that triggers a hazard scan.
    pub fn retire_threshold(mut self, depth: usize) -> Self {
        self.retire_threshold = depth.max(1);
        self
    }

    /// Consecutive same-level run length that promotes its middle node into
    /// the level above. Two is the smallest meaningful run.
    pub fn raise_run(mut self, run: usize) -> Self {
        self.raise_run = run.max(2);
        self
    }

    /// Ratio of tall-deleted to live bottom nodes that triggers dropping the
    /// lowest index level.
    pub fn lower_ratio(mut self, ratio: u32) -> Self {
        self.lower_ratio = ratio.max(1);
        self
    }

    /// Size of the hazard slot table (bounds concurrently registered
    /// threads, background threads included).
    pub fn max_threads(mut self, threads: usize) -> Self {
        self.max_threads = threads.max(1);
        self
    }

    /// Cap on index tower height.
    pub fn max_height(mut self, height: u32) -> Self {
        self.max_height = height.clamp(1, 64);
        self
    }

    /// Seed for the tower-height generator. The generator is deterministic
    /// given a seed, so fixed seeds give reproducible index shapes.
    pub fn rng_seed(mut self, seed: u32) -> Self {
        self.rng_seed = seed;
        self
    }

    /// Inject a placement implementation with real NUMA affinity control.
    pub fn placement(mut self, placement: Arc<dyn ZonePlacement>) -> Self {
        self.placement = Some(placement);
        self
    }

    /// Validate and resolve the placement. Called once at set construction.
    pub(crate) fn resolve(&self) -> Result<Arc<dyn ZonePlacement>, Error> {
        if self.zones == 0 {
            return Err(Error::NoZones);
        }
        let placement = match &self.placement {
            Some(p) => p.clone(),
            None => Arc::new(Unpinned::new(self.zones)) as Arc<dyn ZonePlacement>,
        };
        if self.zones > placement.zones() {
            return Err(Error::TooManyZones {
                requested: self.zones,
                available: placement.zones(),
            });
        }
        Ok(placement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_zones_rejected() {
        assert!(matches!(
            Config::new().zones(0).resolve(),
            Err(Error::NoZones)
        ));
    }

    #[test]
    fn more_zones_than_placement_rejected() {
        let cfg = Config::new()
            .zones(4)
            .placement(Arc::new(Unpinned::new(2)));
        assert!(matches!(
            cfg.resolve(),
            Err(Error::TooManyZones {
                requested: 4,
                available: 2
            })
        ));
    }

    #[test]
    fn defaults_resolve() {
        assert!(Config::new().resolve().is_ok());
    }

    #[test]
    fn raise_run_floors_at_two() {
        assert_eq!(Config::new().raise_run(2).raise_run, 2);
        assert_eq!(Config::new().raise_run(7).raise_run, 7);
        assert_eq!(Config::new().raise_run(0).raise_run, 2);
    }
}
