//! A NUMA-aware concurrent skip structure: one shared, ordered data layer
//! and a per-zone index layer that accelerates it.
//!
//! The data layer is a single linked list of every key and is the only
//! authority on membership. Each zone (a NUMA node, or just a shard) keeps
//! its own skip index over the data layer, built from zone-local arena
//! memory so index traffic never crosses the interconnect. Indexes are
//! advisory and eventually consistent: a background helper fans every
//! data-layer change out to per-zone queues, and per-zone maintenance
//! threads fold the changes in and rebalance. A stale index costs a longer
//! list walk, never a wrong answer.
//!
//! # Key properties
//!
//! - **Zone-local search**: index descent touches only the handle's zone
//! - **Two disciplines**: lazy per-node locking or CAS-only lock-free
//! - **Asynchronous convergence**: index updates never block operations
//! - **Hazard-pointer reclamation**: unlinked data nodes are freed safely
//!
//! Memory for index and intermediate nodes is arena-backed per zone and
//! only released wholesale at teardown, which is what makes chasing a stale
//! index pointer safe.
//!
//! # Example
//!
//! ```rust
//! use zoneskip::{Config, Discipline, ZonedSet};
//!
//! let set = ZonedSet::new(Config::new().zones(2).discipline(Discipline::LazyLock)).unwrap();
//! set.start();
//!
//! let handle = set.handle(0).unwrap();
//! assert!(handle.add(42));
//! assert!(handle.contains(42));
//! assert!(handle.remove(42));
//!
//! set.stop();
//! ```

mod arena;
mod config;
mod data;
mod error;
mod hazard;
mod index;
mod node;
mod queue;
mod search;
mod set;
mod topology;
mod ttas;

pub use config::{Config, Discipline};
pub use error::Error;
pub use set::{ZoneHandle, ZonedSet};
pub use topology::{Unpinned, ZonePlacement};
