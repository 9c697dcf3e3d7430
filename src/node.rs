//! Node model for the three layers, plus the tower-height generator.
//!
//! One shared data layer holds every key; each zone mirrors a subset of it
//! in an intermediate list and accelerates lookup with a per-zone index
//! layer of tower nodes. Data nodes are heap-allocated and reclaimed through
//! the hazard registry; intermediate and index nodes come from the zone's
//! arena and are retired (reference-count release) through the registry but
//! physically freed only with the arena.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::arena::ZoneArena;
use crate::ttas::TTas;

/// Data-node lifecycle. LIVE nodes are set members; TOMB nodes are logically
/// deleted but resurrectable; FINAL nodes lost the race to a resurrection
/// forever and are owned by the unlink path.
pub(crate) const LIVE: u8 = 0;
pub(crate) const TOMB: u8 = 1;
pub(crate) const FINAL: u8 = 2;

/// Low bit of a data node's `next` pointer. Set while the node is being
/// physically unlinked; CAS inserts expect an untagged value, so a frozen
/// node repels new successors.
const FREEZE: usize = 1;

#[inline]
pub(crate) fn tagged(ptr: *mut DataNode) -> *mut DataNode {
    ((ptr as usize) | FREEZE) as *mut DataNode
}

#[inline]
pub(crate) fn untagged(ptr: *mut DataNode) -> *mut DataNode {
    ((ptr as usize) & !FREEZE) as *mut DataNode
}

#[inline]
pub(crate) fn is_tagged(ptr: *mut DataNode) -> bool {
    (ptr as usize) & FREEZE != 0
}

/// A node of the single shared, globally ordered data layer.
///
/// The list collectively owns all live nodes; head and tail sentinels
/// (`i64::MIN` / `i64::MAX`) are permanent.
#[repr(align(64))]
pub struct DataNode {
    pub(crate) key: i64,
    /// Payload slot; meaningful only while `state == LIVE`.
    pub(crate) value: AtomicU64,
    pub(crate) state: AtomicU8,
    pub(crate) next: AtomicPtr<DataNode>,
    /// Back-pointer for traversal restart. Not an ownership edge and only
    /// best-effort maintained.
    pub(crate) prev: AtomicPtr<DataNode>,
    /// Set on every successful insert, undelete or delete; cleared exactly
    /// once by the data-layer helper when it fans the change out to zones.
    pub(crate) fresh: AtomicBool,
    /// Greatest index height any zone gave this key. Read by the helper's
    /// short-node heuristic.
    pub(crate) level: AtomicU32,
    /// Count of index and intermediate nodes (across all zones) still
    /// pointing here. Eligible for physical unlink only at zero.
    pub(crate) references: AtomicI32,
    pub(crate) lock: TTas<()>,
}

impl DataNode {
    fn new(key: i64, value: u64, next: *mut DataNode, prev: *mut DataNode) -> Self {
        Self {
            key,
            value: AtomicU64::new(value),
            state: AtomicU8::new(LIVE),
            next: AtomicPtr::new(next),
            prev: AtomicPtr::new(prev),
            // Automatically fresh on construction.
            fresh: AtomicBool::new(true),
            level: AtomicU32::new(0),
            references: AtomicI32::new(0),
            lock: TTas::new(()),
        }
    }

    /// Heap-allocate a node already linked between `prev` and `next`.
    pub(crate) fn alloc(key: i64, value: u64, prev: *mut DataNode, next: *mut DataNode) -> *mut DataNode {
        Box::into_raw(Box::new(Self::new(key, value, next, prev)))
    }

    /// Heap-allocate a permanent sentinel. Sentinels are never fresh and
    /// never retired.
    pub(crate) fn alloc_sentinel(key: i64) -> *mut DataNode {
        let node = Box::into_raw(Box::new(Self::new(key, 0, std::ptr::null_mut(), std::ptr::null_mut())));
        unsafe { (*node).fresh.store(false, Ordering::Relaxed) };
        node
    }

    #[inline]
    pub(crate) fn is_live(&self) -> bool {
        self.state.load(Ordering::Acquire) == LIVE
    }

    /// Logical delete: LIVE -> TOMB. Returns false if someone got there
    /// first or the node is already FINAL.
    #[inline]
    pub(crate) fn try_delete(&self) -> bool {
        self.state
            .compare_exchange(LIVE, TOMB, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Undelete: TOMB -> LIVE, then publish the new value. A reader between
    /// the two sees a TOMB-era value on a LIVE node, which is fine for set
    /// semantics (membership is decided by state alone).
    #[inline]
    pub(crate) fn try_resurrect(&self, value: u64) -> bool {
        if self
            .state
            .compare_exchange(TOMB, LIVE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.value.store(value, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Claim the node for physical unlink: TOMB -> FINAL. Only the
    /// data-layer helper calls this; success makes resurrection impossible.
    #[inline]
    pub(crate) fn try_finalize(&self) -> bool {
        self.state
            .compare_exchange(TOMB, FINAL, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

// SAFETY: all mutable fields are atomics or lock-guarded.
unsafe impl Send for DataNode {}
unsafe impl Sync for DataNode {}

/// Per-zone skeleton over the data layer. Decouples index tower height
/// changes from data-layer churn: towers reference these, these reference
/// data nodes.
pub(crate) struct IntermediateNode {
    pub(crate) key: i64,
    pub(crate) next: AtomicPtr<IntermediateNode>,
    /// Non-owning reference into the shared data layer. Swapped by the
    /// zone's maintenance thread when a removed key is re-added with a new
    /// data node before the old one is unlinked.
    pub(crate) node: AtomicPtr<DataNode>,
    /// Number of index levels this key occupies in the zone (0 = none).
    pub(crate) level: AtomicU32,
    /// Logical deletion within this zone's view.
    pub(crate) marked: AtomicBool,
}

unsafe impl Send for IntermediateNode {}
unsafe impl Sync for IntermediateNode {}

/// One level of a per-zone index tower. A tower is the chain of `down`
/// links belonging to one key.
pub(crate) struct IndexNode {
    pub(crate) key: i64,
    pub(crate) right: AtomicPtr<IndexNode>,
    pub(crate) down: AtomicPtr<IndexNode>,
    /// Non-owning reference to this key's intermediate node in the zone.
    pub(crate) intermed: *mut IntermediateNode,
    /// Direct shortcut to the data node, so retirement can release the
    /// reference without chasing `intermed`.
    pub(crate) node: *mut DataNode,
}

unsafe impl Send for IndexNode {}
unsafe impl Sync for IndexNode {}

/// Arena-allocate an intermediate node and take a reference on its data
/// node. The reference is released when the node is reclaimed after
/// hazard-pointer retirement.
pub(crate) unsafe fn mnode_new(
    arena: &ZoneArena,
    key: i64,
    next: *mut IntermediateNode,
    node: *mut DataNode,
    level: u32,
) -> *mut IntermediateNode {
    let ptr = arena.alloc(std::mem::size_of::<IntermediateNode>()) as *mut IntermediateNode;
    ptr.write(IntermediateNode {
        key,
        next: AtomicPtr::new(next),
        node: AtomicPtr::new(node),
        level: AtomicU32::new(level),
        marked: AtomicBool::new(false),
    });
    (*node).references.fetch_add(1, Ordering::AcqRel);
    ptr
}

/// Arena-allocate an index node and take a reference on its data node.
pub(crate) unsafe fn inode_new(
    arena: &ZoneArena,
    key: i64,
    right: *mut IndexNode,
    down: *mut IndexNode,
    intermed: *mut IntermediateNode,
    node: *mut DataNode,
) -> *mut IndexNode {
    let ptr = arena.alloc(std::mem::size_of::<IndexNode>()) as *mut IndexNode;
    ptr.write(IndexNode {
        key,
        right: AtomicPtr::new(right),
        down: AtomicPtr::new(down),
        intermed,
        node,
    });
    (*node).references.fetch_add(1, Ordering::AcqRel);
    ptr
}

/// Tower-height generator, hardwired to p=0.5, min 1.
///
/// Xorshift generators are extremely fast non-cryptographically-secure
/// random number generators (Marsaglia, "Xorshift RNGs", JSS 8(14), 2003).
/// The height is the run of trailing one-bits of the output, which gives
/// the geometric distribution a skip list wants, and the whole thing is
/// reproducible from the seed.
pub(crate) struct LevelRng {
    y: u32,
}

impl LevelRng {
    pub(crate) fn new(seed: u32) -> Self {
        Self {
            y: if seed == 0 { 2_463_534_242 } else { seed },
        }
    }

    #[inline]
    fn next(&mut self) -> u32 {
        let mut y = self.y;
        y ^= y << 13;
        y ^= y >> 17;
        y ^= y << 5;
        self.y = y;
        y
    }

    /// Random tower height in `1..=max`.
    pub(crate) fn level(&mut self, max: u32) -> u32 {
        let mut temp = self.next();
        let mut level = 1u32;
        loop {
            temp >>= 1;
            if temp & 1 == 0 {
                break;
            }
            level += 1;
        }
        level.min(max.max(1))
    }
}
