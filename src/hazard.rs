//! Hazard-pointer registry and deferred reclamation.
//!
//! A process-wide (per set) table of per-thread slots, two hazard pointers
//! each. Retiring threads batch pointers in a `RetiredList`; once the list
//! crosses its depth threshold a `scan` snapshots every active slot and
//! either reclaims each retired pointer or procrastinates it back onto the
//! list. A pointer that stays hazarded simply accumulates; `scan` never
//! blocks.
//!
//! Reclamation is dispatched by kind:
//! - data nodes give their `Box` back,
//! - index and intermediate nodes release the reference they took on their
//!   data node (their arena memory is returned wholesale at teardown, never
//!   recycled mid-flight).

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

use crate::node::{DataNode, IndexNode, IntermediateNode};

/// Hazard pointers per registered thread.
pub(crate) const HAZARDS_PER_SLOT: usize = 2;

#[repr(align(64))]
struct HazardSlot {
    active: AtomicBool,
    hp: [AtomicUsize; HAZARDS_PER_SLOT],
}

impl HazardSlot {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            hp: [AtomicUsize::new(0), AtomicUsize::new(0)],
        }
    }
}

/// Fixed table of hazard slots, one per registered thread.
pub(crate) struct HazardRegistry {
    slots: Box<[HazardSlot]>,
}

impl HazardRegistry {
    pub(crate) fn new(max_threads: usize) -> Self {
        let slots = (0..max_threads.max(1))
            .map(|_| HazardSlot::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { slots }
    }

    pub(crate) fn max_threads(&self) -> usize {
        self.slots.len()
    }

    /// Claim a free slot for the calling thread. `None` when the table is
    /// full.
    pub(crate) fn acquire(&self) -> Option<usize> {
        for (i, slot) in self.slots.iter().enumerate() {
            if !slot.active.load(Ordering::Relaxed)
                && slot
                    .active
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                return Some(i);
            }
        }
        None
    }

    /// Release a slot. Clears both hazard pointers first.
    pub(crate) fn release(&self, slot: usize) {
        let s = &self.slots[slot];
        for hp in &s.hp {
            hp.store(0, Ordering::Release);
        }
        s.active.store(false, Ordering::Release);
    }

    /// Publish `ptr` in the given hazard position. SeqCst so a concurrent
    /// scan either sees the pointer or the protected node is still
    /// reachable from the caller's validated source.
    #[inline]
    pub(crate) fn protect(&self, slot: usize, which: usize, ptr: usize) {
        self.slots[slot].hp[which].store(ptr, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn clear(&self, slot: usize) {
        for hp in &self.slots[slot].hp {
            hp.store(0, Ordering::Release);
        }
    }

    /// Copy every active slot's non-null hazard pointers into `out`.
    fn snapshot(&self, out: &mut Vec<usize>) {
        out.clear();
        for slot in self.slots.iter() {
            if !slot.active.load(Ordering::Acquire) {
                continue;
            }
            for hp in &slot.hp {
                let v = hp.load(Ordering::SeqCst);
                if v != 0 {
                    out.push(v);
                }
            }
        }
    }
}

/// What a retired pointer is, and therefore how to reclaim it.
#[derive(Clone, Copy)]
pub(crate) enum ReclaimKind {
    Data,
    Index,
    Intermediate,
}

/// A pointer whose memory must not be touched again by its retirer.
#[derive(Clone, Copy)]
pub(crate) struct Retired {
    pub(crate) addr: usize,
    pub(crate) kind: ReclaimKind,
}

unsafe impl Send for Retired {}

/// Release one reference on the data node an index or intermediate node was
/// pointing at. The count reflects live pointers, so it is released here at
/// reclamation time, not at logical remove.
unsafe fn release_reference(references: &AtomicI32) {
    let old = references.fetch_sub(1, Ordering::AcqRel);
    debug_assert!(old > 0, "data node reference count went negative");
}

/// Reclaim a retired pointer that no hazard slot references.
///
/// # Safety
///
/// `r.addr` must be a pointer previously produced by this crate for the
/// matching kind, retired exactly once, and unreachable from any traversal.
pub(crate) unsafe fn reclaim(r: Retired) {
    match r.kind {
        ReclaimKind::Data => {
            drop(Box::from_raw(r.addr as *mut DataNode));
        }
        ReclaimKind::Index => {
            let inode = r.addr as *mut IndexNode;
            release_reference(&(*(*inode).node).references);
        }
        ReclaimKind::Intermediate => {
            let mnode = r.addr as *mut IntermediateNode;
            let node = (*mnode).node.load(Ordering::Acquire);
            release_reference(&(*node).references);
        }
    }
}

/// Bounded buffer of retired-but-not-yet-reclaimed pointers. One per
/// retiring thread (the data-layer helper and each zone's GC thread).
pub(crate) struct RetiredList {
    items: Vec<Retired>,
    threshold: usize,
    scratch: Vec<usize>,
}

impl RetiredList {
    pub(crate) fn new(threshold: usize) -> Self {
        Self {
            items: Vec::new(),
            threshold: threshold.max(1),
            scratch: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    /// Append a retired pointer; scan when the list is deep enough.
    pub(crate) fn retire(&mut self, registry: &HazardRegistry, r: Retired) {
        self.items.push(r);
        if self.items.len() >= self.threshold {
            self.scan(registry);
        }
    }

    /// Compare retired candidates against the registry's live hazard
    /// pointers, reclaiming the clear ones and procrastinating the rest.
    pub(crate) fn scan(&mut self, registry: &HazardRegistry) {
        registry.snapshot(&mut self.scratch);
        let candidates = std::mem::take(&mut self.items);
        let mut reclaimed = 0usize;
        for r in candidates {
            if self.scratch.contains(&r.addr) {
                self.items.push(r);
            } else {
                unsafe { reclaim(r) };
                reclaimed += 1;
            }
        }
        log::trace!(
            "hazard scan reclaimed {} pointers, {} procrastinated",
            reclaimed,
            self.items.len()
        );
    }

    /// Reclaim everything unconditionally. Only valid once no thread can
    /// hold a hazard pointer into the set (teardown after joins).
    pub(crate) unsafe fn drain_all(&mut self) {
        for r in self.items.drain(..) {
            reclaim(r);
        }
    }

    /// Hand the remaining entries to the owner that outlives this list.
    pub(crate) fn take_remaining(&mut self) -> Vec<Retired> {
        std::mem::take(&mut self.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::DataNode;

    #[test]
    fn acquire_release_slots() {
        let reg = HazardRegistry::new(2);
        let a = reg.acquire().unwrap();
        let b = reg.acquire().unwrap();
        assert_ne!(a, b);
        assert!(reg.acquire().is_none());
        reg.release(a);
        assert_eq!(reg.acquire(), Some(a));
    }

    #[test]
    fn hazarded_pointer_is_procrastinated() {
        let reg = HazardRegistry::new(4);
        let slot = reg.acquire().unwrap();
        let node = DataNode::alloc(1, 1, std::ptr::null_mut(), std::ptr::null_mut());
        reg.protect(slot, 0, node as usize);

        let mut retired = RetiredList::new(1);
        retired.retire(
            &reg,
            Retired {
                addr: node as usize,
                kind: ReclaimKind::Data,
            },
        );
        // Still hazarded: scan must not have freed it.
        assert_eq!(retired.len(), 1);
        assert_eq!(unsafe { (*node).key }, 1);

        reg.clear(slot);
        retired.scan(&reg);
        assert_eq!(retired.len(), 0);
        reg.release(slot);
    }

    #[test]
    fn clear_pointer_is_reclaimed_at_threshold() {
        let reg = HazardRegistry::new(4);
        let mut retired = RetiredList::new(3);
        for i in 0..2 {
            let node = DataNode::alloc(i, 0, std::ptr::null_mut(), std::ptr::null_mut());
            retired.retire(
                &reg,
                Retired {
                    addr: node as usize,
                    kind: ReclaimKind::Data,
                },
            );
        }
        assert_eq!(retired.len(), 2);
        let node = DataNode::alloc(9, 0, std::ptr::null_mut(), std::ptr::null_mut());
        retired.retire(
            &reg,
            Retired {
                addr: node as usize,
                kind: ReclaimKind::Data,
            },
        );
        assert_eq!(retired.len(), 0);
    }
}
