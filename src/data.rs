//! The shared data layer: one globally ordered linked list of every key.
//!
//! This list is the authority on membership. The per-zone index layers above
//! it are advisory accelerators; any answer the set gives comes from walking
//! a suffix of this list. Mutation comes in two disciplines (chosen at
//! construction): lazy locking, which traverses optimistically and commits
//! under per-node TTAS locks after re-validating the link, and lock-free,
//! which commits with CAS and retries.
//!
//! Physical unlinking is centralized in the helper pass, which a single
//! background thread runs: application threads only ever move nodes through
//! the LIVE/TOMB/FINAL state machine, so the list never loses a node to a
//! racing unlink. The helper also fans every fresh change out to each zone's
//! update queue, which is the only channel by which index layers learn about
//! the world.

use std::sync::atomic::Ordering;

use crossbeam_utils::Backoff;

use crate::hazard::{HazardRegistry, ReclaimKind, Retired, RetiredList};
use crate::node::{is_tagged, tagged, untagged, DataNode, IntermediateNode, FINAL, LIVE, TOMB};
use crate::queue::{Job, JobQueue};

/// The traversal window around a key: `pred.key < key <= curr.key`.
struct Window {
    pred: *mut DataNode,
    curr: *mut DataNode,
}

/// Re-validate an optimistic window under the pred-side lock: pred is not
/// being unlinked, its link is not frozen, and curr is still its successor.
unsafe fn validate_link(pred: *mut DataNode, curr: *mut DataNode) -> bool {
    if (*pred).state.load(Ordering::Acquire) == FINAL {
        return false;
    }
    let next = (*pred).next.load(Ordering::Acquire);
    !is_tagged(next) && next == curr
}

/// The shared ordered list, bracketed by permanent sentinels.
pub(crate) struct DataLayer {
    pub(crate) head: *mut DataNode,
    tail: *mut DataNode,
}

unsafe impl Send for DataLayer {}
unsafe impl Sync for DataLayer {}

impl DataLayer {
    pub(crate) fn new() -> Self {
        let tail = DataNode::alloc_sentinel(i64::MAX);
        let head = DataNode::alloc_sentinel(i64::MIN);
        unsafe {
            (*head).next.store(tail, Ordering::Release);
            (*tail).prev.store(head, Ordering::Release);
        }
        Self { head, tail }
    }

    /// Resolve an index-supplied entry hint and publish a hazard for it.
    ///
    /// The hint is an intermediate node, whose arena memory is never
    /// recycled and is therefore always safe to read. The data pointer it
    /// carries is protected first and only then re-read from the hint: if it
    /// is still current the hazard was published before any reclaiming scan
    /// could miss it. A hint that is stale, marked, or no longer a strict
    /// predecessor of `key` falls back to the head sentinel, which is always
    /// valid.
    fn pin_entry(
        &self,
        reg: &HazardRegistry,
        slot: usize,
        hint: *mut IntermediateNode,
        key: i64,
    ) -> *mut DataNode {
        if !hint.is_null() {
            unsafe {
                let entry = (*hint).node.load(Ordering::Acquire);
                reg.protect(slot, 0, entry as usize);
                if entry == self.head {
                    return entry;
                }
                if (*hint).node.load(Ordering::SeqCst) == entry
                    && !(*hint).marked.load(Ordering::SeqCst)
                    && (*entry).key < key
                    && (*entry).state.load(Ordering::Acquire) != FINAL
                    && !is_tagged((*entry).next.load(Ordering::Acquire))
                {
                    return entry;
                }
            }
        }
        reg.protect(slot, 0, self.head as usize);
        self.head
    }

    /// Hand-over-hand hazard walk from a protected start node to the window
    /// around `key`. On return hp0 covers `pred` and hp1 covers `curr`.
    fn locate(&self, reg: &HazardRegistry, slot: usize, start: *mut DataNode, key: i64) -> Window {
        let mut pred = start;
        unsafe {
            'reread: loop {
                let mut curr = untagged((*pred).next.load(Ordering::Acquire));
                loop {
                    if curr.is_null() {
                        return Window { pred, curr };
                    }
                    reg.protect(slot, 1, curr as usize);
                    // The hazard only covers curr if it is still pred's
                    // successor; otherwise re-read through the protected pred.
                    if untagged((*pred).next.load(Ordering::Acquire)) != curr {
                        continue 'reread;
                    }
                    if (*curr).key >= key {
                        return Window { pred, curr };
                    }
                    pred = curr;
                    reg.protect(slot, 0, pred as usize);
                    curr = untagged((*pred).next.load(Ordering::Acquire));
                }
            }
        }
    }

    /// Membership test. Wait-free apart from hazard revalidation: a key is in
    /// the set iff its node exists and is LIVE.
    pub(crate) fn contains(&self, reg: &HazardRegistry, slot: usize, hint: *mut IntermediateNode, key: i64) -> bool {
        let start = self.pin_entry(reg, slot, hint, key);
        let w = self.locate(reg, slot, start, key);
        unsafe { !w.curr.is_null() && (*w.curr).key == key && (*w.curr).state.load(Ordering::Acquire) == LIVE }
    }

    /// Lazy-locking insert: locate optimistically, lock, re-validate, commit.
    pub(crate) fn lazy_add(
        &self,
        reg: &HazardRegistry,
        slot: usize,
        hint: *mut IntermediateNode,
        key: i64,
        value: u64,
    ) -> bool {
        let backoff = Backoff::new();
        loop {
            let start = self.pin_entry(reg, slot, hint, key);
            let w = self.locate(reg, slot, start, key);
            unsafe {
                let curr = w.curr;
                if !curr.is_null()
                    && (*curr).key == key
                    && (*curr).state.load(Ordering::Acquire) != FINAL
                {
                    let _guard = (*curr).lock.lock();
                    if is_tagged((*curr).next.load(Ordering::Acquire)) {
                        backoff.snooze();
                        continue;
                    }
                    match (*curr).state.load(Ordering::Acquire) {
                        LIVE => return false,
                        TOMB => {
                            if (*curr).try_resurrect(value) {
                                (*curr).fresh.store(true, Ordering::Release);
                                return true;
                            }
                            // Finalized under our feet; reinsert in front.
                            backoff.snooze();
                            continue;
                        }
                        _ => {
                            backoff.snooze();
                            continue;
                        }
                    }
                }
                // Absent (or only a FINAL husk remains): splice a new node
                // between pred and curr.
                let pred = w.pred;
                let _guard = (*pred).lock.lock();
                if !validate_link(pred, curr) {
                    backoff.snooze();
                    continue;
                }
                let node = DataNode::alloc(key, value, pred, curr);
                // CAS even under the lock: the helper may freeze pred's link
                // without taking the lock, and a plain store would erase the
                // freeze tag.
                if (*pred)
                    .next
                    .compare_exchange(curr, node, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    if !curr.is_null() {
                        (*curr).prev.store(node, Ordering::Release);
                    }
                    return true;
                }
                drop(Box::from_raw(node));
                backoff.snooze();
            }
        }
    }

    /// Lazy-locking delete: LIVE -> TOMB under the node's lock.
    pub(crate) fn lazy_remove(&self, reg: &HazardRegistry, slot: usize, hint: *mut IntermediateNode, key: i64) -> bool {
        let backoff = Backoff::new();
        loop {
            let start = self.pin_entry(reg, slot, hint, key);
            let w = self.locate(reg, slot, start, key);
            unsafe {
                let curr = w.curr;
                if curr.is_null() || (*curr).key != key {
                    return false;
                }
                match (*curr).state.load(Ordering::Acquire) {
                    TOMB | FINAL => return false,
                    _ => {}
                }
                let _guard = (*curr).lock.lock();
                if is_tagged((*curr).next.load(Ordering::Acquire)) {
                    backoff.snooze();
                    continue;
                }
                if (*curr).try_delete() {
                    (*curr).fresh.store(true, Ordering::Release);
                    return true;
                }
                return false;
            }
        }
    }

    /// Lock-free insert: splice with CAS, resurrect tombstones with CAS.
    pub(crate) fn lf_add(
        &self,
        reg: &HazardRegistry,
        slot: usize,
        hint: *mut IntermediateNode,
        key: i64,
        value: u64,
    ) -> bool {
        let backoff = Backoff::new();
        loop {
            let start = self.pin_entry(reg, slot, hint, key);
            let w = self.locate(reg, slot, start, key);
            unsafe {
                let curr = w.curr;
                if !curr.is_null()
                    && (*curr).key == key
                    && (*curr).state.load(Ordering::Acquire) != FINAL
                {
                    match (*curr).state.load(Ordering::Acquire) {
                        LIVE => return false,
                        TOMB => {
                            if (*curr).try_resurrect(value) {
                                (*curr).fresh.store(true, Ordering::Release);
                                return true;
                            }
                            backoff.spin();
                            continue;
                        }
                        _ => {
                            backoff.spin();
                            continue;
                        }
                    }
                }
                let pred = w.pred;
                let node = DataNode::alloc(key, value, pred, curr);
                // Expecting the untagged successor: fails if pred is frozen
                // or the window moved.
                if (*pred)
                    .next
                    .compare_exchange(curr, node, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    if !curr.is_null() {
                        (*curr).prev.store(node, Ordering::Release);
                    }
                    return true;
                }
                drop(Box::from_raw(node));
                backoff.spin();
            }
        }
    }

    /// Lock-free delete: a single state CAS, no physical change.
    pub(crate) fn lf_remove(&self, reg: &HazardRegistry, slot: usize, hint: *mut IntermediateNode, key: i64) -> bool {
        let start = self.pin_entry(reg, slot, hint, key);
        let w = self.locate(reg, slot, start, key);
        unsafe {
            let curr = w.curr;
            if curr.is_null() || (*curr).key != key {
                return false;
            }
            if (*curr).try_delete() {
                (*curr).fresh.store(true, Ordering::Release);
                true
            } else {
                false
            }
        }
    }

    /// Count LIVE keys. Linear, for diagnostics; concurrent mutation makes
    /// the result a snapshot of no particular instant.
    pub(crate) fn len(&self, reg: &HazardRegistry, slot: usize) -> usize {
        let mut count = 0usize;
        let mut pred = self.head;
        reg.protect(slot, 0, pred as usize);
        unsafe {
            'reread: loop {
                let mut curr = untagged((*pred).next.load(Ordering::Acquire));
                loop {
                    if curr.is_null() {
                        reg.clear(slot);
                        return count;
                    }
                    reg.protect(slot, 1, curr as usize);
                    if untagged((*pred).next.load(Ordering::Acquire)) != curr {
                        continue 'reread;
                    }
                    if curr != self.tail && (*curr).state.load(Ordering::Acquire) == LIVE {
                        count += 1;
                    }
                    pred = curr;
                    reg.protect(slot, 0, pred as usize);
                    curr = untagged((*pred).next.load(Ordering::Acquire));
                }
            }
        }
    }

    /// Set the freeze tag on `node`'s forward link so no successor can be
    /// spliced in behind it.
    unsafe fn freeze(node: *mut DataNode) {
        let backoff = Backoff::new();
        loop {
            let next = (*node).next.load(Ordering::Acquire);
            if is_tagged(next) {
                return;
            }
            if (*node)
                .next
                .compare_exchange(next, tagged(next), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
            backoff.spin();
        }
    }

    /// One pass of the background helper over the whole list.
    ///
    /// Fresh nodes are fanned out to every zone's update queue exactly once.
    /// Stale tombstones that no zone references any more are claimed
    /// (TOMB -> FINAL), frozen, unlinked, and retired through the hazard
    /// registry. Returns the number of nodes fanned out or unlinked.
    pub(crate) fn helper_pass(
        &self,
        reg: &HazardRegistry,
        retired: &mut RetiredList,
        zones: &[&JobQueue<Job>],
    ) -> usize {
        let mut work = 0usize;
        unsafe {
            let mut pred = self.head;
            let mut curr = untagged((*pred).next.load(Ordering::Acquire));
            while !curr.is_null() {
                let succ = untagged((*curr).next.load(Ordering::Acquire));
                if (*curr).fresh.swap(false, Ordering::AcqRel) {
                    let live = (*curr).state.load(Ordering::Acquire) == LIVE;
                    // Each queued job pins the node: one reference per zone,
                    // released by the zone after it applies the job. The
                    // pointer a lagging zone's queue carries can therefore
                    // never dangle.
                    (*curr).references.fetch_add(zones.len() as i32, Ordering::AcqRel);
                    for q in zones {
                        q.push(if live {
                            Job::Insert { key: (*curr).key, node: curr }
                        } else {
                            Job::Remove { key: (*curr).key, node: curr }
                        });
                    }
                    work += 1;
                } else {
                    let state = (*curr).state.load(Ordering::Acquire);
                    let reclaimable = state == FINAL
                        || (state == TOMB
                            && (*curr).references.load(Ordering::Acquire) == 0
                            && (*curr).level.load(Ordering::Acquire) == 0
                            && (*curr).try_finalize());
                    if reclaimable {
                        Self::freeze(curr);
                        let succ = untagged((*curr).next.load(Ordering::Acquire));
                        if (*pred)
                            .next
                            .compare_exchange(curr, succ, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                        {
                            (*succ).prev.store(pred, Ordering::Release);
                            retired.retire(
                                reg,
                                Retired {
                                    addr: curr as usize,
                                    kind: ReclaimKind::Data,
                                },
                            );
                            work += 1;
                            curr = succ;
                            continue;
                        }
                        // A fresh insert moved in behind pred; the node stays
                        // FINAL and frozen, next pass unlinks it.
                    }
                }
                pred = curr;
                curr = succ;
            }
        }
        work
    }
}

impl Drop for DataLayer {
    fn drop(&mut self) {
        // Teardown: every remaining node, sentinels included, goes back to
        // the heap. Unlinked nodes were retired through the registry and are
        // not reachable from head any more.
        unsafe {
            let mut node = self.head;
            while !node.is_null() {
                let next = untagged((*node).next.load(Ordering::Relaxed));
                drop(Box::from_raw(node));
                node = next;
            }
        }
    }
}
