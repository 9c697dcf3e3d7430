//! Per-zone index: an intermediate list mirroring the data layer plus a
//! tower-structured skip index above it.
//!
//! Everything here is written by exactly one thread, the zone's maintenance
//! thread, which drains the zone's update queue and rebalances. Application
//! threads only read (descend), so writer-side links are plain stores with
//! release ordering and no link ever needs a CAS. Removed index and
//! intermediate nodes are pushed on the zone's garbage queue for the GC
//! thread; their arena memory outlives them, so a reader chasing a stale
//! pointer reads consistent (if outdated) fields.
//!
//! Shape maintenance combines two mechanisms: inserts get a randomized
//! tower height up front, and a background raise pass promotes the middle
//! of any run of same-height neighbors one level up, while a lower pass
//! drops the whole bottom level once deleted towers dominate.

use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use crate::arena::ZoneArena;
use crate::node::{inode_new, mnode_new, DataNode, IndexNode, IntermediateNode, LevelRng};
use crate::queue::{Garbage, Job, JobQueue};

/// One zone's view of the set: intermediate list, index towers, arena.
pub(crate) struct ZoneIndex {
    zone: usize,
    pub(crate) arena: ZoneArena,
    /// Sentinel of the topmost index level.
    sentinel: AtomicPtr<IndexNode>,
    height: AtomicU32,
    /// Head of the (maintenance-private) intermediate list.
    msentinel: *mut IntermediateNode,
    /// Data-layer head, which every sentinel stands in for.
    head: *mut DataNode,
}

unsafe impl Send for ZoneIndex {}
unsafe impl Sync for ZoneIndex {}

impl ZoneIndex {
    pub(crate) fn new(zone: usize, arena_capacity: usize, head: *mut DataNode) -> Self {
        let arena = ZoneArena::new(zone, arena_capacity);
        let msentinel = unsafe { mnode_new(&arena, i64::MIN, std::ptr::null_mut(), head, 1) };
        let isentinel = unsafe {
            inode_new(
                &arena,
                i64::MIN,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                msentinel,
                head,
            )
        };
        Self {
            zone,
            arena,
            sentinel: AtomicPtr::new(isentinel),
            height: AtomicU32::new(1),
            msentinel,
            head,
        }
    }

    pub(crate) fn height(&self) -> u32 {
        self.height.load(Ordering::Acquire)
    }

    /// Reader-side descent: returns the intermediate node of the closest key
    /// strictly below `key` this zone's index can point at. The intermediate
    /// node (not its data pointer) is the hand-off because its arena memory
    /// is never recycled, so the data layer can validate the data pointer
    /// from it after publishing a hazard.
    pub(crate) fn descend(&self, key: i64) -> *mut IntermediateNode {
        unsafe {
            let mut inode = self.sentinel.load(Ordering::Acquire);
            let mut entry = self.msentinel;
            while !inode.is_null() {
                let mut right = (*inode).right.load(Ordering::Acquire);
                while !right.is_null() && (*right).key < key {
                    inode = right;
                    right = (*inode).right.load(Ordering::Acquire);
                }
                entry = (*inode).intermed;
                inode = (*inode).down.load(Ordering::Acquire);
            }
            entry
        }
    }

    /// Apply one fanned-out data-layer change to this zone.
    pub(crate) fn apply_job(
        &self,
        job: &Job,
        rng: &mut LevelRng,
        garbage: &JobQueue<Garbage>,
        max_height: u32,
    ) {
        match *job {
            Job::Insert { key, node } => unsafe { self.insert(key, node, rng, garbage, max_height) },
            Job::Remove { key, node } => unsafe { self.remove(key, node) },
        }
    }

    unsafe fn insert(
        &self,
        key: i64,
        node: *mut DataNode,
        rng: &mut LevelRng,
        garbage: &JobQueue<Garbage>,
        max_height: u32,
    ) {
        let (mpred, mcurr) = self.locate_intermediate(key);
        if !mcurr.is_null() && (*mcurr).key == key {
            let current = (*mcurr).node.load(Ordering::Acquire);
            if current != node {
                // The key died, was physically still around, and came back
                // as a different data node. Retire the towers that pin the
                // old node and repoint the intermediate entry.
                self.unlink_towers(key, garbage);
                (*mcurr).level.store(0, Ordering::Release);
                (*mcurr).node.store(node, Ordering::Release);
                (*node).references.fetch_add(1, Ordering::AcqRel);
                (*current).references.fetch_sub(1, Ordering::AcqRel);
            }
            (*mcurr).marked.store(false, Ordering::Release);
            if (*mcurr).level.load(Ordering::Acquire) == 0 {
                self.build_tower(mcurr, rng, max_height);
            }
        } else {
            let mnode = mnode_new(&self.arena, key, mcurr, node, 0);
            (*mpred).next.store(mnode, Ordering::Release);
            self.build_tower(mnode, rng, max_height);
        }
    }

    unsafe fn remove(&self, key: i64, node: *mut DataNode) {
        let (_, mcurr) = self.locate_intermediate(key);
        if !mcurr.is_null() && (*mcurr).key == key && (*mcurr).node.load(Ordering::Acquire) == node {
            (*mcurr).marked.store(true, Ordering::Release);
        }
    }

    unsafe fn locate_intermediate(&self, key: i64) -> (*mut IntermediateNode, *mut IntermediateNode) {
        let mut pred = self.msentinel;
        let mut curr = (*pred).next.load(Ordering::Acquire);
        while !curr.is_null() && (*curr).key < key {
            pred = curr;
            curr = (*curr).next.load(Ordering::Acquire);
        }
        (pred, curr)
    }

    /// Record the rightmost index node with key strictly below `key` at each
    /// of the lowest `levels` levels. `preds[0]` is the bottom level.
    unsafe fn collect_preds(&self, key: i64, levels: u32) -> Vec<*mut IndexNode> {
        let mut preds = vec![std::ptr::null_mut(); levels as usize];
        let mut inode = self.sentinel.load(Ordering::Acquire);
        let mut lvl = self.height.load(Ordering::Acquire) as i64 - 1;
        while !inode.is_null() {
            let mut right = (*inode).right.load(Ordering::Acquire);
            while !right.is_null() && (*right).key < key {
                inode = right;
                right = (*inode).right.load(Ordering::Acquire);
            }
            if lvl >= 0 && (lvl as u32) < levels {
                preds[lvl as usize] = inode;
            }
            inode = (*inode).down.load(Ordering::Acquire);
            lvl -= 1;
        }
        preds
    }

    /// Add one index level: a taller sentinel stacked on the old top.
    unsafe fn grow(&self) {
        let old = self.sentinel.load(Ordering::Acquire);
        let top = inode_new(
            &self.arena,
            i64::MIN,
            std::ptr::null_mut(),
            old,
            self.msentinel,
            self.head,
        );
        self.sentinel.store(top, Ordering::Release);
        let height = self.height.fetch_add(1, Ordering::AcqRel) + 1;
        log::debug!("zone {} index grew to height {}", self.zone, height);
    }

    /// Build a randomized-height tower for a towerless intermediate node.
    unsafe fn build_tower(&self, mnode: *mut IntermediateNode, rng: &mut LevelRng, max_height: u32) {
        let key = (*mnode).key;
        let node = (*mnode).node.load(Ordering::Acquire);
        let h = rng
            .level(max_height)
            .min(self.height.load(Ordering::Acquire) + 1);
        while self.height.load(Ordering::Acquire) < h {
            self.grow();
        }
        let preds = self.collect_preds(key, h);
        let mut below: *mut IndexNode = std::ptr::null_mut();
        let mut built = 0u32;
        for pred in preds {
            let right = (*pred).right.load(Ordering::Acquire);
            if !right.is_null() && (*right).key == key {
                break;
            }
            let inode = inode_new(&self.arena, key, right, below, mnode, node);
            (*pred).right.store(inode, Ordering::Release);
            below = inode;
            built += 1;
        }
        if built > 0 {
            (*mnode).level.store(built, Ordering::Release);
            (*node).level.fetch_max(built, Ordering::AcqRel);
        }
    }

    /// Unlink every index node carrying `key` and queue them as garbage.
    unsafe fn unlink_towers(&self, key: i64, garbage: &JobQueue<Garbage>) {
        let mut pred = self.sentinel.load(Ordering::Acquire);
        while !pred.is_null() {
            loop {
                let right = (*pred).right.load(Ordering::Acquire);
                if right.is_null() || (*right).key > key {
                    break;
                }
                if (*right).key == key {
                    (*pred)
                        .right
                        .store((*right).right.load(Ordering::Acquire), Ordering::Release);
                    garbage.push(Garbage::Index(right));
                    break;
                }
                pred = right;
            }
            pred = (*pred).down.load(Ordering::Acquire);
        }
    }

    /// Walk the intermediate list once: retire towers of marked entries,
    /// unlink tower-less marked entries, and count the population. Returns
    /// `(tall_deleted, alive)` for the lower-pass trigger.
    pub(crate) fn sweep(&self, garbage: &JobQueue<Garbage>) -> (u64, u64) {
        let mut tall_deleted = 0u64;
        let mut alive = 0u64;
        unsafe {
            let mut mpred = self.msentinel;
            let mut mcurr = (*mpred).next.load(Ordering::Acquire);
            while !mcurr.is_null() {
                let next = (*mcurr).next.load(Ordering::Acquire);
                if (*mcurr).marked.load(Ordering::Acquire) {
                    if (*mcurr).level.load(Ordering::Acquire) > 0 {
                        tall_deleted += 1;
                        self.unlink_towers((*mcurr).key, garbage);
                        (*mcurr).level.store(0, Ordering::Release);
                        // The unlink gate in the helper needs to see the
                        // height contribution withdrawn.
                        let node = (*mcurr).node.load(Ordering::Acquire);
                        (*node).level.store(0, Ordering::Release);
                    } else {
                        (*mpred).next.store(next, Ordering::Release);
                        garbage.push(Garbage::Intermediate(mcurr));
                        mcurr = next;
                        continue;
                    }
                } else {
                    alive += 1;
                }
                mpred = mcurr;
                mcurr = next;
            }
        }
        (tall_deleted, alive)
    }

    /// One rebalancing pass: promote the middle of every run of `run`
    /// consecutive same-height neighbors, at the intermediate level and at
    /// each index level.
    pub(crate) fn raise_pass(&self, run: usize, max_height: u32) {
        unsafe {
            self.raise_intermediate(run, max_height);
            let mut lvl = 0;
            while lvl < self.height.load(Ordering::Acquire) {
                self.raise_level(lvl, run, max_height);
                lvl += 1;
            }
        }
    }

    /// Promote tower-less intermediate entries: any `run` unmarked neighbors
    /// with no tower get their middle one a bottom-level index node.
    unsafe fn raise_intermediate(&self, run: usize, max_height: u32) {
        if max_height < 1 {
            return;
        }
        let mut window: Vec<*mut IntermediateNode> = Vec::with_capacity(run);
        let mut mcurr = (*self.msentinel).next.load(Ordering::Acquire);
        while !mcurr.is_null() {
            let eligible = !(*mcurr).marked.load(Ordering::Acquire)
                && (*mcurr).level.load(Ordering::Acquire) == 0;
            if eligible {
                window.push(mcurr);
                if window.len() == run {
                    let mid = window[run / 2];
                    self.promote_intermediate(mid);
                    window.clear();
                }
            } else {
                window.clear();
            }
            mcurr = (*mcurr).next.load(Ordering::Acquire);
        }
    }

    unsafe fn promote_intermediate(&self, mnode: *mut IntermediateNode) {
        let key = (*mnode).key;
        let node = (*mnode).node.load(Ordering::Acquire);
        let preds = self.collect_preds(key, 1);
        let pred = preds[0];
        let right = (*pred).right.load(Ordering::Acquire);
        if !right.is_null() && (*right).key == key {
            return;
        }
        let inode = inode_new(&self.arena, key, right, std::ptr::null_mut(), mnode, node);
        (*pred).right.store(inode, Ordering::Release);
        (*mnode).level.store(1, Ordering::Release);
        (*node).level.fetch_max(1, Ordering::AcqRel);
    }

    /// Promote tower tops at index level `lvl`: any `run` consecutive nodes
    /// whose towers end exactly here get their middle one a node at
    /// `lvl + 1`, growing a taller sentinel if that level does not exist.
    unsafe fn raise_level(&self, lvl: u32, run: usize, max_height: u32) {
        if lvl + 2 > max_height {
            return;
        }
        let mut window: Vec<*mut IndexNode> = Vec::with_capacity(run);
        let mut inode = (*self.sentinel_at(lvl)).right.load(Ordering::Acquire);
        while !inode.is_null() {
            let mnode = (*inode).intermed;
            let eligible = !(*mnode).marked.load(Ordering::Acquire)
                && (*mnode).level.load(Ordering::Acquire) == lvl + 1;
            if eligible {
                window.push(inode);
                if window.len() == run {
                    self.promote_index(window[run / 2], lvl);
                    window.clear();
                }
            } else {
                window.clear();
            }
            inode = (*inode).right.load(Ordering::Acquire);
        }
    }

    unsafe fn promote_index(&self, below: *mut IndexNode, lvl: u32) {
        if lvl + 1 == self.height.load(Ordering::Acquire) {
            self.grow();
        }
        let key = (*below).key;
        let mnode = (*below).intermed;
        let node = (*below).node;
        let preds = self.collect_preds(key, lvl + 2);
        let pred = preds[lvl as usize + 1];
        let right = (*pred).right.load(Ordering::Acquire);
        if !right.is_null() && (*right).key == key {
            return;
        }
        let inode = inode_new(&self.arena, key, right, below, mnode, node);
        (*pred).right.store(inode, Ordering::Release);
        (*mnode).level.store(lvl + 2, Ordering::Release);
        (*node).level.fetch_max(lvl + 2, Ordering::AcqRel);
    }

    unsafe fn sentinel_at(&self, lvl: u32) -> *mut IndexNode {
        let mut inode = self.sentinel.load(Ordering::Acquire);
        let mut steps = self.height.load(Ordering::Acquire).saturating_sub(lvl + 1);
        while steps > 0 {
            inode = (*inode).down.load(Ordering::Acquire);
            steps -= 1;
        }
        inode
    }

    /// Drop the bottom index level wholesale: detach the level above, retire
    /// every bottom node (sentinel included), and shrink every tower's
    /// recorded height by one.
    pub(crate) fn lower(&self, garbage: &JobQueue<Garbage>) {
        if self.height.load(Ordering::Acquire) <= 1 {
            return;
        }
        unsafe {
            let second = self.sentinel_at(1);
            let bottom = (*second).down.load(Ordering::Acquire);

            // Detach first so readers stop descending into the doomed level.
            let mut inode = second;
            while !inode.is_null() {
                (*inode).down.store(std::ptr::null_mut(), Ordering::Release);
                inode = (*inode).right.load(Ordering::Acquire);
            }

            let mut victims = 0usize;
            let mut inode = bottom;
            while !inode.is_null() {
                let next = (*inode).right.load(Ordering::Acquire);
                garbage.push(Garbage::Index(inode));
                victims += 1;
                inode = next;
            }

            let mut mcurr = self.msentinel;
            while !mcurr.is_null() {
                let level = (*mcurr).level.load(Ordering::Acquire);
                if level > 0 {
                    (*mcurr).level.store(level - 1, Ordering::Release);
                }
                mcurr = (*mcurr).next.load(Ordering::Acquire);
            }

            let height = self.height.fetch_sub(1, Ordering::AcqRel) - 1;
            log::debug!(
                "zone {} lowered index to height {} ({} nodes retired)",
                self.zone,
                height,
                victims
            );
        }
    }
}
