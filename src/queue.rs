//! SPSC job queues connecting the data-layer helper to each zone.
//!
//! Shift-and-reuse-head FIFO after Vyukov: a permanent stub node sits at the
//! head; `push` links at the tail, `pop` advances the head and takes the
//! next node's payload, so both ends are O(1) and pop never allocates.
//!
//! Each queue has exactly one producer and one consumer by construction
//! (helper thread -> maintenance thread for updates, maintenance thread ->
//! GC thread for garbage); the `head`/`tail` cells are only ever touched
//! from their owning side.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::node::{DataNode, IndexNode, IntermediateNode};

/// A pending index-layer change fanned out from the data layer.
pub(crate) enum Job {
    Insert { key: i64, node: *mut DataNode },
    Remove { key: i64, node: *mut DataNode },
}

unsafe impl Send for Job {}

impl Job {
    /// The data node this job pins while it sits in a zone's queue.
    pub(crate) fn node(&self) -> *mut DataNode {
        match *self {
            Job::Insert { node, .. } | Job::Remove { node, .. } => node,
        }
    }
}

/// An index-layer node unlinked by maintenance and awaiting hazard-checked
/// retirement.
pub(crate) enum Garbage {
    Index(*mut IndexNode),
    Intermediate(*mut IntermediateNode),
}

unsafe impl Send for Garbage {}

struct QNode<T> {
    next: AtomicPtr<QNode<T>>,
    payload: Option<T>,
}

impl<T> QNode<T> {
    fn boxed(payload: Option<T>) -> *mut Self {
        Box::into_raw(Box::new(Self {
            next: AtomicPtr::new(ptr::null_mut()),
            payload,
        }))
    }
}

/// Single-producer single-consumer FIFO with a permanent sentinel head.
pub(crate) struct JobQueue<T> {
    /// Consumer side.
    head: UnsafeCell<*mut QNode<T>>,
    /// Producer side.
    tail: UnsafeCell<*mut QNode<T>>,
}

unsafe impl<T: Send> Send for JobQueue<T> {}
unsafe impl<T: Send> Sync for JobQueue<T> {}

impl<T> JobQueue<T> {
    pub(crate) fn new() -> Self {
        let stub = QNode::boxed(None);
        Self {
            head: UnsafeCell::new(stub),
            tail: UnsafeCell::new(stub),
        }
    }

    /// Append at the tail. Producer side only.
    pub(crate) fn push(&self, payload: T) {
        let node = QNode::boxed(Some(payload));
        unsafe {
            let tail = *self.tail.get();
            (*tail).next.store(node, Ordering::Release);
            *self.tail.get() = node;
        }
    }

    /// Advance the head and hand back the next payload. Consumer side only.
    pub(crate) fn pop(&self) -> Option<T> {
        unsafe {
            let head = *self.head.get();
            let next = (*head).next.load(Ordering::Acquire);
            if next.is_null() {
                return None;
            }
            let payload = (*next).payload.take();
            *self.head.get() = next;
            drop(Box::from_raw(head));
            payload
        }
    }
}

impl<T> Drop for JobQueue<T> {
    fn drop(&mut self) {
        unsafe {
            let mut node = *self.head.get();
            while !node.is_null() {
                let next = (*node).next.load(Ordering::Relaxed);
                drop(Box::from_raw(node));
                node = next;
            }
        }
    }
}
