//! Test-and-test-and-set spinlock.
//!
//! Guards the per-node critical sections of the lazy-locking data layer,
//! the interior of the zone arena, and the set's worker list. Hold times
//! are a handful of loads and stores, so spinning beats parking a thread;
//! waiters read the cached flag and back off exponentially, yielding once
//! the contention outlasts a short spin budget.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crossbeam_utils::Backoff;

pub(crate) struct TTas<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for TTas<T> {}
unsafe impl<T: ?Sized + Send> Sync for TTas<T> {}

impl<T> TTas<T> {
    pub(crate) const fn new(data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the lock. Attempts the swap only when the cached flag reads
    /// free, so waiters spin locally instead of bouncing the line.
    #[inline]
    pub(crate) fn lock(&self) -> TTasGuard<'_, T> {
        let backoff = Backoff::new();
        loop {
            if !self.locked.swap(true, Ordering::Acquire) {
                return TTasGuard { lock: self };
            }
            while self.locked.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }
    }
}

/// Exclusive access to the locked data; releases the lock on drop.
pub(crate) struct TTasGuard<'a, T: ?Sized> {
    lock: &'a TTas<T>,
}

impl<T: ?Sized> Deref for TTasGuard<'_, T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for TTasGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for TTasGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
