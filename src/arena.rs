//! Per-zone bump allocator for index and intermediate nodes.
//!
//! One arena is deployed per zone. General-purpose allocation is far too
//! slow (and far too remote) for index-node churn, so the arena is a linear
//! allocator with three alterations:
//!   - it can chain new buffers when the current one fills,
//!   - buffers are sized and aligned for the zone they serve,
//!   - requests are rounded to half or full cache lines so index and
//!     intermediate nodes never straddle a line.
//!
//! `dealloc_last` only reclaims the single most recent allocation (stack
//! discipline); everything else is held until the arena drops. Retired nodes
//! are coordinated through the hazard registry instead, and their backing
//! memory is released wholesale at teardown. That is what makes it safe for
//! readers to chase stale index pointers: arena memory is never unmapped or
//! recycled mid-flight.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};

use crate::ttas::TTas;

// Cache line sizes per architecture.
// x86/x86_64: 64B, aarch64: 128B (Apple M-series / Neoverse), s390x: 256B.
#[cfg(target_arch = "s390x")]
pub(crate) const CACHE_LINE: usize = 256;
#[cfg(target_arch = "aarch64")]
pub(crate) const CACHE_LINE: usize = 128;
#[cfg(not(any(target_arch = "s390x", target_arch = "aarch64")))]
pub(crate) const CACHE_LINE: usize = 64;

struct Buffer {
    start: *mut u8,
    cap: usize,
}

impl Buffer {
    fn layout(cap: usize) -> Layout {
        // Arena capacities are multiples of the cache line by construction.
        Layout::from_size_align(cap, CACHE_LINE).expect("arena layout")
    }

    fn new(cap: usize) -> Self {
        let layout = Self::layout(cap);
        // Zone-local backing memory is non-negotiable: if we cannot get it,
        // there is no useful degraded mode.
        let start = unsafe { alloc_zeroed(layout) };
        if start.is_null() {
            handle_alloc_error(layout);
        }
        Self { start, cap }
    }
}

struct ArenaInner {
    buf: Buffer,
    /// Offset of the first free byte in `buf`.
    cur: usize,
    /// Most recent allocation, for the LIFO fast path of `dealloc_last`.
    last: *mut u8,
    last_size: usize,
    last_alloc_half: bool,
    /// Full buffers kept alive until teardown; never compacted.
    other_buffers: Vec<Buffer>,
}

/// Linear allocator serving one zone's index and intermediate nodes.
pub(crate) struct ZoneArena {
    zone: usize,
    inner: TTas<ArenaInner>,
}

unsafe impl Send for ZoneArena {}
unsafe impl Sync for ZoneArena {}

fn align_up(size: usize, alignment: usize) -> usize {
    size + (alignment - (size % alignment)) % alignment
}

fn request_alignment(size: usize) -> usize {
    if size <= CACHE_LINE / 2 {
        CACHE_LINE / 2
    } else {
        CACHE_LINE
    }
}

impl ZoneArena {
    pub(crate) fn new(zone: usize, capacity: usize) -> Self {
        let cap = align_up(capacity.max(CACHE_LINE), CACHE_LINE);
        Self {
            zone,
            inner: TTas::new(ArenaInner {
                buf: Buffer::new(cap),
                cur: 0,
                last: std::ptr::null_mut(),
                last_size: 0,
                last_alloc_half: false,
                other_buffers: Vec::new(),
            }),
        }
    }

    /// Service an allocation request of `size` bytes. The returned memory is
    /// zeroed, aligned to a half or full cache line, and lives until the
    /// arena drops.
    pub(crate) fn alloc(&self, size: usize) -> *mut u8 {
        let mut inner = self.inner.lock();
        let alignment = request_alignment(size);

        // If the last allocation took half a line and this one needs a full
        // line, skip the open half so the request does not straddle lines.
        if inner.last_alloc_half && alignment == CACHE_LINE {
            inner.cur += CACHE_LINE / 2;
            inner.last_alloc_half = false;
        } else if !inner.last_alloc_half && alignment == CACHE_LINE / 2 {
            inner.last_alloc_half = true;
        }

        let aligned = align_up(size, alignment);
        if inner.cur + aligned > inner.buf.cap {
            self.grow(&mut inner, aligned);
        }

        let ptr = unsafe { inner.buf.start.add(inner.cur) };
        inner.last = ptr;
        inner.last_size = aligned;
        inner.last_alloc_half = alignment == CACHE_LINE / 2;
        inner.cur += aligned;
        ptr
    }

    /// Reclaim `ptr` only if it was the most recent allocation; otherwise
    /// this is a no-op and the space is recovered at teardown.
    ///
    /// Index retirement goes through the hazard registry and never returns
    /// memory here, since readers may still chase stale pointers into it.
    #[allow(dead_code)]
    pub(crate) fn dealloc_last(&self, ptr: *mut u8, size: usize) {
        let mut inner = self.inner.lock();
        let alignment = request_alignment(size);
        let aligned = align_up(size, alignment);
        if !ptr.is_null() && ptr == inner.last && aligned == inner.last_size {
            inner.cur -= aligned;
            unsafe { std::ptr::write_bytes(ptr, 0, aligned) };
            inner.last = std::ptr::null_mut();
            inner.last_size = 0;
            if inner.last_alloc_half && alignment == CACHE_LINE / 2 {
                inner.last_alloc_half = false;
            }
        }
    }

    /// Number of backing buffers currently alive (1 until the first growth).
    pub(crate) fn buffers(&self) -> usize {
        let inner = self.inner.lock();
        inner.other_buffers.len() + 1
    }

    fn grow(&self, inner: &mut ArenaInner, need: usize) {
        let cap = align_up(inner.buf.cap.max(need), CACHE_LINE);
        log::debug!(
            "zone {} arena exhausted, chaining new {} byte buffer (total {})",
            self.zone,
            cap,
            inner.other_buffers.len() + 2
        );
        let fresh = Buffer::new(cap);
        let old = std::mem::replace(&mut inner.buf, fresh);
        inner.other_buffers.push(old);
        inner.cur = 0;
        inner.last = std::ptr::null_mut();
        inner.last_size = 0;
        inner.last_alloc_half = false;
    }
}

impl Drop for ZoneArena {
    fn drop(&mut self) {
        let inner = self.inner.lock();
        unsafe {
            for buf in &inner.other_buffers {
                dealloc(buf.start, Buffer::layout(buf.cap));
            }
            dealloc(inner.buf.start, Buffer::layout(inner.buf.cap));
        }
    }
}
