use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicI64, Ordering};

// Process-wide counters. Global allocators may not use `thread_local!` (it
// registers TLS destructors), so memory usage is tracked with atomics and the
// collector reads deltas around each frame.
static CURRENT: AtomicI64 = AtomicI64::new(0);
static PEAK: AtomicI64 = AtomicI64::new(0);

/// A global allocator wrapper that counts live heap bytes and their peak.
///
/// Install it with `#[global_allocator]` to get `mu`/`pmu` metrics when the
/// memory flag is enabled. Without it both counters stay at zero.
pub struct TrackingAllocator<A: GlobalAlloc = System> {
    inner: A,
}

impl TrackingAllocator<System> {
    pub const fn system() -> Self {
        Self { inner: System }
    }
}

impl<A: GlobalAlloc> TrackingAllocator<A> {
    pub const fn new(inner: A) -> Self {
        Self { inner }
    }
}

unsafe impl<A: GlobalAlloc> GlobalAlloc for TrackingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.inner.alloc(layout) };
        if !ptr.is_null() {
            track_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { self.inner.dealloc(ptr, layout) };
        track_dealloc(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let result = unsafe { self.inner.realloc(ptr, layout, new_size) };
        if !result.is_null() {
            track_dealloc(layout.size());
            track_alloc(new_size);
        }
        result
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.inner.alloc_zeroed(layout) };
        if !ptr.is_null() {
            track_alloc(layout.size());
        }
        ptr
    }
}

fn track_alloc(bytes: usize) {
    let now = CURRENT.fetch_add(bytes as i64, Ordering::Relaxed) + bytes as i64;
    PEAK.fetch_max(now, Ordering::Relaxed);
}

fn track_dealloc(bytes: usize) {
    CURRENT.fetch_sub(bytes as i64, Ordering::Relaxed);
}

/// Live heap bytes seen by the tracking allocator.
pub fn current_bytes() -> i64 {
    CURRENT.load(Ordering::Relaxed)
}

/// Highest value `current_bytes` has reached.
pub fn peak_bytes() -> i64 {
    PEAK.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_follows_current_upwards_only() {
        let base = current_bytes();
        track_alloc(4096);
        assert!(peak_bytes() >= base + 4096);
        let peak = peak_bytes();
        track_dealloc(4096);
        assert_eq!(current_bytes(), base);
        assert!(peak_bytes() >= peak, "peak must never decrease");
    }
}
