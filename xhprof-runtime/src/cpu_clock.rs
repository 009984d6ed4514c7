//! Per-thread CPU time measurement via `clock_gettime(CLOCK_THREAD_CPUTIME_ID)`.
//!
//! Uses inline FFI to avoid adding a `libc` dependency -- the runtime stays
//! zero-dep. Platforms without a thread CPU clock read as zero.

#[cfg(any(target_os = "linux", target_os = "macos"))]
#[repr(C)]
struct Timespec {
    tv_sec: i64,
    tv_nsec: i64,
}

#[cfg(target_os = "linux")]
const CLOCK_THREAD_CPUTIME_ID: i32 = 3;

#[cfg(target_os = "macos")]
const CLOCK_THREAD_CPUTIME_ID: i32 = 16;

#[cfg(any(target_os = "linux", target_os = "macos"))]
unsafe extern "C" {
    fn clock_gettime(clk_id: i32, tp: *mut Timespec) -> i32;
}

/// Return the current thread's CPU time in nanoseconds.
///
/// Only time the current thread spent executing on a CPU core counts. Sleeps,
/// I/O waits and scheduling delays read as zero.
#[cfg(all(
    any(target_os = "linux", target_os = "macos"),
    target_pointer_width = "64"
))]
pub fn cpu_now_ns() -> u64 {
    let mut ts = Timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec for the duration of the call.
    let ret = unsafe { clock_gettime(CLOCK_THREAD_CPUTIME_ID, &mut ts) };
    if ret != 0 {
        return 0;
    }
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

#[cfg(not(all(
    any(target_os = "linux", target_os = "macos"),
    target_pointer_width = "64"
)))]
pub fn cpu_now_ns() -> u64 {
    0
}

#[cfg(test)]
#[cfg(all(
    any(target_os = "linux", target_os = "macos"),
    target_pointer_width = "64"
))]
mod tests {
    use super::*;

    #[test]
    fn clock_is_available_and_monotonic_per_thread() {
        let first = cpu_now_ns();
        assert!(first > 0, "thread CPU clock unavailable");
        let samples: Vec<u64> = (0..100).map(|_| cpu_now_ns()).collect();
        assert!(samples.windows(2).all(|w| w[0] <= w[1]), "{samples:?}");
    }

    #[test]
    fn fresh_thread_starts_near_zero() {
        // A new thread's CPU clock is its own, not the process total.
        let spawned = std::thread::spawn(cpu_now_ns).join().unwrap();
        assert!(spawned < 1_000_000_000, "new thread read {spawned}ns");
    }
}
