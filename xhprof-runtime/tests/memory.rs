//! Memory metrics with the tracking allocator installed process-wide.

use std::sync::Mutex;

use xhprof_runtime::{Flags, TrackingAllocator};

#[global_allocator]
static ALLOC: TrackingAllocator = TrackingAllocator::system();

// The counters are process-wide; tests that read them take turns.
static SERIAL: Mutex<()> = Mutex::new(());

const MEMORY_ONLY: Flags = Flags {
    cpu: false,
    memory: true,
};

#[test]
fn retained_allocation_shows_up_in_memory_delta() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    xhprof_runtime::enable(MEMORY_ONLY, &[]);
    let kept = {
        let _g = xhprof_runtime::enter("grow");
        vec![0u8; 1 << 20]
    };
    let edges = xhprof_runtime::disable().unwrap();
    drop(kept);

    let grow = edges.iter().find(|e| e.key() == "main()==>grow").unwrap();
    let mu = grow.mem_bytes.unwrap();
    let pmu = grow.peak_bytes.unwrap();
    assert!(mu >= 1 << 20, "expected at least 1MiB retained, got {mu}");
    assert!(pmu >= 0, "peak delta must not be negative: {pmu}");
}

#[test]
fn freed_allocation_nets_out() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    xhprof_runtime::enable(MEMORY_ONLY, &[]);
    {
        let _g = xhprof_runtime::enter("scratch");
        let buf = vec![1u8; 1 << 20];
        std::hint::black_box(&buf);
    }
    let edges = xhprof_runtime::disable().unwrap();

    let scratch = edges.iter().find(|e| e.key() == "main()==>scratch").unwrap();
    assert!(
        scratch.mem_bytes.unwrap() < 1 << 20,
        "freed buffer still counted: {:?}",
        scratch.mem_bytes
    );
}

#[test]
fn current_bytes_tracks_live_heap() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let before = xhprof_runtime::current_bytes();
    let buf = vec![0u8; 4 << 20];
    std::hint::black_box(&buf);
    assert!(xhprof_runtime::current_bytes() - before >= (4 << 20) - (1 << 20));
    assert!(xhprof_runtime::peak_bytes() >= xhprof_runtime::current_bytes());
}
