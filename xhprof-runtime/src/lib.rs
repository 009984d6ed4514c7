#![allow(unsafe_code)]

mod alloc;
mod collector;
mod cpu_clock;

pub use alloc::{TrackingAllocator, current_bytes, peak_bytes};
pub use collector::{EdgeRecord, Flags, Guard, ROOT, disable, enable, enter, is_enabled};
pub use cpu_clock::cpu_now_ns;
