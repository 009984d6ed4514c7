//! Per-test profiling sessions for a test run.
//!
//! A [`XhprofListener`] opens one profiling session when a test starts,
//! closes it when the test ends, stores the captured profile and remembers a
//! link to it. When the outermost suite finishes it prints every link.

pub mod binding;
pub mod config;
pub mod error;
pub mod listener;
pub mod profile;
pub mod registry;
pub mod report;
pub mod session;
pub mod store;

pub use binding::{NativeProfiler, ProfilerBinding, RecordingProfiler};
pub use config::{Configuration, FlagSet, ListenerOptions, ProfilingFlag};
pub use error::{AdapterError, ConfigError, Error, SessionError};
pub use listener::{OutcomeObserver, SharedListener, TestLifecycle, XhprofListener};
pub use profile::{EdgeMetrics, RawProfile};
pub use registry::RunRegistry;
pub use session::{RunRecord, SessionState, SessionTracker};
pub use store::{FileRunStore, MemoryRunStore, RunId, RunStore, StoredRun};
