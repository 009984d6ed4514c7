//! Host integration: the callbacks a test runner drives.
//!
//! Session lifecycle ([`TestLifecycle`]) and outcome notification
//! ([`OutcomeObserver`]) are separate traits. Profiling keys on test start and
//! end only; whether the test passed never matters.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::binding::{NativeProfiler, ProfilerBinding};
use crate::config::{Configuration, ListenerOptions};
use crate::error::Error;
use crate::registry::RunRegistry;
use crate::report::emit_summary;
use crate::session::{SessionState, SessionTracker};
use crate::store::{FileRunStore, RunStore};

/// Suite and test boundaries, called strictly in sequence by the host.
pub trait TestLifecycle {
    fn start_test(&mut self) -> Result<(), Error>;
    fn end_test(&mut self, test: &str) -> Result<(), Error>;
    fn start_suite(&mut self) -> Result<(), Error>;
    fn end_suite(&mut self) -> Result<(), Error>;
}

/// Per-test outcome notifications. Every hook defaults to doing nothing.
pub trait OutcomeObserver {
    fn add_error(&mut self, _test: &str, _message: &str, _seconds: f64) {}
    fn add_failure(&mut self, _test: &str, _message: &str, _seconds: f64) {}
    fn add_incomplete(&mut self, _test: &str, _message: &str, _seconds: f64) {}
    fn add_skipped(&mut self, _test: &str, _message: &str, _seconds: f64) {}
}

/// Profiles every test and prints the collected report links once the
/// outermost suite ends.
pub struct XhprofListener<P, S> {
    config: Configuration,
    tracker: SessionTracker<P, S>,
    registry: RunRegistry,
    depth: usize,
    out: Box<dyn Write + Send>,
}

impl XhprofListener<NativeProfiler, FileRunStore> {
    /// Resolve `options` and bind the native profiler and the file run store.
    ///
    /// Both adapter locations are initialized here and never again.
    pub fn from_options(options: &ListenerOptions) -> Result<Self, Error> {
        let config = Configuration::resolve(options)?;
        let profiler = NativeProfiler::load(&config.profiler_lib)?;
        let store = FileRunStore::open(&config.runs_location)?;
        Ok(Self::with_adapters(config, profiler, store))
    }
}

impl<P: ProfilerBinding, S: RunStore> XhprofListener<P, S> {
    pub fn with_adapters(config: Configuration, profiler: P, store: S) -> Self {
        Self {
            config,
            tracker: SessionTracker::new(profiler, store),
            registry: RunRegistry::new(),
            depth: 0,
            out: Box::new(anstream::stdout()),
        }
    }

    /// Send the end-of-run report somewhere other than stdout.
    pub fn with_output(mut self, out: impl Write + Send + 'static) -> Self {
        self.out = Box::new(out);
        self
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn session_state(&self) -> SessionState {
        self.tracker.state()
    }

    pub fn profiler(&self) -> &P {
        self.tracker.profiler()
    }

    pub fn profiler_mut(&mut self) -> &mut P {
        self.tracker.profiler_mut()
    }

    pub fn store(&self) -> &S {
        self.tracker.store()
    }

    pub fn store_mut(&mut self) -> &mut S {
        self.tracker.store_mut()
    }
}

impl<P: ProfilerBinding, S: RunStore> TestLifecycle for XhprofListener<P, S> {
    fn start_test(&mut self) -> Result<(), Error> {
        self.tracker.on_test_start(&self.config)
    }

    fn end_test(&mut self, test: &str) -> Result<(), Error> {
        let record = self.tracker.on_test_end(&self.config, test)?;
        self.registry.record(record);
        Ok(())
    }

    fn start_suite(&mut self) -> Result<(), Error> {
        self.depth += 1;
        tracing::debug!(depth = self.depth, "suite started");
        Ok(())
    }

    fn end_suite(&mut self) -> Result<(), Error> {
        let Some(depth) = self.depth.checked_sub(1) else {
            tracing::warn!("suite ended without a matching start; ignoring");
            return Ok(());
        };
        self.depth = depth;
        tracing::debug!(depth, "suite ended");
        if depth == 0 {
            emit_summary(&self.registry, &mut *self.out)?;
        }
        Ok(())
    }
}

impl<P, S> OutcomeObserver for XhprofListener<P, S> {}

/// A listener behind one coarse lock, for hosts that call back from more than
/// one thread. Callers still have to keep start/end pairs in order.
pub struct SharedListener<L> {
    inner: Arc<Mutex<L>>,
}

impl<L> Clone for SharedListener<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L> SharedListener<L> {
    pub fn new(listener: L) -> Self {
        Self {
            inner: Arc::new(Mutex::new(listener)),
        }
    }

    /// Lock the listener. A panic in another callback doesn't poison it.
    pub fn lock(&self) -> MutexGuard<'_, L> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<L: TestLifecycle> SharedListener<L> {
    pub fn start_test(&self) -> Result<(), Error> {
        self.lock().start_test()
    }

    pub fn end_test(&self, test: &str) -> Result<(), Error> {
        self.lock().end_test(test)
    }

    pub fn start_suite(&self) -> Result<(), Error> {
        self.lock().start_suite()
    }

    pub fn end_suite(&self) -> Result<(), Error> {
        self.lock().end_suite()
    }
}

impl<L: OutcomeObserver> SharedListener<L> {
    pub fn add_error(&self, test: &str, message: &str, seconds: f64) {
        self.lock().add_error(test, message, seconds)
    }

    pub fn add_failure(&self, test: &str, message: &str, seconds: f64) {
        self.lock().add_failure(test, message, seconds)
    }

    pub fn add_incomplete(&self, test: &str, message: &str, seconds: f64) {
        self.lock().add_incomplete(test, message, seconds)
    }

    pub fn add_skipped(&self, test: &str, message: &str, seconds: f64) {
        self.lock().add_skipped(test, message, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::RecordingProfiler;
    use crate::config::FlagSet;
    use crate::error::SessionError;
    use crate::store::MemoryRunStore;
    use std::path::PathBuf;

    fn listener() -> XhprofListener<RecordingProfiler, MemoryRunStore> {
        let config = Configuration {
            app_namespace: "demo".into(),
            flags: FlagSet::default_flags(),
            ignore_list: Vec::new(),
            report_base_url: "http://h/x".into(),
            profiler_lib: PathBuf::from("."),
            runs_location: PathBuf::from("."),
        };
        XhprofListener::with_adapters(config, RecordingProfiler::new(), MemoryRunStore::new())
            .with_output(std::io::sink())
    }

    #[test]
    fn unmatched_suite_end_is_clamped() {
        let mut listener = listener();
        listener.end_suite().unwrap();
        assert_eq!(listener.depth(), 0);
        listener.start_suite().unwrap();
        assert_eq!(listener.depth(), 1);
    }

    #[test]
    fn outcome_hooks_do_not_touch_the_session() {
        let mut listener = listener();
        listener.start_suite().unwrap();
        listener.start_test().unwrap();
        listener.add_failure("t1", "assertion failed", 0.1);
        listener.add_error("t1", "boom", 0.1);
        assert_eq!(listener.session_state(), SessionState::Open);
        assert_eq!(listener.profiler().ends(), 0);

        listener.end_test("t1").unwrap();
        assert_eq!(listener.session_state(), SessionState::Closed);
        assert_eq!(listener.registry().count(), 1);
    }

    #[test]
    fn shared_listener_serializes_callbacks() {
        let shared = SharedListener::new(listener());
        shared.start_suite().unwrap();

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    let test = format!("t{i}");
                    // Another worker's session may be open; wait for it to close.
                    loop {
                        match shared.start_test() {
                            Ok(()) => break,
                            Err(Error::Session(SessionError::AlreadyOpen)) => {
                                std::thread::yield_now()
                            }
                            Err(e) => panic!("start_test failed: {e}"),
                        }
                    }
                    match i {
                        0 => shared.add_error(&test, "boom", 0.1),
                        1 => shared.add_failure(&test, "assertion failed", 0.1),
                        2 => shared.add_incomplete(&test, "todo", 0.0),
                        _ => shared.add_skipped(&test, "ignored", 0.0),
                    }
                    shared.end_test(&test).unwrap();
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        shared.end_suite().unwrap();
        let listener = shared.lock();
        assert_eq!(listener.registry().count(), 4);
        assert_eq!(listener.profiler().begins(), 4);
        assert_eq!(listener.profiler().ends(), 4);
        assert_eq!(listener.session_state(), SessionState::Closed);
        assert_eq!(listener.depth(), 0);
    }
}
