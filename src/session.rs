//! One profiling session per test: open on test start, close, persist and
//! link on test end.

use crate::binding::ProfilerBinding;
use crate::config::Configuration;
use crate::error::{Error, SessionError};
use crate::store::RunStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Closed,
    Open,
}

/// A completed test and the link to its stored profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub test_identifier: String,
    pub report_reference: String,
}

/// Owns the profiler and the run store and enforces that sessions alternate
/// strictly between open and closed.
#[derive(Debug)]
pub struct SessionTracker<P, S> {
    profiler: P,
    store: S,
    state: SessionState,
}

impl<P: ProfilerBinding, S: RunStore> SessionTracker<P, S> {
    pub fn new(profiler: P, store: S) -> Self {
        Self {
            profiler,
            store,
            state: SessionState::Closed,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn profiler(&self) -> &P {
        &self.profiler
    }

    pub fn profiler_mut(&mut self) -> &mut P {
        &mut self.profiler
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn on_test_start(&mut self, config: &Configuration) -> Result<(), Error> {
        if self.state == SessionState::Open {
            return Err(SessionError::AlreadyOpen.into());
        }
        self.profiler.begin(&config.flags, &config.ignore_list)?;
        self.state = SessionState::Open;
        tracing::debug!("profiling session opened");
        Ok(())
    }

    /// Close the open session and persist its profile.
    ///
    /// The session is closed even when stopping the profiler or persisting
    /// the profile fails; the failure is returned as is.
    pub fn on_test_end(
        &mut self,
        config: &Configuration,
        test_identifier: &str,
    ) -> Result<RunRecord, Error> {
        if self.state != SessionState::Open {
            return Err(SessionError::NotOpen.into());
        }
        let profile = self.profiler.end();
        self.state = SessionState::Closed;

        let run = self.store.persist(profile?, &config.app_namespace)?;
        tracing::debug!(test = test_identifier, %run, "profiling session persisted");
        Ok(RunRecord {
            test_identifier: test_identifier.to_string(),
            report_reference: config.report_reference(&run),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::RecordingProfiler;
    use crate::config::{FlagSet, ProfilingFlag};
    use crate::error::AdapterError;
    use crate::store::MemoryRunStore;
    use std::path::PathBuf;

    fn config() -> Configuration {
        Configuration {
            app_namespace: "demo".into(),
            flags: [ProfilingFlag::Cpu].into_iter().collect(),
            ignore_list: vec!["call_user_func".into()],
            report_base_url: "http://h/x".into(),
            profiler_lib: PathBuf::from("."),
            runs_location: PathBuf::from("."),
        }
    }

    fn tracker() -> SessionTracker<RecordingProfiler, MemoryRunStore> {
        SessionTracker::new(RecordingProfiler::new(), MemoryRunStore::with_ids(["42"]))
    }

    #[test]
    fn start_then_end_produces_record() {
        let config = config();
        let mut tracker = tracker();
        assert_eq!(tracker.state(), SessionState::Closed);

        tracker.on_test_start(&config).unwrap();
        assert_eq!(tracker.state(), SessionState::Open);

        let record = tracker.on_test_end(&config, "t1").unwrap();
        assert_eq!(tracker.state(), SessionState::Closed);
        assert_eq!(record.test_identifier, "t1");
        assert_eq!(record.report_reference, "http://h/x?run=42&source=demo");
        assert_eq!(tracker.profiler().begins(), 1);
        assert_eq!(tracker.profiler().ends(), 1);
        assert_eq!(tracker.store().runs()[0].1, "demo");
    }

    #[test]
    fn begin_receives_configured_flags_and_ignore_list() {
        let config = config();
        let mut tracker = tracker();
        tracker.on_test_start(&config).unwrap();
        let flags: FlagSet = [ProfilingFlag::Cpu].into_iter().collect();
        assert_eq!(tracker.profiler().last_flags(), Some(&flags));
        assert_eq!(tracker.profiler().last_ignored(), ["call_user_func"]);
    }

    #[test]
    fn double_start_is_rejected() {
        let config = config();
        let mut tracker = tracker();
        tracker.on_test_start(&config).unwrap();
        let err = tracker.on_test_start(&config).unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::AlreadyOpen)));
        assert_eq!(tracker.profiler().begins(), 1);
        assert_eq!(tracker.state(), SessionState::Open);
    }

    #[test]
    fn end_without_start_is_rejected() {
        let config = config();
        let mut tracker = tracker();
        let err = tracker.on_test_end(&config, "t1").unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::NotOpen)));
        assert_eq!(tracker.profiler().ends(), 0);
    }

    #[test]
    fn failed_persist_still_closes_session() {
        let config = config();
        let mut tracker = tracker();
        tracker.store_mut().fail_next("storage unreachable");

        tracker.on_test_start(&config).unwrap();
        let err = tracker.on_test_end(&config, "t1").unwrap_err();
        assert!(matches!(err, Error::Adapter(AdapterError::Store(_))));
        assert_eq!(tracker.state(), SessionState::Closed);

        tracker.on_test_start(&config).unwrap();
        let record = tracker.on_test_end(&config, "t2").unwrap();
        assert_eq!(record.report_reference, "http://h/x?run=42&source=demo");
    }

    #[test]
    fn failed_profiler_end_still_closes_session() {
        let config = config();
        let mut tracker = tracker();
        tracker.profiler_mut().fail_next_end("extension crashed");

        tracker.on_test_start(&config).unwrap();
        assert!(tracker.on_test_end(&config, "t1").is_err());
        assert_eq!(tracker.state(), SessionState::Closed);
        assert!(tracker.store().runs().is_empty());
    }

    #[test]
    fn failed_begin_leaves_session_closed() {
        let config = config();
        let mut tracker = tracker();
        tracker.profiler_mut().fail_next_begin("not loaded");
        assert!(tracker.on_test_start(&config).is_err());
        assert_eq!(tracker.state(), SessionState::Closed);
    }
}
