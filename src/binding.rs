//! The profiler side of a session: something that can be started with a flag
//! set and an ignore list, and stopped to yield a [`RawProfile`].

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::config::{FlagSet, ProfilingFlag};
use crate::error::AdapterError;
use crate::profile::RawProfile;

pub trait ProfilerBinding {
    fn begin(&mut self, flags: &FlagSet, ignored: &[String]) -> Result<(), AdapterError>;
    fn end(&mut self) -> Result<RawProfile, AdapterError>;
}

impl<P: ProfilerBinding + ?Sized> ProfilerBinding for Box<P> {
    fn begin(&mut self, flags: &FlagSet, ignored: &[String]) -> Result<(), AdapterError> {
        (**self).begin(flags, ignored)
    }

    fn end(&mut self) -> Result<RawProfile, AdapterError> {
        (**self).end()
    }
}

/// Profiler backed by the in-process `xhprof-runtime` collector.
///
/// Sessions are thread-local: `begin` and `end` must be called from the
/// thread that runs the test, and instrumented code reports frames through
/// `xhprof_runtime::enter`.
#[derive(Debug)]
pub struct NativeProfiler {
    library: PathBuf,
}

impl NativeProfiler {
    /// Bind to the profiler library location. Called once per listener.
    pub fn load(library: &Path) -> Result<Self, AdapterError> {
        if !library.exists() {
            return Err(AdapterError::Profiler(format!(
                "profiler library {} does not exist",
                library.display()
            )));
        }
        tracing::debug!(library = %library.display(), "native profiler loaded");
        Ok(Self {
            library: library.to_path_buf(),
        })
    }

    pub fn library(&self) -> &Path {
        &self.library
    }
}

impl ProfilerBinding for NativeProfiler {
    fn begin(&mut self, flags: &FlagSet, ignored: &[String]) -> Result<(), AdapterError> {
        xhprof_runtime::enable(
            xhprof_runtime::Flags {
                cpu: flags.contains(ProfilingFlag::Cpu),
                memory: flags.contains(ProfilingFlag::Memory),
            },
            ignored,
        );
        Ok(())
    }

    fn end(&mut self) -> Result<RawProfile, AdapterError> {
        xhprof_runtime::disable()
            .map(RawProfile::from)
            .ok_or_else(|| AdapterError::Profiler("no session running on this thread".into()))
    }
}

/// In-memory profiler for exercising the listener without real sampling.
///
/// Counts calls, remembers the last `begin` arguments, hands out queued
/// profiles (an empty one when the queue is dry), and can be told to fail the
/// next `begin` or `end` once.
#[derive(Debug, Default)]
pub struct RecordingProfiler {
    begins: usize,
    ends: usize,
    last_flags: Option<FlagSet>,
    last_ignored: Vec<String>,
    queued: VecDeque<RawProfile>,
    fail_begin: Option<String>,
    fail_end: Option<String>,
}

impl RecordingProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&mut self, profile: RawProfile) {
        self.queued.push_back(profile);
    }

    pub fn fail_next_begin(&mut self, reason: impl Into<String>) {
        self.fail_begin = Some(reason.into());
    }

    pub fn fail_next_end(&mut self, reason: impl Into<String>) {
        self.fail_end = Some(reason.into());
    }

    pub fn begins(&self) -> usize {
        self.begins
    }

    pub fn ends(&self) -> usize {
        self.ends
    }

    pub fn last_flags(&self) -> Option<&FlagSet> {
        self.last_flags.as_ref()
    }

    pub fn last_ignored(&self) -> &[String] {
        &self.last_ignored
    }
}

impl ProfilerBinding for RecordingProfiler {
    fn begin(&mut self, flags: &FlagSet, ignored: &[String]) -> Result<(), AdapterError> {
        self.begins += 1;
        if let Some(reason) = self.fail_begin.take() {
            return Err(AdapterError::Profiler(reason));
        }
        self.last_flags = Some(flags.clone());
        self.last_ignored = ignored.to_vec();
        Ok(())
    }

    fn end(&mut self) -> Result<RawProfile, AdapterError> {
        self.ends += 1;
        if let Some(reason) = self.fail_end.take() {
            return Err(AdapterError::Profiler(reason));
        }
        Ok(self.queued.pop_front().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_profiler_captures_instrumented_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut profiler = NativeProfiler::load(dir.path()).unwrap();

        profiler
            .begin(&FlagSet::default_flags(), &["skipped".to_string()])
            .unwrap();
        {
            let _s = xhprof_runtime::enter("skipped");
            let _w = xhprof_runtime::enter("work");
        }
        let profile = profiler.end().unwrap();

        assert!(profile.get("main()").is_some());
        let work = profile.get("main()==>work").unwrap();
        assert_eq!(work.ct, 1);
        assert!(work.cpu.is_some(), "CPU flag should produce cpu metric");
        assert!(work.mu.is_some(), "MEMORY flag should produce mu metric");
        assert!(profile.keys().all(|k| !k.contains("skipped")));
    }

    #[test]
    fn native_profiler_end_without_begin_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut profiler = NativeProfiler::load(dir.path()).unwrap();
        assert!(matches!(profiler.end(), Err(AdapterError::Profiler(_))));
    }

    #[test]
    fn native_profiler_requires_existing_library() {
        let dir = tempfile::tempdir().unwrap();
        let err = NativeProfiler::load(&dir.path().join("missing.so")).unwrap_err();
        assert!(err.to_string().contains("does not exist"), "{err}");
    }

    #[test]
    fn recording_profiler_failure_is_one_shot() {
        let mut profiler = RecordingProfiler::new();
        profiler.fail_next_end("disk full");
        profiler.begin(&FlagSet::default_flags(), &[]).unwrap();
        assert!(profiler.end().is_err());
        profiler.begin(&FlagSet::default_flags(), &[]).unwrap();
        assert!(profiler.end().is_ok());
        assert_eq!(profiler.begins(), 2);
        assert_eq!(profiler.ends(), 2);
    }
}
