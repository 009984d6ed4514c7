//! Run storage: persists a captured profile under a namespace and hands back
//! the id the web UI uses to find it.

use std::collections::VecDeque;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::AdapterError;
use crate::profile::RawProfile;

/// Identifier assigned to a stored run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait RunStore {
    fn persist(&mut self, profile: RawProfile, namespace: &str) -> Result<RunId, AdapterError>;
}

impl<S: RunStore + ?Sized> RunStore for Box<S> {
    fn persist(&mut self, profile: RawProfile, namespace: &str) -> Result<RunId, AdapterError> {
        (**self).persist(profile, namespace)
    }
}

const RUN_EXTENSION: &str = "xhprof";

/// Stores each run as `<dir>/<run_id>.<namespace>.xhprof` (JSON).
#[derive(Debug)]
pub struct FileRunStore {
    dir: PathBuf,
}

/// A run found on disk by [`FileRunStore::list`].
#[derive(Debug, Clone)]
pub struct StoredRun {
    pub run: RunId,
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl FileRunStore {
    /// Bind to the runs directory. Called once per listener.
    pub fn open(dir: &Path) -> Result<Self, AdapterError> {
        if !dir.is_dir() {
            return Err(AdapterError::Store(format!(
                "runs location {} is not a directory",
                dir.display()
            )));
        }
        tracing::debug!(dir = %dir.display(), "file run store opened");
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, run: &RunId, namespace: &str) -> PathBuf {
        self.dir.join(format!("{run}.{namespace}.{RUN_EXTENSION}"))
    }

    /// Read a stored run back.
    pub fn load(&self, run: &RunId, namespace: &str) -> Result<RawProfile, AdapterError> {
        check_namespace(namespace)?;
        let path = self.path_for(run, namespace);
        let contents = std::fs::read_to_string(&path).map_err(|source| AdapterError::StoreIo {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|e| AdapterError::InvalidRunData {
            path,
            reason: e.to_string(),
        })
    }

    /// Runs stored for `namespace`, newest first.
    pub fn list(&self, namespace: &str) -> Result<Vec<StoredRun>, AdapterError> {
        check_namespace(namespace)?;
        let tail = format!("{namespace}.{RUN_EXTENSION}");
        let io_err = |source| AdapterError::StoreIo {
            path: self.dir.clone(),
            source,
        };

        let mut runs = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let path = entry.path();
            let Some(run) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.split_once('.'))
                .filter(|(id, rest)| !id.is_empty() && *rest == tail)
                .map(|(id, _)| RunId::new(id))
            else {
                continue;
            };
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(UNIX_EPOCH);
            runs.push(StoredRun {
                run,
                path,
                modified,
            });
        }

        runs.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.run.cmp(&a.run)));
        Ok(runs)
    }
}

impl RunStore for FileRunStore {
    fn persist(&mut self, profile: RawProfile, namespace: &str) -> Result<RunId, AdapterError> {
        check_namespace(namespace)?;
        let body = serde_json::to_vec(&profile)
            .map_err(|e| AdapterError::Store(format!("failed to encode profile: {e}")))?;

        let mut seed = time_seed();
        loop {
            let run = RunId::new(format!("{seed:013x}"));
            let path = self.path_for(&run, namespace);
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    file.write_all(&body)
                        .map_err(|source| AdapterError::StoreIo { path, source })?;
                    return Ok(run);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => seed += 1,
                Err(source) => return Err(AdapterError::StoreIo { path, source }),
            }
        }
    }
}

/// Seconds in the high bits, microseconds in the low 20: 13 hex digits.
fn time_seed() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (now.as_secs() << 20) | u64::from(now.subsec_micros())
}

/// Whether `namespace` can be embedded in a run file name.
pub(crate) fn is_file_safe_namespace(namespace: &str) -> bool {
    !namespace.is_empty() && !namespace.contains(['/', '\\']) && !namespace.contains("..")
}

fn check_namespace(namespace: &str) -> Result<(), AdapterError> {
    if !is_file_safe_namespace(namespace) {
        return Err(AdapterError::Store(format!(
            "namespace '{namespace}' cannot be used in a run file name"
        )));
    }
    Ok(())
}

/// In-memory run store for exercising the listener without touching disk.
///
/// Ids are handed out from a scripted queue first, then sequentially from 1.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    scripted: VecDeque<RunId>,
    next_id: u64,
    runs: Vec<(RunId, String, RawProfile)>,
    fail_next: Option<String>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out these ids, in order, before falling back to sequential ones.
    pub fn with_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scripted: ids.into_iter().map(RunId::new).collect(),
            ..Self::default()
        }
    }

    pub fn fail_next(&mut self, reason: impl Into<String>) {
        self.fail_next = Some(reason.into());
    }

    pub fn runs(&self) -> &[(RunId, String, RawProfile)] {
        &self.runs
    }

    pub fn get(&self, run: &RunId) -> Option<&RawProfile> {
        self.runs
            .iter()
            .find(|(id, _, _)| id == run)
            .map(|(_, _, profile)| profile)
    }
}

impl RunStore for MemoryRunStore {
    fn persist(&mut self, profile: RawProfile, namespace: &str) -> Result<RunId, AdapterError> {
        if let Some(reason) = self.fail_next.take() {
            return Err(AdapterError::Store(reason));
        }
        let run = match self.scripted.pop_front() {
            Some(run) => run,
            None => {
                self.next_id += 1;
                RunId::new(self.next_id.to_string())
            }
        };
        self.runs.push((run.clone(), namespace.to_string(), profile));
        Ok(run)
    }
}
