use std::path::PathBuf;

/// Listener construction failures. All of them are fatal: a listener is never
/// handed out half-configured.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("the \"{field}\" option is not set")]
    MissingField { field: &'static str },

    #[error("the \"{field}\" option is not set or {} does not exist", path_display(.path))]
    InvalidPath {
        field: &'static str,
        path: Option<PathBuf>,
    },

    #[error("namespace '{namespace}' cannot be used in a run file name")]
    InvalidNamespace { namespace: String },

    #[error("unknown profiling flag '{name}' -- expected CPU or MEMORY")]
    UnknownFlag { name: String },

    #[error("failed to read options file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid options{}: {reason}", parse_location(.path))]
    Parse {
        path: Option<PathBuf>,
        reason: String,
    },
}

fn path_display(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => p.display().to_string(),
        None => "the configured path".to_string(),
    }
}

fn parse_location(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" file {}", p.display()),
        None => String::new(),
    }
}

/// The host paired its callbacks incorrectly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("a profiling session is already open -- start_test called twice without end_test")]
    AlreadyOpen,

    #[error("no profiling session is open -- end_test called without start_test")]
    NotOpen,
}

/// Failures reported by the profiler binding or the run store.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("profiler: {0}")]
    Profiler(String),

    #[error("run store: {0}")]
    Store(String),

    #[error("run store I/O on {}: {source}", path.display())]
    StoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid run data in {}: {reason}", path.display())]
    InvalidRunData { path: PathBuf, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}
