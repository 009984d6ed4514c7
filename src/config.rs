//! Listener options and the validated configuration resolved from them.
//!
//! Options arrive as a flat string map (the shape test-runner listener
//! arguments take) or as a TOML file. `Configuration::resolve` validates them
//! once; nothing downstream re-reads the raw options.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;
use crate::store::{self, RunId};

pub const APP_NAMESPACE: &str = "appNamespace";
pub const LIB_PATH: &str = "libPath";
pub const RUNS_PATH: &str = "runsPath";
pub const REPORT_BASE_URL: &str = "reportBaseUrl";
pub const PROFILING_FLAGS: &str = "profilingFlags";
pub const IGNORE_LIST: &str = "ignoreList";

/// Legacy argument names accepted alongside the canonical ones.
const ALIASES: &[(&str, &str)] = &[
    (LIB_PATH, "xhprofLibFile"),
    (RUNS_PATH, "xhprofRunsFile"),
    (REPORT_BASE_URL, "xhprofWeb"),
    (PROFILING_FLAGS, "xhprofFlags"),
    (IGNORE_LIST, "xhprofIgnore"),
];

/// Raw listener options, keyed by option name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    values: BTreeMap<String, String>,
}

impl ListenerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Look up an option by canonical name, falling back to its legacy alias.
    pub fn get(&self, key: &str) -> Option<&str> {
        if let Some(v) = self.values.get(key) {
            return Some(v.as_str());
        }
        ALIASES
            .iter()
            .find(|(canonical, _)| *canonical == key)
            .and_then(|(_, alias)| self.values.get(*alias))
            .map(String::as_str)
    }

    /// Read options from a TOML file. See [`ListenerOptions::from_toml_str`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        parse_toml(&contents).map_err(|reason| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            reason,
        })
    }

    /// Parse options from TOML.
    ///
    /// Keys come from an `[xhprof]` table when there is one, otherwise from
    /// the document root. Values must be strings or arrays of strings; arrays
    /// are joined with `,`.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        parse_toml(source).map_err(|reason| ConfigError::Parse { path: None, reason })
    }
}

fn parse_toml(source: &str) -> Result<ListenerOptions, String> {
    let doc: toml_edit::DocumentMut = source.parse().map_err(|e| format!("{e}"))?;
    let table = match doc.get("xhprof") {
        Some(item) => item
            .as_table_like()
            .ok_or_else(|| "`xhprof` must be a table".to_string())?,
        None => doc.as_table() as &dyn toml_edit::TableLike,
    };

    let mut options = ListenerOptions::new();
    for (key, item) in table.iter() {
        let value = item
            .as_value()
            .ok_or_else(|| format!("option `{key}` must be a string"))?;
        let text = if let Some(s) = value.as_str() {
            s.to_string()
        } else if let Some(array) = value.as_array() {
            array
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| format!("option `{key}` must contain only strings"))
                })
                .collect::<Result<Vec<_>, _>>()?
                .join(",")
        } else {
            return Err(format!("option `{key}` must be a string"));
        };
        options.insert(key, text);
    }
    Ok(options)
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ListenerOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = Self::new();
        for (k, v) in iter {
            options.insert(k, v);
        }
        options
    }
}

/// A metric the profiler can collect in addition to wall time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProfilingFlag {
    Cpu,
    Memory,
}

impl ProfilingFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            ProfilingFlag::Cpu => "CPU",
            ProfilingFlag::Memory => "MEMORY",
        }
    }
}

impl fmt::Display for ProfilingFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfilingFlag {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match bare_flag_name(s).as_str() {
            "CPU" => Ok(ProfilingFlag::Cpu),
            "MEMORY" => Ok(ProfilingFlag::Memory),
            _ => Err(ConfigError::UnknownFlag {
                name: s.trim().to_string(),
            }),
        }
    }
}

/// Upper-cased flag name with the legacy `XHPROF_FLAGS_` prefix removed.
fn bare_flag_name(s: &str) -> String {
    let upper = s.trim().to_ascii_uppercase();
    match upper.strip_prefix("XHPROF_FLAGS_") {
        Some(bare) => bare.to_string(),
        None => upper,
    }
}

/// Legacy flags that select nothing this profiler measures. Accepted and
/// ignored so old option sets keep resolving.
const NO_OP_FLAGS: &[&str] = &["NO_BUILTINS"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSet(BTreeSet<ProfilingFlag>);

impl FlagSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, flag: ProfilingFlag) -> bool {
        self.0.contains(&flag)
    }

    pub fn insert(&mut self, flag: ProfilingFlag) {
        self.0.insert(flag);
    }

    pub fn iter(&self) -> impl Iterator<Item = ProfilingFlag> + '_ {
        self.0.iter().copied()
    }

    /// Parse a comma-separated flag list. Blank input yields the default set;
    /// a list made only of no-op flags yields an empty one.
    pub fn parse_list(list: &str) -> Result<Self, ConfigError> {
        let mut set = Self::empty();
        let mut named = false;
        for name in list.split(',').filter(|n| !n.trim().is_empty()) {
            named = true;
            if NO_OP_FLAGS.contains(&bare_flag_name(name).as_str()) {
                continue;
            }
            set.insert(name.parse()?);
        }
        if !named {
            return Ok(Self::default_flags());
        }
        Ok(set)
    }

    /// CPU and memory.
    pub fn default_flags() -> Self {
        [ProfilingFlag::Cpu, ProfilingFlag::Memory]
            .into_iter()
            .collect()
    }
}

impl FromIterator<ProfilingFlag> for FlagSet {
    fn from_iter<I: IntoIterator<Item = ProfilingFlag>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(ProfilingFlag::as_str).collect();
        f.write_str(&names.join(","))
    }
}

/// Validated listener configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub app_namespace: String,
    pub flags: FlagSet,
    pub ignore_list: Vec<String>,
    pub report_base_url: String,
    pub profiler_lib: PathBuf,
    pub runs_location: PathBuf,
}

impl Configuration {
    pub fn resolve(options: &ListenerOptions) -> Result<Self, ConfigError> {
        let app_namespace = options
            .get(APP_NAMESPACE)
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .ok_or(ConfigError::MissingField {
                field: APP_NAMESPACE,
            })?
            .to_string();
        if !store::is_file_safe_namespace(&app_namespace) {
            return Err(ConfigError::InvalidNamespace {
                namespace: app_namespace,
            });
        }

        let profiler_lib = existing_path(options, LIB_PATH)?;
        let runs_location = runs_dir(existing_path(options, RUNS_PATH)?);

        let flags = match options.get(PROFILING_FLAGS) {
            Some(list) => FlagSet::parse_list(list)?,
            None => FlagSet::default_flags(),
        };

        let ignore_list = options
            .get(IGNORE_LIST)
            .map(split_list)
            .unwrap_or_default();

        let report_base_url = match options.get(REPORT_BASE_URL) {
            Some(url) => url.trim().to_string(),
            None => {
                tracing::warn!(
                    "the \"{REPORT_BASE_URL}\" option is not set; report links will be incomplete"
                );
                String::new()
            }
        };

        Ok(Self {
            app_namespace,
            flags,
            ignore_list,
            report_base_url,
            profiler_lib,
            runs_location,
        })
    }

    /// Link to the web UI page for a stored run.
    pub fn report_reference(&self, run: &RunId) -> String {
        format!(
            "{}?run={}&source={}",
            self.report_base_url, run, self.app_namespace
        )
    }
}

fn existing_path(options: &ListenerOptions, field: &'static str) -> Result<PathBuf, ConfigError> {
    let raw = options
        .get(field)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or(ConfigError::InvalidPath { field, path: None })?;
    let path = PathBuf::from(raw);
    if !path.exists() {
        return Err(ConfigError::InvalidPath {
            field,
            path: Some(path),
        });
    }
    Ok(path)
}

/// Runs are written into a directory. A runs path naming a file (the legacy
/// `xhprofRunsFile` points at the runs library itself) stores next to it.
fn runs_dir(path: PathBuf) -> PathBuf {
    if path.is_dir() {
        return path;
    }
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
