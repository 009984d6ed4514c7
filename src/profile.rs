use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Measurements for one call-graph edge, in the XHProf field naming.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeMetrics {
    /// Call count.
    pub ct: u64,
    /// Inclusive wall time in microseconds.
    pub wt: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mu: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmu: Option<i64>,
}

/// A captured profile: edge key (`parent==>child`, or `main()`) to metrics.
///
/// The listener only moves these from the profiler to the run store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawProfile {
    edges: BTreeMap<String, EdgeMetrics>,
}

impl RawProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, metrics: EdgeMetrics) {
        self.edges.insert(key.into(), metrics);
    }

    pub fn get(&self, key: &str) -> Option<&EdgeMetrics> {
        self.edges.get(key)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }
}

impl From<Vec<xhprof_runtime::EdgeRecord>> for RawProfile {
    fn from(records: Vec<xhprof_runtime::EdgeRecord>) -> Self {
        let edges = records
            .into_iter()
            .map(|r| {
                (
                    r.key(),
                    EdgeMetrics {
                        ct: r.calls,
                        wt: r.wall_us,
                        cpu: r.cpu_us,
                        mu: r.mem_bytes,
                        pmu: r.peak_bytes,
                    },
                )
            })
            .collect();
        Self { edges }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_flat_edge_map() {
        let mut profile = RawProfile::new();
        profile.insert(
            "main()",
            EdgeMetrics {
                ct: 1,
                wt: 120,
                cpu: Some(100),
                ..Default::default()
            },
        );
        let json = serde_json::to_string(&profile).unwrap();
        assert_eq!(json, r#"{"main()":{"ct":1,"wt":120,"cpu":100}}"#);
    }

    #[test]
    fn converts_runtime_edges() {
        let records = vec![xhprof_runtime::EdgeRecord {
            parent: Some("main()".into()),
            child: "work".into(),
            calls: 2,
            wall_us: 50,
            cpu_us: None,
            mem_bytes: Some(64),
            peak_bytes: Some(128),
        }];
        let profile = RawProfile::from(records);
        let work = profile.get("main()==>work").unwrap();
        assert_eq!(work.ct, 2);
        assert_eq!(work.wt, 50);
        assert_eq!(work.cpu, None);
        assert_eq!(work.mu, Some(64));
        assert_eq!(work.pmu, Some(128));
    }
}
