//! In-process gauge registry, grounded on
//! `original_source/src/utilities/metrics.cpp`'s `MetricsRegistry`
//! singleton (`setGauge(name, value, labels)`), cut down to what this
//! workspace actually needs: `replica_healthy{file}`,
//! `simplidfs_raft_role{role}`, and `simplidfs_raft_commit_index`. No HTTP
//! exposition -- `spec.md` §1 scopes that to an external collaborator --
//! just the in-memory values plus a `snapshot()` for `ctl health` and
//! tests.

use std::collections::HashMap;

use parking_lot::RwLock;

/// `(metric name, sorted label pairs)` so two calls with the same labels
/// in a different order collide into the same series.
type SeriesKey = (String, Vec<(String, String)>);

#[derive(Default)]
pub struct MetricsRegistry {
    gauges: RwLock<HashMap<SeriesKey, f64>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let mut sorted: Vec<(String, String)> =
            labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        sorted.sort();
        self.gauges.write().insert((name.to_string(), sorted), value);
    }

    pub fn get_gauge(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let mut sorted: Vec<(String, String)> =
            labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        sorted.sort();
        self.gauges.read().get(&(name.to_string(), sorted)).copied()
    }

    /// `(name, labels, value)` for every recorded series, unordered.
    pub fn snapshot(&self) -> Vec<(String, Vec<(String, String)>, f64)> {
        self.gauges
            .read()
            .iter()
            .map(|((name, labels), value)| (name.clone(), labels.clone(), *value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let registry = MetricsRegistry::new();
        registry.set_gauge("simplidfs_raft_commit_index", 7.0, &[]);
        assert_eq!(registry.get_gauge("simplidfs_raft_commit_index", &[]), Some(7.0));
    }

    #[test]
    fn label_order_does_not_create_distinct_series() {
        let registry = MetricsRegistry::new();
        registry.set_gauge("replica_healthy", 1.0, &[("file", "a"), ("node", "n1")]);
        assert_eq!(
            registry.get_gauge("replica_healthy", &[("node", "n1"), ("file", "a")]),
            Some(1.0)
        );
    }

    #[test]
    fn unknown_series_is_none() {
        let registry = MetricsRegistry::new();
        assert_eq!(registry.get_gauge("missing", &[]), None);
    }

    #[test]
    fn snapshot_includes_every_recorded_series() {
        let registry = MetricsRegistry::new();
        registry.set_gauge("a", 1.0, &[]);
        registry.set_gauge("b", 2.0, &[("role", "leader")]);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
    }
}
