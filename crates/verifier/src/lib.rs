//! Cross-replica hash reconciliation (`spec.md` §4.7).
//!
//! The verifier never touches the inode table or the health cache's
//! mutators directly -- it is handed a snapshot of replica placements and
//! a shared [`NodeHealthCache`] to read, and returns a report the metadata
//! authority applies. This keeps the dependency edge pointing one way
//! (authority -> verifier), avoiding the back-reference cycle flagged in
//! `spec.md` §9 "Cyclic and shared ownership".

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use simplidfs_config::MetricsRegistry;
use simplidfs_digest::Digest;
use simplidfs_health::{HealthState, NodeHealthCache};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("unreachable: {0}")]
    Unreachable(String),
}

/// A read-only view of one inode's replica placement, as seen by the
/// metadata authority.
#[derive(Debug, Clone)]
pub struct InodeView {
    pub filename: String,
    pub replicas: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileVerifyResult {
    /// Gauge value for `replica_healthy{file}`: 1 on full agreement.
    pub replica_healthy: bool,
    /// Whether the inode should be (or remain) marked `partial`.
    pub partial: bool,
}

#[derive(Debug, Clone, Default)]
pub struct VerifyAllReport {
    pub results: HashMap<String, FileVerifyResult>,
    /// Number of inodes that are currently `partial`.
    pub pending: usize,
}

/// Per-file replica verifier. `F` is the injected fetcher:
/// `(node, filename) -> remote per-file hash`.
pub struct ReplicaVerifier<F> {
    fetcher: F,
    failure_counts: DashMap<String, u64>,
    metrics: Arc<MetricsRegistry>,
}

impl<F> ReplicaVerifier<F>
where
    F: Fn(&str, &str) -> Result<Digest, FetchError>,
{
    pub fn new(fetcher: F, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            fetcher,
            failure_counts: DashMap::new(),
            metrics,
        }
    }

    pub fn failure_count(&self, file: &str) -> u64 {
        self.failure_counts.get(file).map(|c| *c).unwrap_or(0)
    }

    fn bump_failure(&self, file: &str) {
        *self.failure_counts.entry(file.to_string()).or_insert(0) += 1;
    }

    /// Verify one file's replicas, filtering to ALIVE replicas first.
    pub fn verify_file(&self, filename: &str, replicas: &[String], health: &NodeHealthCache) -> FileVerifyResult {
        let healthy_replicas: Vec<&String> = replicas
            .iter()
            .filter(|n| health.state(n) == HealthState::Alive)
            .collect();

        let result = if healthy_replicas.is_empty() {
            self.bump_failure(filename);
            FileVerifyResult {
                replica_healthy: false,
                partial: true,
            }
        } else {
            let mut baseline: Option<Digest> = None;
            let mut agree = true;
            for node in &healthy_replicas {
                match (self.fetcher)(node, filename) {
                    Ok(digest) => match baseline {
                        None => baseline = Some(digest),
                        Some(b) if b == digest => {}
                        Some(_) => agree = false,
                    },
                    Err(e) => {
                        warn!(node, filename, error = %e, "replica fetch failed during verification");
                        agree = false;
                    }
                }
            }

            if agree {
                FileVerifyResult {
                    replica_healthy: true,
                    partial: false,
                }
            } else {
                self.bump_failure(filename);
                FileVerifyResult {
                    replica_healthy: false,
                    partial: true,
                }
            }
        };

        self.metrics.set_gauge(
            "replica_healthy",
            if result.replica_healthy { 1.0 } else { 0.0 },
            &[("file", filename)],
        );
        result
    }

    pub fn verify_all(&self, inodes: &[InodeView], health: &NodeHealthCache) -> VerifyAllReport {
        let mut results = HashMap::new();
        let mut pending = 0;
        for inode in inodes {
            let result = self.verify_file(&inode.filename, &inode.replicas, health);
            if result.partial {
                pending += 1;
            }
            results.insert(inode.filename.clone(), result);
        }
        VerifyAllReport { results, pending }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simplidfs_digest::hash;

    #[test]
    fn no_healthy_replicas_marks_partial_and_bumps_failure_counter() {
        let health = NodeHealthCache::with_defaults();
        health.record_failure("A");
        health.record_failure("A");
        let verifier = ReplicaVerifier::new(|_: &str, _: &str| Ok(hash(b"x")), Arc::new(MetricsRegistry::new()));

        let result = verifier.verify_file("f", &["A".to_string()], &health);
        assert!(result.partial);
        assert!(!result.replica_healthy);
        assert_eq!(verifier.failure_count("f"), 1);
    }

    #[test]
    fn agreeing_healthy_replicas_are_not_partial() {
        let health = NodeHealthCache::with_defaults();
        let verifier = ReplicaVerifier::new(|_: &str, _: &str| Ok(hash(b"same")), Arc::new(MetricsRegistry::new()));
        let result = verifier.verify_file("f", &["A".to_string(), "B".to_string()], &health);
        assert!(!result.partial);
        assert!(result.replica_healthy);
    }

    #[test]
    fn disagreeing_healthy_replicas_mark_partial() {
        let health = NodeHealthCache::with_defaults();
        let verifier = ReplicaVerifier::new(
            |node: &str, _: &str| Ok(if node == "A" { hash(b"one") } else { hash(b"two") }),
            Arc::new(MetricsRegistry::new()),
        );
        let result = verifier.verify_file("f", &["A".to_string(), "B".to_string()], &health);
        assert!(result.partial);
        assert!(!result.replica_healthy);
        assert_eq!(verifier.failure_count("f"), 1);
    }

    #[test]
    fn verify_all_aggregates_pending_count() {
        let health = NodeHealthCache::with_defaults();
        let verifier = ReplicaVerifier::new(|_: &str, _: &str| Ok(hash(b"x")), Arc::new(MetricsRegistry::new()));
        health.record_failure("dead");
        health.record_failure("dead");

        let inodes = vec![
            InodeView { filename: "ok".into(), replicas: vec!["A".into()] },
            InodeView { filename: "bad".into(), replicas: vec!["dead".into()] },
        ];
        let report = verifier.verify_all(&inodes, &health);
        assert_eq!(report.pending, 1);
        assert!(!report.results["bad"].replica_healthy);
        assert!(report.results["ok"].replica_healthy);
    }
}
