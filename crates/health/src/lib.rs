//! Hysteretic per-node liveness cache (`spec.md` §4.6). Grounded on the
//! teacher's circuit breaker (`resilience/src/circuit_breaker.rs`:
//! `Closed`/`Open`/`HalfOpen` gated by `failure_threshold`/
//! `success_threshold`) and health checker
//! (`resilience/src/health_check.rs`), renamed to the SimpliDFS
//! ALIVE/SUSPECT/DEAD vocabulary and generalized with a cooldown before a
//! DEAD node may be promoted back.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

pub type NodeId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthState {
    Alive,
    Suspect,
    Dead,
}

#[derive(Debug, Clone, Copy)]
pub struct HealthCacheConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub cooldown: Duration,
}

impl Default for HealthCacheConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            success_threshold: 3,
            cooldown: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
struct HealthRecord {
    state: HealthState,
    failures: u32,
    successes: u32,
    last_change: Instant,
    last_failure: Option<Instant>,
}

impl HealthRecord {
    fn fresh(now: Instant) -> Self {
        Self {
            state: HealthState::Alive,
            failures: 0,
            successes: 0,
            last_change: now,
            last_failure: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HealthSnapshotEntry {
    pub state: HealthState,
    pub last_change: Instant,
}

pub struct NodeHealthCache {
    config: HealthCacheConfig,
    nodes: DashMap<NodeId, HealthRecord>,
}

impl NodeHealthCache {
    pub fn new(config: HealthCacheConfig) -> Self {
        Self {
            config,
            nodes: DashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(HealthCacheConfig::default())
    }

    /// ALIVE with zeroed counters for any node never seen before
    /// (optimistic default) -- this does not create an entry.
    pub fn state(&self, id: &str) -> HealthState {
        self.nodes
            .get(id)
            .map(|r| r.state)
            .unwrap_or(HealthState::Alive)
    }

    pub fn healthy_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|entry| entry.state == HealthState::Alive)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn snapshot(&self) -> std::collections::HashMap<NodeId, HealthSnapshotEntry> {
        self.nodes
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    HealthSnapshotEntry {
                        state: entry.state,
                        last_change: entry.last_change,
                    },
                )
            })
            .collect()
    }

    pub fn record_failure(&self, id: &str) {
        let now = Instant::now();
        let mut record = self
            .nodes
            .entry(id.to_string())
            .or_insert_with(|| HealthRecord::fresh(now));
        record.successes = 0;
        record.last_failure = Some(now);
        match record.state {
            HealthState::Alive | HealthState::Suspect => {
                let new_failures = record.failures + 1;
                if new_failures >= self.config.failure_threshold {
                    record.state = HealthState::Dead;
                    record.failures = 0;
                    record.last_change = now;
                } else {
                    record.state = HealthState::Suspect;
                    record.failures = new_failures;
                }
            }
            HealthState::Dead => {
                // No transition is defined for a failure while already
                // DEAD; the failure timestamp still anchors the cooldown.
            }
        }
        debug!(id, state = ?record.state, "health: failure recorded");
    }

    pub fn record_success(&self, id: &str) {
        let now = Instant::now();
        let mut record = self
            .nodes
            .entry(id.to_string())
            .or_insert_with(|| HealthRecord::fresh(now));
        record.failures = 0;
        match record.state {
            HealthState::Alive => {
                record.successes = (record.successes + 1).min(self.config.success_threshold);
            }
            HealthState::Suspect => {
                let new_successes = record.successes + 1;
                if new_successes >= self.config.success_threshold {
                    record.state = HealthState::Alive;
                    record.successes = 0;
                    record.last_change = now;
                } else {
                    record.successes = new_successes;
                }
            }
            HealthState::Dead => {
                let cooled_down = record
                    .last_failure
                    .map(|t| now.duration_since(t) >= self.config.cooldown)
                    .unwrap_or(true);
                if cooled_down {
                    let new_successes = record.successes + 1;
                    if new_successes >= self.config.success_threshold {
                        record.state = HealthState::Alive;
                        record.successes = 0;
                        record.last_change = now;
                    } else {
                        record.successes = new_successes;
                    }
                }
                // Cooldown still active: no promotion, counters untouched.
            }
        }
        debug!(id, state = ?record.state, "health: success recorded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with(failure_threshold: u32, success_threshold: u32, cooldown: Duration) -> NodeHealthCache {
        NodeHealthCache::new(HealthCacheConfig {
            failure_threshold,
            success_threshold,
            cooldown,
        })
    }

    #[test]
    fn unknown_node_defaults_to_alive() {
        let cache = NodeHealthCache::with_defaults();
        assert_eq!(cache.state("ghost"), HealthState::Alive);
    }

    #[test]
    fn two_failures_reach_dead_with_default_threshold() {
        let cache = NodeHealthCache::with_defaults();
        cache.record_failure("n1");
        assert_eq!(cache.state("n1"), HealthState::Suspect);
        cache.record_failure("n1");
        assert_eq!(cache.state("n1"), HealthState::Dead);
    }

    #[test]
    fn promotion_from_dead_requires_cooldown_then_successes() {
        let cache = cache_with(2, 3, Duration::from_millis(50));
        cache.record_failure("n1");
        cache.record_failure("n1");
        assert_eq!(cache.state("n1"), HealthState::Dead);

        // Successes during the cooldown window never promote.
        cache.record_success("n1");
        cache.record_success("n1");
        cache.record_success("n1");
        assert_eq!(cache.state("n1"), HealthState::Dead);

        std::thread::sleep(Duration::from_millis(60));
        cache.record_success("n1");
        cache.record_success("n1");
        cache.record_success("n1");
        assert_eq!(cache.state("n1"), HealthState::Alive);
    }

    #[test]
    fn failure_always_resets_the_success_counter() {
        let cache = cache_with(5, 3, Duration::from_millis(1));
        cache.record_success("n1");
        cache.record_success("n1");
        cache.record_failure("n1");
        cache.record_success("n1");
        cache.record_success("n1");
        // Needed 3 in a row from a clean counter; two isn't enough yet.
        assert_eq!(cache.state("n1"), HealthState::Alive);
    }

    #[test]
    fn healthy_nodes_lists_only_alive() {
        let cache = NodeHealthCache::with_defaults();
        cache.record_success("alive-node");
        cache.record_failure("dead-node");
        cache.record_failure("dead-node");
        let healthy = cache.healthy_nodes();
        assert!(healthy.contains(&"alive-node".to_string()));
        assert!(!healthy.contains(&"dead-node".to_string()));
    }
}
