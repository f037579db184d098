//! Repair worker: drives under-replicated inodes back to the target
//! replication factor (`spec.md` §4.8).
//!
//! Like the replica verifier, the worker never reaches back into the
//! metadata authority's internals directly -- it reads through
//! [`RepairAccessor`] and writes back through the same trait, keeping the
//! authority -> repair dependency one-directional (`spec.md` §9).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use simplidfs_health::NodeHealthCache;
use tracing::{info, warn};

const SLEEP_GRANULARITY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RepairInode {
    pub filename: String,
    pub replicas: Vec<String>,
}

/// Read/write seam into the metadata authority's inode table.
pub trait RepairAccessor: Send + Sync {
    /// Every inode currently marked `partial`.
    fn partial_inodes(&self) -> Vec<RepairInode>;
    /// Install the (possibly extended) replica list for `filename` and
    /// clear `partial` iff `cleared`.
    fn apply_repair(&self, filename: &str, new_replicas: Vec<String>, cleared: bool);
}

/// `(filename, source, target)`, invoked once per newly-added replica. Free
/// to be a no-op in tests.
pub type Replicator = Box<dyn Fn(&str, &str, &str) + Send + Sync>;

pub struct RepairWorker<A: RepairAccessor + 'static> {
    accessor: Arc<A>,
    health: Arc<NodeHealthCache>,
    replicator: Replicator,
    replication_factor: usize,
    tick: Duration,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl<A: RepairAccessor + 'static> RepairWorker<A> {
    pub fn new(
        accessor: Arc<A>,
        health: Arc<NodeHealthCache>,
        replicator: Replicator,
        replication_factor: usize,
    ) -> Self {
        Self {
            accessor,
            health,
            replicator,
            replication_factor,
            tick: Duration::from_secs(5),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Execute exactly one repair pass without starting the background loop.
    pub fn run_once(&self) {
        for inode in self.accessor.partial_inodes() {
            if inode.replicas.len() >= self.replication_factor {
                // Already at factor; nothing to add but still clear partial
                // since the length condition for repair no longer holds.
                self.accessor.apply_repair(&inode.filename, inode.replicas, true);
                continue;
            }

            let candidate_limit = 2 * self.replication_factor;
            let mut candidates: Vec<String> = self
                .health
                .healthy_nodes()
                .into_iter()
                .filter(|n| !inode.replicas.contains(n))
                .collect();
            // `healthy_nodes()` iterates a `DashMap`, whose order isn't
            // stable across runs; sort so repair targets are deterministic.
            candidates.sort();
            candidates.truncate(candidate_limit);

            let source = inode.replicas.first().cloned();
            let mut replicas = inode.replicas.clone();

            for target in candidates {
                if replicas.len() >= self.replication_factor {
                    break;
                }
                match &source {
                    Some(source) => (self.replicator)(&inode.filename, source, &target),
                    None => warn!(
                        file = %inode.filename,
                        target,
                        "no existing replica to copy from; adding target with no source copy"
                    ),
                }
                replicas.push(target);
            }

            let cleared = replicas.len() >= self.replication_factor;
            if cleared {
                info!(file = %inode.filename, replicas = ?replicas, "repair pass healed inode");
            }
            self.accessor.apply_repair(&inode.filename, replicas, cleared);
        }
    }

    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let accessor = self.accessor.clone();
        let health = self.health.clone();
        let running = self.running.clone();
        let tick = self.tick;
        let replication_factor = self.replication_factor;

        // The closure can't borrow `self.replicator`/`run_once`, so the loop
        // re-implements the single pass using only `Send + 'static` handles.
        // `replicator` must be moved in, so `start` takes it by replacing it
        // with a no-op for the lifetime of the background thread.
        let replicator = std::mem::replace(&mut self.replicator, Box::new(|_, _, _| {}));
        let worker = RunOnceState {
            accessor,
            health,
            replicator,
            replication_factor,
        };

        self.handle = Some(std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                worker.run_once();
                sleep_chunked(tick, &running);
            }
        }));
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// The pieces of a `RepairWorker` that the background thread needs to own,
/// separated out so `start()` can move them into the thread while
/// `run_once()` keeps working against `&self` for callers that only want a
/// single pass.
struct RunOnceState<A: RepairAccessor> {
    accessor: Arc<A>,
    health: Arc<NodeHealthCache>,
    replicator: Replicator,
    replication_factor: usize,
}

impl<A: RepairAccessor> RunOnceState<A> {
    fn run_once(&self) {
        for inode in self.accessor.partial_inodes() {
            if inode.replicas.len() >= self.replication_factor {
                self.accessor.apply_repair(&inode.filename, inode.replicas, true);
                continue;
            }
            let candidate_limit = 2 * self.replication_factor;
            let mut candidates: Vec<String> = self
                .health
                .healthy_nodes()
                .into_iter()
                .filter(|n| !inode.replicas.contains(n))
                .collect();
            candidates.sort();
            candidates.truncate(candidate_limit);

            let source = inode.replicas.first().cloned();
            let mut replicas = inode.replicas.clone();
            for target in candidates {
                if replicas.len() >= self.replication_factor {
                    break;
                }
                if let Some(source) = &source {
                    (self.replicator)(&inode.filename, source, &target);
                }
                replicas.push(target);
            }
            let cleared = replicas.len() >= self.replication_factor;
            self.accessor.apply_repair(&inode.filename, replicas, cleared);
        }
    }
}

fn sleep_chunked(total: Duration, running: &AtomicBool) {
    let mut remaining = total;
    while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
        let step = remaining.min(SLEEP_GRANULARITY);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

impl<A: RepairAccessor + 'static> Drop for RepairWorker<A> {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeAuthority {
        table: Mutex<std::collections::HashMap<String, (Vec<String>, bool)>>,
    }

    impl RepairAccessor for FakeAuthority {
        fn partial_inodes(&self) -> Vec<RepairInode> {
            self.table
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, (_, partial))| *partial)
                .map(|(name, (replicas, _))| RepairInode {
                    filename: name.clone(),
                    replicas: replicas.clone(),
                })
                .collect()
        }

        fn apply_repair(&self, filename: &str, new_replicas: Vec<String>, cleared: bool) {
            self.table
                .lock()
                .unwrap()
                .insert(filename.to_string(), (new_replicas, !cleared));
        }
    }

    #[test]
    fn run_once_heals_a_partial_file_to_the_replication_factor() {
        let mut table = std::collections::HashMap::new();
        table.insert("file".to_string(), (vec!["A".to_string()], true));
        let accessor = Arc::new(FakeAuthority {
            table: Mutex::new(table),
        });

        let health = Arc::new(NodeHealthCache::with_defaults());
        health.record_success("B");
        health.record_success("C");

        let worker = RepairWorker::new(
            accessor.clone(),
            health,
            Box::new(|_, _, _| {}),
            3,
        );
        worker.run_once();

        let table = accessor.table.lock().unwrap();
        let (replicas, partial) = table.get("file").unwrap();
        assert_eq!(replicas, &vec!["A".to_string(), "B".to_string(), "C".to_string()]);
        assert!(!partial);
    }

    #[test]
    fn run_once_leaves_partial_when_not_enough_healthy_candidates() {
        let mut table = std::collections::HashMap::new();
        table.insert("file".to_string(), (vec!["A".to_string()], true));
        let accessor = Arc::new(FakeAuthority {
            table: Mutex::new(table),
        });
        let health = Arc::new(NodeHealthCache::with_defaults());

        let worker = RepairWorker::new(accessor.clone(), health, Box::new(|_, _, _| {}), 3);
        worker.run_once();

        let table = accessor.table.lock().unwrap();
        let (replicas, partial) = table.get("file").unwrap();
        assert_eq!(replicas, &vec!["A".to_string()]);
        assert!(partial);
    }

    #[test]
    fn start_stop_is_idempotent_and_joins() {
        let accessor = Arc::new(FakeAuthority {
            table: Mutex::new(std::collections::HashMap::new()),
        });
        let health = Arc::new(NodeHealthCache::with_defaults());
        let mut worker =
            RepairWorker::new(accessor, health, Box::new(|_, _, _| {}), 3).with_tick(Duration::from_millis(20));
        worker.start();
        worker.start();
        std::thread::sleep(Duration::from_millis(50));
        worker.stop();
        worker.stop();
    }
}
