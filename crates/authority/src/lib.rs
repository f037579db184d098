//! Metadata authority (`spec.md` §4.9): inode table, node registry, and
//! the POSIX-flavored RPC surface that sits behind them.
//!
//! Grounded on the teacher's resilience crate for the lock-serializes-
//! everything shape (a single critical section per mutating call,
//! snapshots handed out for reads) and on `simplidfs-health` /
//! `simplidfs-audit` for the side effects a mutation fans out to. The
//! authority depends on [`simplidfs_health`], [`simplidfs_audit`],
//! [`simplidfs_verifier`], and [`simplidfs_repair`] directly; those
//! crates never depend back on this one (`spec.md` §9 "Cyclic and
//! shared ownership") -- they only see this crate through the
//! [`simplidfs_repair::RepairAccessor`] trait implemented below and the
//! `InodeView` snapshots handed to the verifier.

mod persistence;

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use parking_lot::Mutex;
use simplidfs_audit::AuditLog;
use simplidfs_health::{HealthState, NodeHealthCache};
use simplidfs_proto::ErrorCode;
use simplidfs_repair::{RepairAccessor, RepairInode};
use simplidfs_verifier::InodeView;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeEntry {
    pub replicas: Vec<String>,
    pub partial: bool,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRegistration {
    pub address: String,
    pub registered_at: i64,
    pub last_heartbeat: i64,
    pub alive: bool,
}

struct AuthorityState {
    inodes: HashMap<String, InodeEntry>,
    nodes: HashMap<String, NodeRegistration>,
}

pub struct AuthorityConfig {
    pub replication_factor: usize,
    pub heartbeat_timeout: chrono::Duration,
    pub data_dir: Option<PathBuf>,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            replication_factor: 3,
            heartbeat_timeout: chrono::Duration::seconds(30),
            data_dir: None,
        }
    }
}

/// Exclusive-write/shared-read owner of the inode table and node registry
/// (`spec.md` §5 "Shared-resource policy"). Every mutator takes the same
/// lock; the health cache and audit log are updated from inside that
/// critical section's *call*, but the callbacks into them never reach
/// back into this struct, so no deadlock cycle is possible.
pub struct MetadataAuthority {
    state: Mutex<AuthorityState>,
    health: std::sync::Arc<NodeHealthCache>,
    audit: &'static AuditLog,
    config: AuthorityConfig,
}

impl MetadataAuthority {
    pub fn new(health: std::sync::Arc<NodeHealthCache>, config: AuthorityConfig) -> Self {
        Self {
            state: Mutex::new(AuthorityState {
                inodes: HashMap::new(),
                nodes: HashMap::new(),
            }),
            health,
            audit: AuditLog::global(),
            config,
        }
    }

    fn file_metadata_path(&self) -> Option<PathBuf> {
        self.config.data_dir.as_ref().map(|d| d.join("file_metadata.dat"))
    }

    fn node_registry_path(&self) -> Option<PathBuf> {
        self.config.data_dir.as_ref().map(|d| d.join("node_registry.dat"))
    }

    fn persist(&self, state: &AuthorityState) {
        let (Some(inode_path), Some(node_path)) = (self.file_metadata_path(), self.node_registry_path()) else {
            return;
        };
        if let Err(e) = persistence::save_inodes(&inode_path, &state.inodes) {
            warn!(error = %e, "failed to persist inode table");
        }
        if let Err(e) = persistence::save_nodes(&node_path, &state.nodes) {
            warn!(error = %e, "failed to persist node registry");
        }
    }

    pub fn load(&self) -> std::io::Result<()> {
        let mut state = self.state.lock();
        if let Some(path) = self.file_metadata_path() {
            state.inodes = persistence::load_inodes(&path)?;
        }
        if let Some(path) = self.node_registry_path() {
            state.nodes = persistence::load_nodes(&path)?;
        }
        Ok(())
    }

    pub fn register_node(&self, id: &str, host: &str, port: u16) {
        let now = Utc::now().timestamp();
        let mut state = self.state.lock();
        let address = format!("{host}:{port}");
        state
            .nodes
            .entry(id.to_string())
            .and_modify(|reg| {
                reg.address = address.clone();
                reg.last_heartbeat = now;
                reg.alive = true;
            })
            .or_insert_with(|| NodeRegistration {
                address,
                registered_at: now,
                last_heartbeat: now,
                alive: true,
            });
        self.persist(&state);
        drop(state);
        self.health.record_success(id);
    }

    pub fn heartbeat(&self, id: &str) -> ErrorCode {
        let now = Utc::now().timestamp();
        let mut state = self.state.lock();
        let Some(reg) = state.nodes.get_mut(id) else {
            return ErrorCode::ENoEnt;
        };
        reg.last_heartbeat = now;
        reg.alive = true;
        self.persist(&state);
        drop(state);
        self.health.record_success(id);
        ErrorCode::Success
    }

    /// For every registered node whose last heartbeat is older than the
    /// configured timeout, mark it not-alive and nudge the health cache
    /// toward `DEAD` (the caller is expected to invoke this on a regular
    /// tick, so a single timed-out node accumulates one failure per tick
    /// until it crosses the failure threshold).
    pub fn tick_liveness(&self) -> Vec<String> {
        let now = Utc::now().timestamp();
        let timeout = self.config.heartbeat_timeout.num_seconds();
        let mut timed_out = Vec::new();
        let mut state = self.state.lock();
        for (id, reg) in state.nodes.iter_mut() {
            if now - reg.last_heartbeat > timeout {
                reg.alive = false;
                timed_out.push(id.clone());
            }
        }
        self.persist(&state);
        drop(state);
        for id in &timed_out {
            self.health.record_failure(id);
        }
        timed_out
    }

    fn live_candidates(&self, state: &AuthorityState, preferred: &[String]) -> Vec<String> {
        let mut ordered = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for id in preferred {
            if state.nodes.contains_key(id) && self.health.state(id) == HealthState::Alive && seen.insert(id.clone()) {
                ordered.push(id.clone());
            }
        }
        for id in state.nodes.keys() {
            if self.health.state(id) == HealthState::Alive && seen.insert(id.clone()) {
                ordered.push(id.clone());
            }
        }
        ordered
    }

    pub fn add_file(&self, filename: &str, preferred_nodes: &[String], mode: u32) -> ErrorCode {
        let mut state = self.state.lock();
        if state.inodes.contains_key(filename) {
            return ErrorCode::EExist;
        }
        let candidates = self.live_candidates(&state, preferred_nodes);
        if candidates.is_empty() {
            return ErrorCode::ENoSpc;
        }
        let r = self.config.replication_factor;
        if candidates.len() < r {
            warn!(filename, available = candidates.len(), wanted = r, "placing file below target replication factor");
        }
        let replicas: Vec<String> = candidates.into_iter().take(r).collect();
        let partial = replicas.len() < r;
        state.inodes.insert(
            filename.to_string(),
            InodeEntry {
                replicas,
                partial,
                mode,
                uid: 0,
                gid: 0,
                size: 0,
            },
        );
        self.persist(&state);
        drop(state);
        self.audit.record_create(filename);
        ErrorCode::Success
    }

    pub fn remove_file(&self, filename: &str) -> bool {
        let mut state = self.state.lock();
        let removed = state.inodes.remove(filename).is_some();
        if removed {
            self.persist(&state);
        }
        drop(state);
        if removed {
            self.audit.record_delete(filename);
        }
        removed
    }

    pub fn get_attributes(&self, filename: &str) -> Result<(u32, u32, u32, u64), ErrorCode> {
        let state = self.state.lock();
        state
            .inodes
            .get(filename)
            .map(|e| (e.mode, e.uid, e.gid, e.size))
            .ok_or(ErrorCode::ENoEnt)
    }

    pub fn list_files(&self) -> Vec<String> {
        self.state.lock().inodes.keys().cloned().collect()
    }

    pub fn check_access(&self, filename: &str, _mask: u32) -> ErrorCode {
        if self.state.lock().inodes.contains_key(filename) {
            ErrorCode::Success
        } else {
            ErrorCode::ENoEnt
        }
    }

    pub fn open_file(&self, filename: &str, _flags: u32) -> ErrorCode {
        if self.state.lock().inodes.contains_key(filename) {
            ErrorCode::Success
        } else {
            ErrorCode::ENoEnt
        }
    }

    /// Offset and requested size are clamped to the stored file size;
    /// reading past EOF yields zero bytes, not an error.
    pub fn read_file_data(&self, filename: &str, offset: u64, size: u64) -> Result<u64, ErrorCode> {
        let state = self.state.lock();
        let entry = state.inodes.get(filename).ok_or(ErrorCode::ENoEnt)?;
        if offset >= entry.size {
            return Ok(0);
        }
        let available = entry.size - offset;
        Ok(available.min(size))
    }

    pub fn write_file_data(&self, filename: &str, offset: u64, len: u64) -> Result<u64, ErrorCode> {
        let mut state = self.state.lock();
        let entry = state.inodes.get_mut(filename).ok_or(ErrorCode::ENoEnt)?;
        entry.size = entry.size.max(offset + len);
        self.persist(&state);
        drop(state);
        self.audit.record_write(filename);
        Ok(len)
    }

    pub fn rename_file_entry(&self, old: &str, new: &str) -> ErrorCode {
        let mut state = self.state.lock();
        if !state.inodes.contains_key(old) {
            return ErrorCode::ENoEnt;
        }
        if state.inodes.contains_key(new) {
            return ErrorCode::EExist;
        }
        let entry = state.inodes.remove(old).expect("checked above");
        state.inodes.insert(new.to_string(), entry);
        self.persist(&state);
        ErrorCode::Success
    }

    /// Snapshot of the node registry for operational tooling (`ctl health`);
    /// the in-process health cache's hysteresis state doesn't survive
    /// across processes, so this reports the last persisted `alive` bit
    /// instead.
    pub fn node_registrations(&self) -> Vec<(String, NodeRegistration)> {
        self.state.lock().nodes.iter().map(|(id, reg)| (id.clone(), reg.clone())).collect()
    }

    /// Snapshot for the replica verifier (`spec.md` §4.7); this is the
    /// only shape in which inode data crosses into that crate.
    pub fn inode_views(&self) -> Vec<InodeView> {
        self.state
            .lock()
            .inodes
            .iter()
            .map(|(filename, entry)| InodeView {
                filename: filename.clone(),
                replicas: entry.replicas.clone(),
            })
            .collect()
    }

    /// Apply a verifier report: any file the verifier marked `partial`
    /// is flagged so the repair worker picks it up next tick.
    pub fn apply_verify_report(&self, report: &simplidfs_verifier::VerifyAllReport) {
        let mut state = self.state.lock();
        for (filename, result) in &report.results {
            if let Some(entry) = state.inodes.get_mut(filename) {
                entry.partial = result.partial;
            }
        }
        self.persist(&state);
    }
}

impl RepairAccessor for MetadataAuthority {
    fn partial_inodes(&self) -> Vec<RepairInode> {
        self.state
            .lock()
            .inodes
            .iter()
            .filter(|(_, e)| e.partial)
            .map(|(filename, e)| RepairInode {
                filename: filename.clone(),
                replicas: e.replicas.clone(),
            })
            .collect()
    }

    fn apply_repair(&self, filename: &str, new_replicas: Vec<String>, cleared: bool) {
        let mut state = self.state.lock();
        if let Some(entry) = state.inodes.get_mut(filename) {
            entry.replicas = new_replicas;
            entry.partial = !cleared;
        }
        self.persist(&state);
    }
}
