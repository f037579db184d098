//! Tamper-evident, hash-chained audit log (`spec.md` §4.5) plus a
//! cancellable background verifier thread, in the same chunked-sleep /
//! running-flag shape as the repair worker and the Raft timers
//! (`spec.md` §5 "Cancellation & timeouts").

mod verifier;

use std::sync::{Mutex, OnceLock};

use chrono::Utc;
use simplidfs_digest::{digest_to_cid, hash};
use tracing::debug;

pub use verifier::AuditVerifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Create,
    Write,
    Delete,
}

impl EventKind {
    fn as_str(self) -> &'static str {
        match self {
            EventKind::Create => "CREATE",
            EventKind::Write => "WRITE",
            EventKind::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub kind: EventKind,
    pub file: String,
    pub timestamp: i64,
    pub prev_hash: String,
    pub hash: String,
}

fn compute_hash(prev_hash: &str, kind: EventKind, file: &str, timestamp: i64) -> String {
    let mut buf = Vec::new();
    buf.extend_from_slice(prev_hash.as_bytes());
    buf.extend_from_slice(kind.as_str().as_bytes());
    buf.extend_from_slice(file.as_bytes());
    buf.extend_from_slice(timestamp.to_string().as_bytes());
    digest_to_cid(hash(&buf))
}

/// Process-global, single-mutex hash-chained event log
/// (`spec.md` §9 "Global state"). Obtain the shared instance with
/// [`AuditLog::global`]; do not construct more than one in production.
pub struct AuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl AuditLog {
    fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn global() -> &'static AuditLog {
        static INSTANCE: OnceLock<AuditLog> = OnceLock::new();
        INSTANCE.get_or_init(AuditLog::new)
    }

    fn append(&self, kind: EventKind, file: &str) {
        let mut events = self.events.lock().unwrap();
        let prev_hash = events.last().map(|e| e.hash.clone()).unwrap_or_default();
        let timestamp = Utc::now().timestamp();
        let hash = compute_hash(&prev_hash, kind, file, timestamp);
        debug!(file, kind = kind.as_str(), "appending audit event");
        events.push(AuditEvent {
            kind,
            file: file.to_string(),
            timestamp,
            prev_hash,
            hash,
        });
    }

    pub fn record_create(&self, file: &str) {
        self.append(EventKind::Create, file);
    }

    pub fn record_write(&self, file: &str) {
        self.append(EventKind::Write, file);
    }

    pub fn record_delete(&self, file: &str) {
        self.append(EventKind::Delete, file);
    }

    /// An immutable snapshot, never a live reference.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Recompute every event's hash from its fields and `prev_hash`;
    /// returns false at the first mismatch.
    pub fn verify(&self) -> bool {
        let events = self.events.lock().unwrap();
        let mut expected_prev = String::new();
        for event in events.iter() {
            if event.prev_hash != expected_prev {
                return false;
            }
            let recomputed =
                compute_hash(&event.prev_hash, event.kind, &event.file, event.timestamp);
            if recomputed != event.hash {
                return false;
            }
            expected_prev = event.hash.clone();
        }
        true
    }

    /// Test-only: truncate the log. Never call this from production code.
    #[cfg(feature = "test-util")]
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}
