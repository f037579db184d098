//! Content-addressed blob store (`spec.md` §4.3).

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use simplidfs_digest::{hash, Digest};
use tracing::debug;

pub type Cid = Digest;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub total: usize,
    pub reclaimable: usize,
    pub reclaimable_bytes: u64,
    pub freed: usize,
    pub freed_bytes: u64,
}

/// A single reader-writer mutex over the whole map is sufficient
/// (`spec.md` §4.3 "Concurrency"): every public operation takes that lock
/// for its entire critical section, so `gc` can never race a concurrent
/// `put`/`get`.
#[derive(Default)]
pub struct ChunkStore {
    chunks: RwLock<HashMap<Cid, Vec<u8>>>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash `bytes`, store them if absent, and return the CID. Storing an
    /// existing CID is a no-op; deduplication is automatic.
    pub fn put(&self, bytes: &[u8]) -> Cid {
        let cid = hash(bytes);
        let mut chunks = self.chunks.write();
        chunks.entry(cid).or_insert_with(|| bytes.to_vec());
        cid
    }

    pub fn has(&self, cid: &Cid) -> bool {
        self.chunks.read().contains_key(cid)
    }

    pub fn get(&self, cid: &Cid) -> Option<Vec<u8>> {
        self.chunks.read().get(cid).cloned()
    }

    /// Chunks whose CID is not in `referenced` are reclaimable; when
    /// `dry_run` is false they are removed in the same critical section
    /// that computed reclaimability.
    pub fn gc(&self, referenced: &HashSet<Cid>, dry_run: bool) -> GcStats {
        let mut chunks = self.chunks.write();
        let total = chunks.len();

        let mut reclaimable = 0usize;
        let mut reclaimable_bytes = 0u64;
        let to_remove: Vec<Cid> = chunks
            .iter()
            .filter(|(cid, _)| !referenced.contains(*cid))
            .map(|(cid, bytes)| {
                reclaimable += 1;
                reclaimable_bytes += bytes.len() as u64;
                *cid
            })
            .collect();

        let mut freed = 0usize;
        let mut freed_bytes = 0u64;
        if !dry_run {
            for cid in &to_remove {
                if let Some(bytes) = chunks.remove(cid) {
                    freed += 1;
                    freed_bytes += bytes.len() as u64;
                }
            }
        }

        debug!(total, reclaimable, freed, dry_run, "chunk store gc pass");
        GcStats {
            total,
            reclaimable,
            reclaimable_bytes,
            freed,
            freed_bytes,
        }
    }
}
