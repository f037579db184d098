//! Merkle DAG: ordered-child directory hashing and inclusion proofs
//! (`spec.md` §4.4). Generalized from the teacher's file-tree digest
//! (`recovery/src/merkle/tree.rs`) to arbitrary named children.

use std::collections::HashMap;

use parking_lot::RwLock;
use simplidfs_chunkstore::{Cid, ChunkStore};
use simplidfs_digest::hash;

/// Maps a DAG node's CID to its sorted, deduplicated child list, so that
/// `proof_path`/`verify_proof` can walk and recompute ancestors without
/// re-reading raw chunk bytes.
#[derive(Default)]
pub struct DagIndex {
    children: RwLock<HashMap<Cid, Vec<(String, Cid)>>>,
}

impl DagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn children_of(&self, node: &Cid) -> Option<Vec<(String, Cid)>> {
        self.children.read().get(node).cloned()
    }

    fn record(&self, node: Cid, children: Vec<(String, Cid)>) {
        self.children.write().insert(node, children);
    }
}

fn normalize(mut entries: Vec<(String, Cid)>) -> Vec<(String, Cid)> {
    entries.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    entries.dedup();
    entries
}

fn serialize_node(entries: &[(String, Cid)]) -> Vec<u8> {
    let mut buf = Vec::new();
    for (name, cid) in entries {
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(cid.as_bytes());
    }
    buf
}

/// Sort ascending by name, deduplicate exact `(name, cid)` collisions,
/// serialize, hash, insert the node into `store`, record the sorted child
/// list in `index`, and return the resulting CID. Deterministic under any
/// permutation of the same entries.
pub fn hash_directory(entries: Vec<(String, Cid)>, store: &ChunkStore, index: &DagIndex) -> Cid {
    let sorted = normalize(entries);
    let serialized = serialize_node(&sorted);
    let cid = hash(&serialized);
    store.put(&serialized);
    index.record(cid, sorted);
    cid
}

/// `[target, ..., root]`, a path of ancestors from `target` up to `root`.
/// Empty if `target` is unreachable from `root`.
pub fn proof_path(root: Cid, target: Cid, index: &DagIndex) -> Vec<Cid> {
    let mut path = Vec::new();
    if dfs(root, target, index, &mut path) {
        path.reverse();
        path
    } else {
        Vec::new()
    }
}

fn dfs(node: Cid, target: Cid, index: &DagIndex, path: &mut Vec<Cid>) -> bool {
    path.push(node);
    if node == target {
        return true;
    }
    if let Some(children) = index.children_of(&node) {
        for (_, child) in children {
            if dfs(child, target, index, path) {
                return true;
            }
        }
    }
    path.pop();
    false
}

/// `path.first == target`, `path.last == root`, and for every adjacent
/// `(child, parent)` pair, recomputing the parent's digest from its
/// recorded sorted child list equals `parent` and one of its children's
/// CIDs equals `child`.
pub fn verify_proof(root: Cid, target: Cid, path: &[Cid], index: &DagIndex) -> bool {
    if path.first() != Some(&target) || path.last() != Some(&root) {
        return false;
    }
    for window in path.windows(2) {
        let (child, parent) = (window[0], window[1]);
        let Some(children) = index.children_of(&parent) else {
            return false;
        };
        let recomputed = hash(&serialize_node(&children));
        if recomputed != parent {
            return false;
        }
        if !children.iter().any(|(_, c)| *c == child) {
            return false;
        }
    }
    true
}
