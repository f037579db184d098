//! Atomic (temp file + rename) save/load of the two flat text files
//! described in `spec.md` §6 "Persistence files".

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::{InodeEntry, NodeRegistration};

pub fn save_inodes(path: &Path, inodes: &HashMap<String, InodeEntry>) -> io::Result<()> {
    let mut body = String::new();
    for (filename, entry) in inodes {
        body.push_str(filename);
        body.push('|');
        body.push_str(&entry.replicas.join(","));
        body.push('\n');
    }
    atomic_write(path, &body)
}

pub fn load_inodes(path: &Path) -> io::Result<HashMap<String, InodeEntry>> {
    let mut out = HashMap::new();
    if !path.exists() {
        return Ok(out);
    }
    let text = fs::read_to_string(path)?;
    for line in text.lines().filter(|l| !l.is_empty()) {
        let Some((filename, replicas)) = line.split_once('|') else {
            continue;
        };
        let replicas: Vec<String> = if replicas.is_empty() {
            Vec::new()
        } else {
            replicas.split(',').map(|s| s.to_string()).collect()
        };
        out.insert(
            filename.to_string(),
            InodeEntry {
                replicas,
                partial: false,
                mode: 0o644,
                uid: 0,
                gid: 0,
                size: 0,
            },
        );
    }
    Ok(out)
}

pub fn save_nodes(path: &Path, nodes: &HashMap<String, NodeRegistration>) -> io::Result<()> {
    let mut body = String::new();
    for (id, reg) in nodes {
        body.push_str(&format!(
            "{}|{}|{}|{}|{}\n",
            id, reg.address, reg.registered_at, reg.last_heartbeat, reg.alive
        ));
    }
    atomic_write(path, &body)
}

pub fn load_nodes(path: &Path) -> io::Result<HashMap<String, NodeRegistration>> {
    let mut out = HashMap::new();
    if !path.exists() {
        return Ok(out);
    }
    let text = fs::read_to_string(path)?;
    for line in text.lines().filter(|l| !l.is_empty()) {
        let fields: Vec<&str> = line.splitn(5, '|').collect();
        if fields.len() != 5 {
            continue;
        }
        let id = fields[0].to_string();
        let address = fields[1].to_string();
        let registered_at: i64 = fields[2].parse().unwrap_or(0);
        let last_heartbeat: i64 = fields[3].parse().unwrap_or(0);
        let alive: bool = fields[4].parse().unwrap_or(false);
        out.insert(
            id,
            NodeRegistration {
                address,
                registered_at,
                last_heartbeat,
                alive,
            },
        );
    }
    Ok(out)
}

fn atomic_write(path: &Path, body: &str) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(body.as_bytes())?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)
}
