//! Cluster encryption key lifecycle, grounded on
//! `original_source/include/utilities/key_manager.hpp` and
//! `src/utilities/key_manager.cpp`: an env-seeded-or-random 32-byte key
//! with a windowed rotation that keeps the previous key retrievable for a
//! grace period. The original declares `rotateClusterKey`/
//! `getPreviousClusterKey` but never defines them; this fills in that gap
//! in the idiom the rest of the header implies (a timed expiry checked on
//! read).

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::RngCore;
use tracing::{info, warn};

pub const KEY_BYTES: usize = 32;
pub const ENV_VAR: &str = "SIMPLIDFS_CLUSTER_KEY";

#[derive(Debug, thiserror::Error)]
pub enum KeyManagerError {
    #[error("{0} must be 64 hex characters (got {1})")]
    WrongLength(&'static str, usize),
    #[error("{0} is not valid hex: {1}")]
    InvalidHex(&'static str, hex::FromHexError),
}

struct PreviousKey {
    key: [u8; KEY_BYTES],
    expires_at: Instant,
}

struct Inner {
    key: [u8; KEY_BYTES],
    previous: Option<PreviousKey>,
}

/// One instance per process; `simplidfs-server` owns it and threads it
/// through to whatever needs the cluster key. Unlike the audit log this is
/// not a forced singleton -- nothing here needs process-wide sharing
/// beyond what the owner already has.
pub struct KeyManager {
    inner: Mutex<Inner>,
}

impl KeyManager {
    /// Reads `SIMPLIDFS_CLUSTER_KEY` if present and well-formed; otherwise
    /// generates a random key.
    pub fn from_env() -> Result<Self, KeyManagerError> {
        let key = match std::env::var(ENV_VAR) {
            Ok(hex_str) => match decode_hex_key(&hex_str) {
                Ok(key) => {
                    info!("cluster key seeded from environment");
                    key
                }
                Err(e) => {
                    warn!(error = %e, "cluster key env var rejected");
                    return Err(e);
                }
            },
            Err(_) => {
                info!("no cluster key in environment; generating a random one");
                random_key()
            }
        };
        Ok(Self {
            inner: Mutex::new(Inner { key, previous: None }),
        })
    }

    pub fn cluster_key(&self) -> [u8; KEY_BYTES] {
        self.inner.lock().key
    }

    /// Generates a fresh key, retiring the current one to "previous" for
    /// `window_seconds`.
    pub fn rotate_key(&self, window_seconds: u64) {
        let mut inner = self.inner.lock();
        let retiring = inner.key;
        inner.key = random_key();
        inner.previous = Some(PreviousKey {
            key: retiring,
            expires_at: Instant::now() + Duration::from_secs(window_seconds),
        });
        info!(window_seconds, "cluster key rotated");
    }

    /// `Some` iff a rotation happened and its retention window hasn't
    /// elapsed yet.
    pub fn previous_cluster_key(&self) -> Option<[u8; KEY_BYTES]> {
        let inner = self.inner.lock();
        inner
            .previous
            .as_ref()
            .filter(|p| Instant::now() < p.expires_at)
            .map(|p| p.key)
    }
}

fn random_key() -> [u8; KEY_BYTES] {
    let mut key = [0u8; KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

fn decode_hex_key(hex_str: &str) -> Result<[u8; KEY_BYTES], KeyManagerError> {
    if hex_str.len() != KEY_BYTES * 2 {
        return Err(KeyManagerError::WrongLength(ENV_VAR, hex_str.len()));
    }
    let bytes = hex::decode(hex_str).map_err(|e| KeyManagerError::InvalidHex(ENV_VAR, e))?;
    let mut key = [0u8; KEY_BYTES];
    key.copy_from_slice(&bytes);
    Ok(key)
}
