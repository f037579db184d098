//! Content digests and textual CIDs.
//!
//! The hash function behind every content address in SimpliDFS — chunks,
//! Merkle DAG nodes, and audit log events — is BLAKE3. A [`Digest`] is the
//! raw 256-bit output; a CID is `Digest` plus a small fixed prefix, encoded
//! as lowercase unpadded base32 (RFC 4648) for use on the wire and in the
//! CLI.

use std::fmt;

use data_encoding::Specification;
use serde::{Deserialize, Serialize};

/// `[CIDv1, codec=raw, hash-algo=blake3, hash-length=32]`.
///
/// Not a registered multicodec varint encoding — just a fixed 4-byte tag,
/// per the historical on-wire format this is reproducing.
pub const CID_PREFIX: [u8; 4] = [0x01, 0x70, 0x1e, 0x20];

const DIGEST_LEN: usize = 32;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CidError {
    #[error("CID string is empty")]
    Empty,
    #[error("CID is not valid base32: {0}")]
    InvalidBase32(String),
    #[error("decoded CID has length {got}, expected {expected}")]
    InvalidLength { expected: usize, got: usize },
    #[error("CID prefix mismatch: expected {expected:?}, got {got:?}")]
    PrefixMismatch { expected: [u8; 4], got: [u8; 4] },
}

/// A fixed 256-bit content digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    pub const LEN: usize = DIGEST_LEN;

    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", digest_to_cid(*self))
    }
}

impl From<blake3::Hash> for Digest {
    fn from(h: blake3::Hash) -> Self {
        Digest(*h.as_bytes())
    }
}

fn base32_spec() -> Specification {
    let mut spec = Specification::new();
    spec.symbols.push_str("abcdefghijklmnopqrstuvwxyz234567");
    spec
}

/// Hash arbitrary bytes with the content-addressing digest used throughout
/// SimpliDFS.
pub fn hash(bytes: &[u8]) -> Digest {
    blake3::hash(bytes).into()
}

/// Encode a digest as a textual CID: fixed prefix + digest, lowercase
/// unpadded base32. Pure and allocation-only.
pub fn digest_to_cid(digest: Digest) -> String {
    let spec = base32_spec();
    let codec = spec.encoding().expect("valid base32 alphabet");
    let mut buf = Vec::with_capacity(CID_PREFIX.len() + Digest::LEN);
    buf.extend_from_slice(&CID_PREFIX);
    buf.extend_from_slice(digest.as_bytes());
    codec.encode(&buf)
}

/// Decode a textual CID back into its raw prefix+digest bytes.
pub fn cid_to_bytes(cid: &str) -> Result<Vec<u8>, CidError> {
    if cid.is_empty() {
        return Err(CidError::Empty);
    }
    let spec = base32_spec();
    let codec = spec.encoding().expect("valid base32 alphabet");
    let decoded = codec
        .decode(cid.as_bytes())
        .map_err(|e| CidError::InvalidBase32(e.to_string()))?;
    let expected = CID_PREFIX.len() + Digest::LEN;
    if decoded.len() != expected {
        return Err(CidError::InvalidLength {
            expected,
            got: decoded.len(),
        });
    }
    Ok(decoded)
}

/// Decode a textual CID back into a [`Digest`], validating the prefix.
pub fn cid_to_digest(cid: &str) -> Result<Digest, CidError> {
    let bytes = cid_to_bytes(cid)?;
    let (prefix, digest_bytes) = bytes.split_at(CID_PREFIX.len());
    if prefix != CID_PREFIX {
        let mut got = [0u8; 4];
        got.copy_from_slice(prefix);
        return Err(CidError::PrefixMismatch {
            expected: CID_PREFIX,
            got,
        });
    }
    let mut arr = [0u8; DIGEST_LEN];
    arr.copy_from_slice(digest_bytes);
    Ok(Digest(arr))
}
