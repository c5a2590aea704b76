use std::io::Read;

use sha2::{Digest, Sha256};

use crate::error::{Result, WalgitError};

pub type Hash = [u8; 32];

pub const NULL_HASH: Hash = [0u8; 32];

/// Streaming buffer size for hashing files that exceed a single read.
const STREAM_BUF_SIZE: usize = 64 * 1024;

#[must_use]
pub fn hash_bytes(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash a reader incrementally over a fixed buffer, for content too large
/// to want fully materialized twice (the tier policy streams chunks this
/// way rather than hashing a second in-memory copy).
pub fn hash_reader(mut r: impl Read) -> Result<Hash> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; STREAM_BUF_SIZE];

    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize().into())
}

/// Incremental hasher for callers that interleave reads with other work
/// (e.g. chunked tiering, which hashes each chunk as well as the whole).
#[derive(Default)]
pub struct Hasher(Sha256);

impl Hasher {
    #[must_use]
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    #[must_use]
    pub fn finalize(self) -> Hash {
        self.0.finalize().into()
    }
}

#[must_use]
pub fn to_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

pub fn from_hex(s: &str) -> Result<Hash> {
    let bytes = hex::decode(s.trim())
        .map_err(|e| WalgitError::Integrity { hash: s.to_string(), reason: e.to_string() })?;
    bytes
        .try_into()
        .map_err(|_| WalgitError::Integrity { hash: s.to_string(), reason: "wrong length".into() })
}
