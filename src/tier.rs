//! Blob tier policy: decides whether content is stored inline inside its
//! object record, split into content-addressed chunks, or handed off to
//! an external remote blob service — and builds the resulting `Blob`
//! value. The content hash is always computed over the whole, original
//! byte stream first; tiering never changes what a blob hashes to.

use crate::config::Config;
use crate::error::Result;
use crate::hash::{self, Hash};
use crate::object::{Blob, Object};

/// Decides which tier `len` bytes belong in, given the configured
/// thresholds. `inline_max` and `external_min` need not meet in the
/// middle — bytes strictly between them still go through `Chunked`
/// (content-defined local storage without handing the object to a
/// remote service at all).
#[must_use]
pub fn classify(len: u64, config: &Config) -> TierClass {
    if len <= config.inline_max {
        TierClass::Inline
    } else if len >= config.external_min {
        TierClass::External
    } else {
        TierClass::Chunked
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierClass {
    Inline,
    Chunked,
    External,
}

/// Build the `Inline`/`Chunked` variant for locally-held content. A
/// caller that classifies to `External` does not call this — it instead
/// asks the gateway to `put` the bytes with the remote blob service and
/// builds `Blob::External` from the locator that returns.
///
/// `write_chunk` persists one chunk's encoded object and is only invoked
/// for the `Chunked` tier.
pub fn build_local_blob(
    data: &[u8],
    config: &Config,
    mut write_chunk: impl FnMut(Object) -> Hash,
) -> Blob {
    let content_hash = hash::hash_bytes(data);

    match classify(data.len() as u64, config) {
        TierClass::Inline | TierClass::External => Blob::Inline {
            content_hash,
            data: data.to_vec().into_boxed_slice(),
        },
        TierClass::Chunked => {
            let chunk_size = config.chunk_size.max(1) as usize;
            let chunk_hashes = data
                .chunks(chunk_size)
                .map(|chunk| {
                    let chunk_blob = Blob::Inline {
                        content_hash: hash::hash_bytes(chunk),
                        data: chunk.to_vec().into_boxed_slice(),
                    };
                    write_chunk(Object::Blob(chunk_blob))
                })
                .collect();

            Blob::Chunked { content_hash, total_len: data.len() as u64, chunk_hashes }
        }
    }
}

/// Reassemble a `Chunked` blob's original bytes given a way to fetch each
/// chunk object by hash. Verifies the reassembled content against
/// `content_hash` so a corrupted or truncated chunk store is caught here
/// rather than silently returning bad bytes.
pub fn reassemble_chunked(
    content_hash: Hash,
    chunk_hashes: &[Hash],
    mut read_chunk: impl FnMut(&Hash) -> Result<Object>,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for h in chunk_hashes {
        let obj = read_chunk(h)?;
        let blob = obj.try_as_blob()?;
        match blob {
            Blob::Inline { data, .. } => out.extend_from_slice(data),
            other => {
                return Err(crate::error::WalgitError::integrity(
                    hash::to_hex(h),
                    format!("chunk stored in unexpected tier: {other:?}"),
                ))
            }
        }
    }

    let actual = hash::hash_bytes(&out);
    if actual != content_hash {
        return Err(crate::error::WalgitError::integrity(
            hash::to_hex(&content_hash),
            "reassembled chunked blob hash mismatch",
        ));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_thresholds() {
        let cfg = Config { inline_max: 10, external_min: 100, ..Config::default() };
        assert_eq!(classify(5, &cfg), TierClass::Inline);
        assert_eq!(classify(50, &cfg), TierClass::Chunked);
        assert_eq!(classify(200, &cfg), TierClass::External);
    }

    #[test]
    fn content_hash_independent_of_tier() {
        let data = vec![42u8; 30];
        let cfg_inline = Config { inline_max: 1000, ..Config::default() };
        let cfg_chunked = Config { inline_max: 0, external_min: 1_000_000, chunk_size: 8, ..Config::default() };

        let inline = build_local_blob(&data, &cfg_inline, |_| [0u8; 32]);
        let chunked = build_local_blob(&data, &cfg_chunked, |_| [0u8; 32]);

        assert_eq!(inline.content_hash(), chunked.content_hash());
    }

    #[test]
    fn chunked_roundtrip_reassembles() {
        let data: Vec<u8> = (0..40u8).collect();
        let cfg = Config { inline_max: 0, external_min: 1_000_000, chunk_size: 8, ..Config::default() };

        let mut store: std::collections::HashMap<Hash, Object> = std::collections::HashMap::new();
        let blob = build_local_blob(&data, &cfg, |obj| {
            let h = obj.hash();
            store.insert(h, obj);
            h
        });

        let Blob::Chunked { content_hash, chunk_hashes, .. } = &blob else { panic!("expected chunked") };
        let out = reassemble_chunked(*content_hash, chunk_hashes, |h| {
            store.get(h).cloned().ok_or_else(|| crate::error::WalgitError::not_found(hash::to_hex(h)))
        }).unwrap();

        assert_eq!(out, data);
    }
}
