//! Reference counting for stored objects. Incremented whenever a write
//! path introduces a new reference to a hash (a tree entry, a commit's
//! tree/parents, a chunked blob's chunk list); decremented and reaped by
//! the separate `sweep()` maintenance operation. The teacher never
//! collects objects at all — this table exists purely to support that
//! maintenance operation, which the spec keeps explicitly apart from
//! `commit`/`checkout`.

use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;
use crate::hash::Hash;
use crate::util::Xxh3HashSet;
use crate::wire::{ReadCursor, WriteCursor};

const MAGIC: &[u8; 4] = b"WRC1";

/// `counts` holds live reference counts; an entry is removed the instant it
/// decrements to zero, since a zero count and "not present" mean the same
/// thing for `get`/`unreferenced`. `known` is a separate, append-only record
/// of every hash ever referenced, so `sweep()` still has something to check
/// *after* a count has been decremented away — without it there would be no
/// way to rediscover a hash that became unreferenced.
#[derive(Debug, Clone, Default)]
pub struct RefCounts {
    counts: HashMap<Hash, u64>,
    known: Xxh3HashSet<Hash>,
}

impl RefCounts {
    pub fn incr(&mut self, hash: Hash) {
        *self.counts.entry(hash).or_insert(0) += 1;
        self.known.insert(hash);
    }

    pub fn decr(&mut self, hash: &Hash) {
        if let Some(c) = self.counts.get_mut(hash) {
            *c = c.saturating_sub(1);
            if *c == 0 {
                self.counts.remove(hash);
            }
        }
    }

    #[must_use]
    pub fn get(&self, hash: &Hash) -> u64 {
        self.counts.get(hash).copied().unwrap_or(0)
    }

    /// Every hash ever `incr`'d, whether or not its count has since dropped
    /// to zero — the candidate set `sweep()` checks for reclaim.
    pub fn known_hashes(&self) -> impl Iterator<Item = &Hash> {
        self.known.iter()
    }

    /// Hashes with a zero (or absent) refcount — candidates for reclaiming
    /// in `sweep()`.
    #[must_use]
    pub fn unreferenced<'a>(&'a self, candidates: impl Iterator<Item = &'a Hash>) -> Vec<Hash> {
        candidates.filter(|h| self.get(h) == 0).copied().collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        let mut w = WriteCursor::new(&mut buf);
        w.write_u32(self.counts.len() as u32);
        for (hash, count) in &self.counts {
            w.write_hash(hash);
            w.write_u64(*count);
        }
        w.write_u32(self.known.len() as u32);
        for hash in &self.known {
            w.write_hash(hash);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, buf)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = match std::fs::read(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };

        if data.len() < 4 || &data[0..4] != MAGIC {
            return Ok(Self::default());
        }

        let mut r = ReadCursor::new(&data[4..]);
        let n = r.read_u32()? as usize;
        let mut counts = HashMap::with_capacity(n);
        for _ in 0..n {
            let hash = r.read_hash()?;
            let count = r.read_u64()?;
            counts.insert(hash, count);
        }

        let mut known = Xxh3HashSet::default();
        // Older files (written before `known` existed) simply end here.
        if let Ok(kn) = r.read_u32() {
            for _ in 0..kn {
                known.insert(r.read_hash()?);
            }
        }
        for hash in counts.keys() {
            known.insert(*hash);
        }

        Ok(Self { counts, known })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incr_decr_roundtrip() {
        let mut rc = RefCounts::default();
        let h = [1u8; 32];
        rc.incr(h);
        rc.incr(h);
        assert_eq!(rc.get(&h), 2);
        rc.decr(&h);
        assert_eq!(rc.get(&h), 1);
        rc.decr(&h);
        assert_eq!(rc.get(&h), 0);
    }

    #[test]
    fn unreferenced_filters_zero_count() {
        let mut rc = RefCounts::default();
        let referenced = [1u8; 32];
        let unreferenced = [2u8; 32];
        rc.incr(referenced);

        let candidates = [referenced, unreferenced];
        let result = rc.unreferenced(candidates.iter());
        assert_eq!(result, vec![unreferenced]);
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refcounts");
        let mut rc = RefCounts::default();
        rc.incr([3u8; 32]);
        rc.incr([3u8; 32]);
        rc.save(&path).unwrap();

        let loaded = RefCounts::load(&path).unwrap();
        assert_eq!(loaded.get(&[3u8; 32]), 2);
    }

    #[test]
    fn missing_file_loads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let rc = RefCounts::load(&dir.path().join("nope")).unwrap();
        assert_eq!(rc.get(&[9u8; 32]), 0);
    }

    #[test]
    fn known_hashes_survive_decrement_to_zero() {
        let mut rc = RefCounts::default();
        let h = [5u8; 32];
        rc.incr(h);
        rc.decr(&h);
        assert_eq!(rc.get(&h), 0);
        assert!(rc.known_hashes().any(|k| *k == h));

        let swept = rc.unreferenced(rc.known_hashes());
        assert_eq!(swept, vec![h]);
    }
}
