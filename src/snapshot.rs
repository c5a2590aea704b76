//! Snapshot-based "always staged" working copy model. A `Snapshot` is a
//! timestamped map from repo-relative path to file metadata; commits are
//! produced directly from the current snapshot rather than from a
//! separate staging area, and diffing two snapshots is how the engine
//! answers "what changed".

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;

use crate::error::Result;
use crate::hash::Hash;
use crate::path::RepoPath;
use crate::wire::{ReadCursor, WriteCursor};

const MAGIC: &[u8; 4] = b"WSN1";

#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub hash: Hash,
    pub size: u64,
    pub mode: u32,
    pub mtime: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub timestamp: i64,
    pub files: BTreeMap<RepoPath, FileEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub added: Vec<RepoPath>,
    pub deleted: Vec<RepoPath>,
    pub modified: Vec<RepoPath>,
}

impl SnapshotDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.modified.is_empty()
    }
}

impl Snapshot {
    #[must_use]
    pub fn new(timestamp: i64) -> Self {
        Self { timestamp, files: BTreeMap::new() }
    }

    /// Diff against `prior`. A file present in both with the same content
    /// hash but a different mode-unrelated-bit (mtime, size after a
    /// touch-without-edit) is NOT modified; only a changed content hash or
    /// a changed executable bit counts (mode-only changes beyond the
    /// exec bit are not tracked at all, see `object::MODE_EXEC`).
    #[must_use]
    pub fn diff(&self, prior: &Snapshot) -> SnapshotDiff {
        let mut diff = SnapshotDiff::default();

        for (path, entry) in &self.files {
            match prior.files.get(path) {
                None => diff.added.push(path.clone()),
                Some(prior_entry) => {
                    if entry.hash != prior_entry.hash || Self::exec_bit(entry.mode) != Self::exec_bit(prior_entry.mode) {
                        diff.modified.push(path.clone());
                    }
                }
            }
        }

        for path in prior.files.keys() {
            if !self.files.contains_key(path) {
                diff.deleted.push(path.clone());
            }
        }

        diff
    }

    fn exec_bit(mode: u32) -> bool {
        mode & 0o100 != 0
    }

    /// Atomic write: encode to a temp file in the same directory, fsync,
    /// then rename over the destination. A reader that opens mid-write
    /// never observes a partial file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        let mut w = WriteCursor::new(&mut buf);
        w.write_i64(self.timestamp);
        w.write_u32(self.files.len() as u32);
        for (path, entry) in &self.files {
            w.write_len_prefixed_str(path.as_str());
            w.write_hash(&entry.hash);
            w.write_u64(entry.size);
            w.write_u32(entry.mode);
            w.write_i64(entry.mtime.unwrap_or(-1));
        }

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(&buf)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Load a previously saved snapshot. A missing or corrupt file is not
    /// an error: callers treat `Ok(None)` as "no prior snapshot" (the
    /// first commit in a fresh repo has nothing to diff against).
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let data = match std::fs::read(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Self::decode(&data).ok())
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 4 || &data[0..4] != MAGIC {
            return Err(crate::error::WalgitError::integrity("snapshot", "bad magic"));
        }
        let mut r = ReadCursor::new(&data[4..]);
        let timestamp = r.read_i64()?;
        let count = r.read_u32()? as usize;
        let mut files = BTreeMap::new();
        for _ in 0..count {
            let name = r.read_len_prefixed_str()?.into_owned();
            let path = RepoPath::from_validated(name);
            let hash = r.read_hash()?;
            let size = r.read_u64()?;
            let mode = r.read_u32()?;
            let mtime = r.read_i64()?;
            files.insert(path, FileEntry { hash, size, mode, mtime: if mtime < 0 { None } else { Some(mtime) } });
        }
        Ok(Snapshot { timestamp, files })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(h: u8) -> FileEntry {
        FileEntry { hash: [h; 32], size: 10, mode: crate::object::MODE_FILE, mtime: Some(1) }
    }

    #[test]
    fn diff_detects_add_delete_modify() {
        let mut prior = Snapshot::new(0);
        prior.files.insert(RepoPath::normalize("a.txt").unwrap(), entry(1));
        prior.files.insert(RepoPath::normalize("b.txt").unwrap(), entry(2));

        let mut current = Snapshot::new(1);
        current.files.insert(RepoPath::normalize("a.txt").unwrap(), entry(1));
        current.files.insert(RepoPath::normalize("b.txt").unwrap(), entry(3));
        current.files.insert(RepoPath::normalize("c.txt").unwrap(), entry(4));

        let diff = current.diff(&prior);
        assert_eq!(diff.added, vec![RepoPath::normalize("c.txt").unwrap()]);
        assert_eq!(diff.modified, vec![RepoPath::normalize("b.txt").unwrap()]);
        assert!(diff.deleted.is_empty());
    }

    #[test]
    fn mode_only_change_beyond_exec_bit_is_not_modified() {
        let mut prior = Snapshot::new(0);
        let mut e = entry(1);
        e.mode = 0o100644;
        prior.files.insert(RepoPath::normalize("a.txt").unwrap(), e.clone());

        let mut current = Snapshot::new(1);
        e.mtime = Some(999); // mtime-only churn, same hash and exec bit
        current.files.insert(RepoPath::normalize("a.txt").unwrap(), e);

        assert!(current.diff(&prior).is_empty());
    }

    #[test]
    fn exec_bit_change_is_modified() {
        let mut prior = Snapshot::new(0);
        prior.files.insert(RepoPath::normalize("a.sh").unwrap(), entry(1));

        let mut current = Snapshot::new(1);
        let mut e = entry(1);
        e.mode = crate::object::MODE_EXEC;
        current.files.insert(RepoPath::normalize("a.sh").unwrap(), e);

        assert_eq!(current.diff(&prior).modified.len(), 1);
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot");

        let mut snap = Snapshot::new(42);
        snap.files.insert(RepoPath::normalize("x/y.txt").unwrap(), entry(9));
        snap.save(&path).unwrap();

        let loaded = Snapshot::load(&path).unwrap().unwrap();
        assert_eq!(loaded.timestamp, 42);
        assert_eq!(loaded.files.len(), 1);
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Snapshot::load(&dir.path().join("nope")).unwrap().is_none());
    }

    #[test]
    fn corrupt_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot");
        std::fs::write(&path, b"not a snapshot").unwrap();
        assert!(Snapshot::load(&path).unwrap().is_none());
    }
}
