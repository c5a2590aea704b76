//! Content-addressed object model: blobs (tiered), trees, and commits.
//! Canonical encoding is a magic-tagged, length-prefixed little-endian
//! layout via the `wire` cursors; a blob's hash is always the SHA-256 of
//! its original reconstituted bytes, independent of which storage tier
//! holds it.

use smallvec::SmallVec;

use crate::error::{Result, WalgitError};
use crate::hash::Hash;
use crate::path::RepoPath;
use crate::wire::{Decode, Encode, ReadCursor, WriteCursor};

pub const MODE_FILE: u32 = 0o100644;
pub const MODE_EXEC: u32 = 0o100755;
pub const MODE_DIR: u32 = 0o040000;

const MAGIC: &[u8; 4] = b"WOB1";

const OBJECT_BLOB: u8 = 0;
const OBJECT_TREE: u8 = 1;
const OBJECT_COMMIT: u8 = 2;

const BLOB_INLINE: u8 = 0;
const BLOB_CHUNKED: u8 = 1;
const BLOB_EXTERNAL: u8 = 2;

#[derive(Debug, Clone)]
pub enum Object {
    Blob(Blob),
    Tree(Tree),
    Commit(Commit),
}

impl Object {
    pub fn try_as_blob(&self) -> Result<&Blob> {
        match self {
            Self::Blob(b) => Ok(b),
            _ => Err(WalgitError::Integrity { hash: String::new(), reason: "not a blob".into() }),
        }
    }

    pub fn try_as_tree(&self) -> Result<&Tree> {
        match self {
            Self::Tree(t) => Ok(t),
            _ => Err(WalgitError::Integrity { hash: String::new(), reason: "not a tree".into() }),
        }
    }

    pub fn try_as_commit(&self) -> Result<&Commit> {
        match self {
            Self::Commit(c) => Ok(c),
            _ => Err(WalgitError::Integrity { hash: String::new(), reason: "not a commit".into() }),
        }
    }

    pub fn try_into_tree(self) -> Result<Tree> {
        match self {
            Self::Tree(t) => Ok(t),
            _ => Err(WalgitError::Integrity { hash: String::new(), reason: "not a tree".into() }),
        }
    }

    pub fn try_into_commit(self) -> Result<Commit> {
        match self {
            Self::Commit(c) => Ok(c),
            _ => Err(WalgitError::Integrity { hash: String::new(), reason: "not a commit".into() }),
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        let mut w = WriteCursor::new(&mut buf);
        match self {
            Object::Blob(blob) => {
                w.write_u8(OBJECT_BLOB);
                blob.encode(&mut w);
            }
            Object::Tree(tree) => {
                w.write_u8(OBJECT_TREE);
                tree.encode(&mut w);
            }
            Object::Commit(commit) => {
                w.write_u8(OBJECT_COMMIT);
                commit.encode(&mut w);
            }
        }
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 5 || &data[0..4] != MAGIC {
            return Err(WalgitError::Integrity { hash: String::new(), reason: "invalid object magic".into() });
        }
        let mut r = ReadCursor::new(&data[4..]);
        let tag = r.read_u8()?;
        Ok(match tag {
            OBJECT_BLOB => Object::Blob(Blob::decode(&mut r)?),
            OBJECT_TREE => Object::Tree(Tree::decode(&mut r)?),
            OBJECT_COMMIT => Object::Commit(Commit::decode(&mut r)?),
            _ => return Err(WalgitError::Integrity { hash: String::new(), reason: "unknown object tag".into() }),
        })
    }

    /// Hash of the *encoded object record*, used as the object store key.
    /// Distinct from a blob's content hash (`Blob::content_hash`), which is
    /// always over the raw reconstituted bytes regardless of tier.
    #[must_use]
    pub fn hash(&self) -> Hash {
        crate::hash::hash_bytes(&self.encode())
    }
}

/// A blob's storage tier. The *content hash* (the hash a `Tree` entry
/// points at) is always `SHA-256(original bytes)`; tiering only changes
/// how those bytes are physically stored and retrieved.
#[derive(Debug, Clone)]
pub enum Blob {
    /// Content stored directly in the object record.
    Inline { content_hash: Hash, data: Box<[u8]> },
    /// Content split into fixed-size chunks, each a separately addressable
    /// object; `chunk_hashes` is ordered and complete.
    Chunked { content_hash: Hash, total_len: u64, chunk_hashes: Vec<Hash> },
    /// Content lives with an external remote blob service; `locator` is an
    /// opaque handle that `RemoteBlobService` resolves.
    External { content_hash: Hash, total_len: u64, locator: Box<str> },
}

impl Blob {
    #[must_use]
    pub fn content_hash(&self) -> Hash {
        match self {
            Blob::Inline { content_hash, .. }
            | Blob::Chunked { content_hash, .. }
            | Blob::External { content_hash, .. } => *content_hash,
        }
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Blob::Inline { data, .. } => data.len() as u64,
            Blob::Chunked { total_len, .. } | Blob::External { total_len, .. } => *total_len,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn encode(&self, w: &mut WriteCursor<'_>) {
        match self {
            Blob::Inline { content_hash, data } => {
                w.write_u8(BLOB_INLINE);
                w.write_hash(content_hash);
                w.write_len_prefixed_bytes(data);
            }
            Blob::Chunked { content_hash, total_len, chunk_hashes } => {
                w.write_u8(BLOB_CHUNKED);
                w.write_hash(content_hash);
                w.write_u64(*total_len);
                w.write_u32(chunk_hashes.len() as u32);
                for h in chunk_hashes {
                    w.write_hash(h);
                }
            }
            Blob::External { content_hash, total_len, locator } => {
                w.write_u8(BLOB_EXTERNAL);
                w.write_hash(content_hash);
                w.write_u64(*total_len);
                w.write_len_prefixed_str(locator);
            }
        }
    }

    fn decode(r: &mut ReadCursor<'_>) -> Result<Self> {
        Ok(match r.read_u8()? {
            BLOB_INLINE => {
                let content_hash = r.read_hash()?;
                let data = r.read_len_prefixed_bytes()?.to_vec().into_boxed_slice();
                Blob::Inline { content_hash, data }
            }
            BLOB_CHUNKED => {
                let content_hash = r.read_hash()?;
                let total_len = r.read_u64()?;
                let n = r.read_u32()? as usize;
                let mut chunk_hashes = Vec::with_capacity(n);
                for _ in 0..n {
                    chunk_hashes.push(r.read_hash()?);
                }
                Blob::Chunked { content_hash, total_len, chunk_hashes }
            }
            BLOB_EXTERNAL => {
                let content_hash = r.read_hash()?;
                let total_len = r.read_u64()?;
                let locator = r.read_len_prefixed_str()?.into_owned().into_boxed_str();
                Blob::External { content_hash, total_len, locator }
            }
            _ => return Err(WalgitError::Integrity { hash: String::new(), reason: "unknown blob tier tag".into() }),
        })
    }
}

#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub name: Box<str>,
    pub hash: Hash,
    pub mode: u32,
}

/// Ordered by `name` bytes; construction (`build_tree`) is responsible
/// for keeping that invariant, `Tree::decode` trusts it was kept.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.binary_search_by(|e| e.name.as_ref().cmp(name)).ok().map(|i| &self.entries[i])
    }

    fn encode(&self, w: &mut WriteCursor<'_>) {
        w.write_u32(self.entries.len() as u32);
        for e in &self.entries {
            w.write_u32(e.mode);
            w.write_hash(&e.hash);
            w.write_len_prefixed_str(&e.name);
        }
    }

    fn decode(r: &mut ReadCursor<'_>) -> Result<Self> {
        let n = r.read_u32()? as usize;
        let mut entries = Vec::with_capacity(n);
        for _ in 0..n {
            let mode = r.read_u32()?;
            let hash = r.read_hash()?;
            let name = r.read_len_prefixed_str()?.into_owned().into_boxed_str();
            entries.push(TreeEntry { name, hash, mode });
        }
        Ok(Tree { entries })
    }
}

#[derive(Debug, Clone)]
pub struct Commit {
    pub tree: Hash,
    pub parents: SmallVec<[Hash; 1]>,
    pub timestamp: i64,
    pub author: Box<str>,
    pub message: Box<str>,
}

impl Commit {
    fn encode(&self, w: &mut WriteCursor<'_>) {
        w.write_hash(&self.tree);
        w.write_u32(self.parents.len() as u32);
        for p in &self.parents {
            w.write_hash(p);
        }
        w.write_i64(self.timestamp);
        w.write_len_prefixed_str(&self.author);
        w.write_len_prefixed_str(&self.message);
    }

    fn decode(r: &mut ReadCursor<'_>) -> Result<Self> {
        let tree = r.read_hash()?;
        let n = r.read_u32()? as usize;
        let mut parents = SmallVec::with_capacity(n);
        for _ in 0..n {
            parents.push(r.read_hash()?);
        }
        let timestamp = r.read_i64()?;
        let author = r.read_len_prefixed_str()?.into_owned().into_boxed_str();
        let message = r.read_len_prefixed_str()?.into_owned().into_boxed_str();
        Ok(Commit { tree, parents, timestamp, author, message })
    }
}

/// Non-recursive, stack-based builder turning a sorted list of
/// `(RepoPath, Hash, mode)` leaf entries into a tree of `Tree` objects.
/// Mirrors the teacher's `write_tree.rs` frame-stack walk, but builds from
/// an already-sorted flat path list (the snapshot) instead of walking the
/// filesystem: entries are grouped by shared directory prefix as they're
/// consumed in order, and a frame's `Tree` is finalized and folded into
/// its parent frame as soon as the next entry's prefix diverges.
pub struct TreeBuilder<'a, F: FnMut(Object) -> Hash> {
    write_object: &'a mut F,
}

struct Frame {
    name: Box<str>,
    entries: Vec<TreeEntry>,
}

impl<'a, F: FnMut(Object) -> Hash> TreeBuilder<'a, F> {
    pub fn new(write_object: &'a mut F) -> Self {
        Self { write_object }
    }

    /// `leaves` must be sorted by path (a `Snapshot`'s `BTreeMap` iteration
    /// order already guarantees this). Returns the root tree's hash; an
    /// empty iterator produces the hash of an empty tree.
    pub fn build<'p>(&mut self, leaves: impl Iterator<Item = (&'p RepoPath, Hash, u32)>) -> Hash {
        let mut stack: Vec<Frame> = vec![Frame { name: "".into(), entries: Vec::new() }];
        let mut current_dir: Vec<String> = Vec::new();

        for (path, hash, mode) in leaves {
            let components = path.components();
            let dir_components = &components[..components.len() - 1];
            let leaf_name = components[components.len() - 1];

            self.sync_dir_stack(&mut stack, &mut current_dir, dir_components);

            stack.last_mut().unwrap().entries.push(TreeEntry {
                name: leaf_name.into(),
                hash,
                mode,
            });
        }

        self.sync_dir_stack(&mut stack, &mut current_dir, &[]);
        let root = stack.pop().expect("root frame always present");
        self.build_tree_object(root.entries)
    }

    /// Pop frames that have fallen off the path to `target`, folding each
    /// popped frame's tree hash into its parent as a directory entry, then
    /// push new frames down to `target`.
    fn sync_dir_stack(&mut self, stack: &mut Vec<Frame>, current_dir: &mut Vec<String>, target: &[&str]) {
        let mut common = 0;
        while common < current_dir.len() && common < target.len() && current_dir[common] == target[common] {
            common += 1;
        }

        while current_dir.len() > common {
            current_dir.pop();
            let frame = stack.pop().expect("tree builder stack underflow");
            let hash = self.build_tree_object(frame.entries);
            stack.last_mut()
                .expect("root frame is never popped here")
                .entries
                .push(TreeEntry { name: frame.name, hash, mode: MODE_DIR });
        }

        while current_dir.len() < target.len() {
            let name = target[current_dir.len()].to_string();
            current_dir.push(name.clone());
            stack.push(Frame { name: name.into(), entries: Vec::new() });
        }
    }

    fn build_tree_object(&mut self, mut entries: Vec<TreeEntry>) -> Hash {
        entries.sort_by(|a, b| a.name.as_ref().cmp(b.name.as_ref()));
        (self.write_object)(Object::Tree(Tree { entries }))
    }
}
