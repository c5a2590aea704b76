//! Top-level engine handle tying every component together: init/open, the
//! content-addressed read/write path with dedup and refcounting, ref
//! storage, `commit`/`checkout`, and the separate `sweep` maintenance
//! operation. Grounded on the teacher's `repository.rs` (`Repository` as
//! the single owner of storage + working-copy state), generalized from a
//! CLI-driven single store to a handle generic over its `LocalStore`,
//! `RemoteBlobService`, and `Signer` collaborators so tests can swap in
//! in-memory fakes with no process-global state.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tracing::{info, instrument};

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::error::{Result, WalgitError};
use crate::hash::{self, Hash};
use crate::ignore::Ignore;
use crate::object::{Blob, Commit, Object, Tree, TreeBuilder, MODE_DIR};
use crate::path::RepoPath;
use crate::refcount::RefCounts;
use crate::remote::{RemoteBlobService, Signer};
use crate::retry::CircuitBreaker;
use crate::scanner::{self, ScanOptions};
use crate::snapshot::{FileEntry, Snapshot};
use crate::store::LocalStore;
use crate::tier::{self, TierClass};
use crate::util::{now_unix, Xxh3HashSet};

const DEFAULT_IGNORE: &str = "\
# .walgitignore: default ruleset written on init.
.walgit/
*.pem
*.key
id_rsa*
keystore/
.env
.env.*
node_modules/
target/
vendor/
dist/
build/
*.o
*.class
.DS_Store
Thumbs.db
";

/// Result of a `sweep()` pass: objects removed and the (approximate) bytes
/// those removed objects occupied, for the caller to report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub swept: u64,
    pub bytes_freed: u64,
}

pub struct Repository<S: LocalStore, R: RemoteBlobService, G: Signer> {
    root: PathBuf,
    config: Config,
    store: S,
    remote: R,
    signer: G,
    breaker: CircuitBreaker,
    ignore: Ignore,
}

impl<S: LocalStore, R: RemoteBlobService, G: Signer> Repository<S, R, G> {
    /// Create a fresh repository at `root`: metadata directories, a `HEAD`
    /// pointing at an unborn `main`, a default `.walgitignore`, and a saved
    /// default `Config`.
    pub fn init(root: &Path, store: S, remote: R, signer: G) -> Result<Self> {
        let meta = root.join(".walgit");
        std::fs::create_dir_all(meta.join("refs/heads"))?;
        std::fs::create_dir_all(meta.join("refs/tags"))?;
        std::fs::write(meta.join("HEAD"), b"ref: refs/heads/main\n")?;

        let ignorefile = root.join(".walgitignore");
        if !ignorefile.exists() {
            std::fs::write(&ignorefile, DEFAULT_IGNORE)?;
        }

        let config = Config::default();
        config.save(&meta.join("config"))?;

        let root = root.canonicalize()?;
        let ignore = Ignore::load(&root)?;
        let breaker = CircuitBreaker::new(config.breaker.clone());
        Ok(Self { root, config, store, remote, signer, breaker, ignore })
    }

    /// Open an existing repository, loading its saved `Config` (falling
    /// back to defaults if none was ever saved).
    pub fn open(root: &Path, store: S, remote: R, signer: G) -> Result<Self> {
        let meta = root.join(".walgit");
        if !meta.exists() {
            return Err(WalgitError::NotFound(format!("{}: not a walgit repository", root.display())));
        }

        let root = root.canonicalize()?;
        let config = Config::load_or_default(&root.join(".walgit/config"))?;
        let ignore = Ignore::load(&root)?;
        let breaker = CircuitBreaker::new(config.breaker.clone());
        Ok(Self { root, config, store, remote, signer, breaker, ignore })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn meta_dir(&self) -> PathBuf {
        self.root.join(".walgit")
    }

    fn lock_path(&self) -> PathBuf {
        self.meta_dir().join("LOCK")
    }

    fn snapshot_path(&self) -> PathBuf {
        self.meta_dir().join("snapshot")
    }

    fn refcounts_path(&self) -> PathBuf {
        self.meta_dir().join("refcounts")
    }

    fn ref_path(&self, name: &str) -> PathBuf {
        self.meta_dir().join(name)
    }

    // --- object store, dedup + refcounts -----------------------------

    #[must_use]
    pub fn object_exists(&self, hash: &Hash) -> bool {
        self.store.exists(hash)
    }

    #[instrument(skip(self), level = "debug")]
    pub fn read_object(&self, hash: &Hash) -> Result<Object> {
        let data = self.store.read(hash)?;
        Object::decode(&data)
    }

    /// Write an object's encoded bytes if this hash isn't already present.
    /// Does not touch refcounts — incrementing happens at the point a
    /// *parent* object (tree, commit, ref) records a reference to `hash`,
    /// matching the data model's refcount invariant.
    fn put_object_raw(&self, hash: Hash, encoded: &[u8]) -> Result<()> {
        if !self.store.exists(&hash) {
            self.store.write(hash, encoded)?;
        }
        Ok(())
    }

    // --- refs ----------------------------------------------------------

    pub fn read_ref(&self, name: &str) -> Result<Option<Hash>> {
        let path = self.ref_path(name);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(hash::from_hex(content.trim())?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write_ref(&self, name: &str, hash: &Hash) -> Result<()> {
        let path = self.ref_path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, format!("{}\n", hash::to_hex(hash)))?;
        Ok(())
    }

    pub fn list_refs(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for kind in ["heads", "tags"] {
            let dir = self.meta_dir().join("refs").join(kind);
            if !dir.exists() {
                continue;
            }
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    names.push(format!("refs/{kind}/{name}"));
                }
            }
        }
        Ok(names)
    }

    /// The commit `HEAD` currently resolves to, following a branch ref or
    /// parsing a detached hex hash. `None` for an unborn branch (a fresh
    /// `init` with no commits yet).
    pub fn read_head_commit(&self) -> Result<Option<Hash>> {
        let head = std::fs::read_to_string(self.meta_dir().join("HEAD"))?;
        let head = head.trim();
        if let Some(refname) = head.strip_prefix("ref: ") {
            self.read_ref(refname.trim())
        } else {
            Ok(Some(hash::from_hex(head)?))
        }
    }

    pub fn current_branch(&self) -> Result<Option<String>> {
        let head = std::fs::read_to_string(self.meta_dir().join("HEAD"))?;
        let head = head.trim();
        Ok(head.strip_prefix("ref: refs/heads/").map(str::to_string))
    }

    /// Resolve a branch name or hex commit hash to its commit hash.
    pub fn resolve_to_commit(&self, target: &str) -> Result<Hash> {
        if let Some(hash) = self.read_ref(&format!("refs/heads/{target}"))? {
            return Ok(hash);
        }
        hash::from_hex(target)
    }

    /// Walk the commit graph from `start` via parent links only (no trees
    /// or blobs); best-effort — a corrupt or missing object simply ends
    /// that branch of the walk rather than failing the whole traversal.
    #[must_use]
    pub fn reachable_commits(&self, start: &Hash) -> Xxh3HashSet<Hash> {
        let mut visited = Xxh3HashSet::default();
        let mut stack = vec![*start];
        while let Some(hash) = stack.pop() {
            if !visited.insert(hash) {
                continue;
            }
            if let Ok(obj) = self.read_object(&hash) {
                if let Ok(commit) = obj.try_as_commit() {
                    stack.extend(commit.parents.iter().copied());
                }
            }
        }
        visited
    }

    // --- blob tiering ----------------------------------------------------

    async fn build_blob(&self, data: &[u8], refcounts: &mut RefCounts) -> Result<Blob> {
        if tier::classify(data.len() as u64, &self.config) == TierClass::External {
            let content_hash = hash::hash_bytes(data);
            let auth = self.signer.sign(&content_hash).await?;
            let payload = data.to_vec();
            let locator = self
                .breaker
                .call(|| self.remote.put(content_hash, payload.clone(), &auth))
                .await?;
            return Ok(Blob::External { content_hash, total_len: data.len() as u64, locator });
        }

        let mut write_err = None;
        let blob = tier::build_local_blob(data, &self.config, |obj| {
            let hash = obj.hash();
            if write_err.is_none() {
                if let Err(e) = self.put_object_raw(hash, &obj.encode()) {
                    write_err = Some(e);
                }
            }
            refcounts.incr(hash);
            hash
        });
        if let Some(e) = write_err {
            return Err(e);
        }
        Ok(blob)
    }

    async fn reconstitute_blob(&self, blob: &Blob) -> Result<Vec<u8>> {
        match blob {
            Blob::Inline { data, .. } => Ok(data.to_vec()),
            Blob::Chunked { content_hash, chunk_hashes, .. } => {
                tier::reassemble_chunked(*content_hash, chunk_hashes, |h| self.read_object(h))
            }
            Blob::External { locator, .. } => self.breaker.call(|| self.remote.get(locator)).await,
        }
    }

    // --- commit ------------------------------------------------------

    /// Scan the working copy, materialize blob/tree/commit objects for the
    /// full current tracked set (unchanged files are skipped at the
    /// object-store level by dedup, not re-materialized from scratch), and
    /// advance the current branch. No-op commits (empty diff against the
    /// last snapshot) are permitted and produce a commit with the same
    /// root tree as its parent.
    #[instrument(skip(self, cancel), fields(root = %self.root.display()))]
    pub async fn commit(&self, author: &str, message: &str, cancel: &CancellationToken) -> Result<Hash> {
        let lock = crate::lock::RepoLock::acquire(&self.lock_path(), self.config.lock_stale_secs)?;

        let prior_snapshot = Snapshot::load(&self.snapshot_path())?;
        let report = scanner::scan(&self.root, &self.ignore, prior_snapshot.as_ref(), &ScanOptions::default(), cancel)?;
        let snapshot = report.snapshot;

        if let Some(prior) = &prior_snapshot {
            let diff = snapshot.diff(prior);
            info!(added = diff.added.len(), deleted = diff.deleted.len(), modified = diff.modified.len(), "commit: working tree diff");
        }

        let mut refcounts = RefCounts::load(&self.refcounts_path())?;

        let mut leaves: Vec<(RepoPath, Hash, u32)> = Vec::with_capacity(snapshot.files.len());
        for (path, entry) in &snapshot.files {
            cancel.check()?;
            let abs = self.root.join(path.as_str());
            let data = std::fs::read(&abs)?;
            let blob = self.build_blob(&data, &mut refcounts).await?;
            let blob_obj = Object::Blob(blob);
            let blob_hash = blob_obj.hash();
            self.put_object_raw(blob_hash, &blob_obj.encode())?;
            leaves.push((path.clone(), blob_hash, entry.mode));
        }

        let mut tree_err = None;
        let mut write_tree_object = |obj: Object| -> Hash {
            if let Object::Tree(tree) = &obj {
                for entry in &tree.entries {
                    refcounts.incr(entry.hash);
                }
            }
            let hash = obj.hash();
            if tree_err.is_none() {
                if let Err(e) = self.put_object_raw(hash, &obj.encode()) {
                    tree_err = Some(e);
                }
            }
            hash
        };
        let root_tree = {
            let mut builder = TreeBuilder::new(&mut write_tree_object);
            builder.build(leaves.iter().map(|(p, h, m)| (p, *h, *m)))
        };
        if let Some(e) = tree_err {
            return Err(e);
        }

        let prior_head = self.read_head_commit()?;
        let commit = Commit {
            tree: root_tree,
            parents: prior_head.into_iter().collect(),
            timestamp: now_unix(),
            author: author.into(),
            message: message.into(),
        };
        let commit_obj = Object::Commit(commit);
        let commit_hash = commit_obj.hash();
        self.put_object_raw(commit_hash, &commit_obj.encode())?;
        refcounts.incr(root_tree);

        let branch = self.current_branch()?.unwrap_or_else(|| "main".to_string());
        self.write_ref(&format!("refs/heads/{branch}"), &commit_hash)?;
        refcounts.incr(commit_hash);
        if let Some(prior) = prior_head {
            refcounts.decr(&prior);
        }

        snapshot.save(&self.snapshot_path())?;
        refcounts.save(&self.refcounts_path())?;
        self.store.sync()?;
        lock.release()?;

        info!(commit = %hash::to_hex(&commit_hash), "commit complete");
        Ok(commit_hash)
    }

    // --- checkout ------------------------------------------------------

    /// Materialize `commit_hash`'s tree into the working copy. Unless
    /// `force` is set, refuses with `Conflict` if the working copy has
    /// diverged from the last recorded snapshot (uncommitted changes would
    /// otherwise be silently overwritten).
    #[instrument(skip(self, cancel), fields(root = %self.root.display()))]
    pub async fn checkout(&self, commit_hash: Hash, force: bool, cancel: &CancellationToken) -> Result<()> {
        let lock = crate::lock::RepoLock::acquire(&self.lock_path(), self.config.lock_stale_secs)?;

        let prior_snapshot = Snapshot::load(&self.snapshot_path())?;
        if !force {
            if let Some(prior) = &prior_snapshot {
                let current = scanner::scan(&self.root, &self.ignore, Some(prior), &ScanOptions::default(), cancel)?.snapshot;
                if !current.diff(prior).is_empty() {
                    return Err(WalgitError::Conflict("working tree has uncommitted changes".into()));
                }
            }
        }

        let commit = self.read_object(&commit_hash)?.try_into_commit()?;
        let root_tree = self.read_object(&commit.tree)?.try_into_tree()?;

        let mut files: BTreeMap<RepoPath, FileEntry> = BTreeMap::new();
        self.checkout_tree(root_tree, String::new(), &mut files, cancel).await?;

        if let Some(prior) = &prior_snapshot {
            for path in prior.files.keys() {
                if !files.contains_key(path) {
                    let _ = std::fs::remove_file(self.root.join(path.as_str()));
                }
            }
        }

        let snapshot = Snapshot { timestamp: now_unix(), files };
        snapshot.save(&self.snapshot_path())?;
        lock.release()?;

        info!(commit = %hash::to_hex(&commit_hash), files = snapshot.files.len(), "checkout complete");
        Ok(())
    }

    fn checkout_tree<'a>(
        &'a self,
        tree: Tree,
        prefix: String,
        files: &'a mut BTreeMap<RepoPath, FileEntry>,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            for entry in tree.entries {
                cancel.check()?;
                let rel = if prefix.is_empty() { entry.name.to_string() } else { format!("{prefix}/{}", entry.name) };

                if entry.mode == MODE_DIR {
                    let subtree = self.read_object(&entry.hash)?.try_into_tree()?;
                    self.checkout_tree(subtree, rel, files, cancel).await?;
                    continue;
                }

                let blob = self.read_object(&entry.hash)?.try_as_blob()?.clone();
                let data = self.reconstitute_blob(&blob).await?;
                let actual = hash::hash_bytes(&data);
                if actual != blob.content_hash() {
                    return Err(WalgitError::integrity(hash::to_hex(&blob.content_hash()), "blob content hash mismatch on checkout"));
                }

                let abs = self.root.join(&rel);
                if let Some(parent) = abs.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&abs, &data)?;
                set_mode(&abs, entry.mode)?;

                let repo_path = RepoPath::normalize(&rel)?;
                files.insert(repo_path, FileEntry { hash: actual, size: data.len() as u64, mode: entry.mode, mtime: Some(now_unix()) });
            }
            Ok(())
        })
    }

    // --- maintenance -----------------------------------------------------

    /// Remove objects with no live refcount that are also unreachable from
    /// any ref's commit graph. The reachability walk is the authoritative
    /// safety net (`spec.md` §8 property 8): a zero refcount alone is only
    /// ever a *candidate*, never sufficient on its own, since `commit`
    /// decrements a superseded `HEAD` commit's refcount even though it
    /// stays reachable through the new commit's parent link. Never run
    /// implicitly by `commit`/`checkout`.
    #[instrument(skip(self))]
    pub fn sweep(&self) -> Result<SweepReport> {
        let _lock = crate::lock::RepoLock::acquire(&self.lock_path(), self.config.lock_stale_secs)?;
        let mut refcounts = RefCounts::load(&self.refcounts_path())?;

        let mut live = Xxh3HashSet::default();
        for name in self.list_refs()? {
            if let Some(hash) = self.read_ref(&name)? {
                self.collect_reachable(&hash, &mut live)?;
            }
        }
        if let Some(head) = self.read_head_commit()? {
            self.collect_reachable(&head, &mut live)?;
        }

        let candidates: Vec<Hash> = refcounts.known_hashes().copied().collect();
        let mut report = SweepReport::default();
        for hash in refcounts.unreferenced(candidates.iter()) {
            if live.contains(&hash) {
                continue;
            }
            if let Ok(data) = self.store.read(&hash) {
                report.bytes_freed += data.len() as u64;
            }
            self.store.forget(&hash)?;
            report.swept += 1;
        }

        refcounts.save(&self.refcounts_path())?;
        info!(swept = report.swept, bytes_freed = report.bytes_freed, "sweep complete");
        Ok(report)
    }

    fn collect_reachable(&self, start: &Hash, visited: &mut Xxh3HashSet<Hash>) -> Result<()> {
        let mut stack = vec![*start];
        while let Some(hash) = stack.pop() {
            if !visited.insert(hash) {
                continue;
            }
            let commit = match self.read_object(&hash) {
                Ok(obj) => obj.try_into_commit()?,
                Err(e) if e.kind() == crate::error::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            self.collect_tree(&commit.tree, visited)?;
            stack.extend(commit.parents.iter().copied());
        }
        Ok(())
    }

    fn collect_tree(&self, start: &Hash, visited: &mut Xxh3HashSet<Hash>) -> Result<()> {
        let mut stack = vec![*start];
        while let Some(hash) = stack.pop() {
            if !visited.insert(hash) {
                continue;
            }
            let tree = match self.read_object(&hash) {
                Ok(obj) => obj.try_into_tree()?,
                Err(e) if e.kind() == crate::error::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            for entry in tree.entries {
                if entry.mode == MODE_DIR {
                    stack.push(entry.hash);
                    continue;
                }
                visited.insert(entry.hash);
                if let Ok(Object::Blob(Blob::Chunked { chunk_hashes, .. })) = self.read_object(&entry.hash) {
                    visited.extend(chunk_hashes);
                }
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perm = std::fs::metadata(path)?.permissions();
    perm.set_mode(mode);
    std::fs::set_permissions(path, perm)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
