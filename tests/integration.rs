use std::sync::Arc;

use walgit::cancel::CancellationToken;
use walgit::config::Config;
use walgit::object::{Blob, Object};
use walgit::remote::{FixedSigner, InMemoryRemoteBlobService};
use walgit::repository::Repository;
use walgit::store::{LocalStore, MemoryStore};

type TestRepo = Repository<Arc<MemoryStore>, InMemoryRemoteBlobService, FixedSigner>;

fn open(dir: &std::path::Path) -> (TestRepo, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::default());
    let repo = Repository::init(dir, store.clone(), InMemoryRemoteBlobService::new(), FixedSigner).unwrap();
    (repo, store)
}

fn open_with_config(dir: &std::path::Path, config: Config) -> (TestRepo, Arc<MemoryStore>) {
    let (_repo, store) = open(dir);
    config.save(&dir.join(".walgit/config")).unwrap();
    let repo = Repository::open(dir, store.clone(), InMemoryRemoteBlobService::new(), FixedSigner).unwrap();
    (repo, store)
}

// S1: Init + commit; root has exactly two entries (a.txt, b), `b` has one
// entry (c.txt). Re-committing with no changes is permitted (see
// DESIGN.md's Open Question resolution) and shares its parent's root tree.
#[tokio::test]
async fn s1_init_commit_structure_and_noop_recommit() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();
    std::fs::create_dir(dir.path().join("b")).unwrap();
    std::fs::write(dir.path().join("b/c.txt"), b"yo").unwrap();

    let (repo, _store) = open(dir.path());
    let cancel = CancellationToken::new();
    let first = repo.commit("tester", "init", &cancel).await.unwrap();

    assert_eq!(repo.read_head_commit().unwrap(), Some(first));

    let commit = repo.read_object(&first).unwrap().try_into_commit().unwrap();
    let root = repo.read_object(&commit.tree).unwrap().try_into_tree().unwrap();
    assert_eq!(root.entries.len(), 2);

    let b_entry = root.find("b").unwrap();
    let subtree = repo.read_object(&b_entry.hash).unwrap().try_into_tree().unwrap();
    assert_eq!(subtree.entries.len(), 1);
    assert_eq!(subtree.entries[0].name.as_ref(), "c.txt");

    let second = repo.commit("tester", "no changes", &cancel).await.unwrap();
    let second_commit = repo.read_object(&second).unwrap().try_into_commit().unwrap();
    assert_eq!(second_commit.tree, commit.tree);
    assert_eq!(second_commit.parents.as_slice(), &[first]);
}

// S2: `.walgitignore` negation and directory-prefix rules narrow the
// tracked set to exactly the expected files.
#[tokio::test]
async fn s2_ignore_rules_narrow_tracked_set() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".walgitignore"), "*.log\n!keep.log\nbuild/\n").unwrap();
    std::fs::write(dir.path().join("a.log"), b"noise").unwrap();
    std::fs::write(dir.path().join("keep.log"), b"keep me").unwrap();
    std::fs::create_dir(dir.path().join("build")).unwrap();
    std::fs::write(dir.path().join("build/x"), b"artifact").unwrap();

    let (repo, _store) = open(dir.path());
    let cancel = CancellationToken::new();
    let commit_hash = repo.commit("tester", "s2", &cancel).await.unwrap();
    let commit = repo.read_object(&commit_hash).unwrap().try_into_commit().unwrap();
    let root = repo.read_object(&commit.tree).unwrap().try_into_tree().unwrap();

    let names: Vec<&str> = root.entries.iter().map(|e| e.name.as_ref()).collect();
    assert!(names.contains(&".walgitignore"));
    assert!(names.contains(&"keep.log"));
    assert!(!names.contains(&"a.log"));
    assert!(!names.contains(&"build"));
}

// S3: Diff after modify/add/delete against the committed snapshot.
#[tokio::test]
async fn s3_diff_reports_modified_added_deleted() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();
    std::fs::create_dir(dir.path().join("b")).unwrap();
    std::fs::write(dir.path().join("b/c.txt"), b"yo").unwrap();

    let (repo, _store) = open(dir.path());
    let cancel = CancellationToken::new();
    repo.commit("tester", "init", &cancel).await.unwrap();

    let prior = walgit::snapshot::Snapshot::load(&dir.path().join(".walgit/snapshot")).unwrap().unwrap();

    std::fs::write(dir.path().join("a.txt"), b"HI").unwrap();
    std::fs::write(dir.path().join("d.txt"), b"new").unwrap();
    std::fs::remove_file(dir.path().join("b/c.txt")).unwrap();

    let ignore = walgit::ignore::Ignore::load(dir.path()).unwrap();
    let report =
        walgit::scanner::scan(dir.path(), &ignore, Some(&prior), &walgit::scanner::ScanOptions::default(), &cancel).unwrap();
    let diff = report.snapshot.diff(&prior);

    let as_strs = |v: &[walgit::path::RepoPath]| v.iter().map(|p| p.as_str().to_string()).collect::<Vec<_>>();
    assert_eq!(as_strs(&diff.modified), vec!["a.txt".to_string()]);
    assert_eq!(as_strs(&diff.added), vec!["d.txt".to_string()]);
    assert_eq!(as_strs(&diff.deleted), vec!["b/c.txt".to_string()]);
}

// S4: Chunked tier roundtrip through a full commit/checkout cycle — 100
// bytes at chunk_size=8 is 12 full chunks plus one 4-byte partial.
#[tokio::test]
async fn s4_chunked_roundtrip_preserves_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config { inline_max: 16, external_min: 1024, chunk_size: 8, ..Config::default() };
    let (repo, _store) = open_with_config(dir.path(), config);

    let data: Vec<u8> = (0..100u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(dir.path().join("payload.bin"), &data).unwrap();

    let cancel = CancellationToken::new();
    let commit_hash = repo.commit("tester", "chunked", &cancel).await.unwrap();
    let commit = repo.read_object(&commit_hash).unwrap().try_into_commit().unwrap();
    let root = repo.read_object(&commit.tree).unwrap().try_into_tree().unwrap();
    let entry = root.find("payload.bin").unwrap();

    let obj = repo.read_object(&entry.hash).unwrap();
    let blob = obj.try_as_blob().unwrap();
    let Blob::Chunked { chunk_hashes, .. } = blob else { panic!("expected chunked tier") };
    assert_eq!(chunk_hashes.len(), 13);
    assert_eq!(blob.content_hash(), walgit::hash::hash_bytes(&data));

    std::fs::remove_file(dir.path().join("payload.bin")).unwrap();
    repo.checkout(commit_hash, true, &cancel).await.unwrap();
    assert_eq!(std::fs::read(dir.path().join("payload.bin")).unwrap(), data);
}

// S5: Dedup across two distinct paths with identical content — one blob
// record, refcount 2.
#[tokio::test]
async fn s5_dedup_single_blob_refcount_two() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("x.txt"), b"identical bytes").unwrap();
    std::fs::write(dir.path().join("y.txt"), b"identical bytes").unwrap();

    let (repo, _store) = open(dir.path());
    let cancel = CancellationToken::new();
    let commit_hash = repo.commit("tester", "dedup", &cancel).await.unwrap();
    let commit = repo.read_object(&commit_hash).unwrap().try_into_commit().unwrap();
    let root = repo.read_object(&commit.tree).unwrap().try_into_tree().unwrap();

    let x = root.find("x.txt").unwrap();
    let y = root.find("y.txt").unwrap();
    assert_eq!(x.hash, y.hash, "identical content must hash to one blob record");

    let refcounts = walgit::refcount::RefCounts::load(&dir.path().join(".walgit/refcounts")).unwrap();
    assert_eq!(refcounts.get(&x.hash), 2);
}

// S6: A corrupted chunk in the local store must fail checkout with an
// `Integrity` error rather than silently returning bad bytes, and must
// leave HEAD untouched.
#[tokio::test]
async fn s6_corrupt_chunk_fails_checkout_with_integrity_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config { inline_max: 4, external_min: 1024, chunk_size: 4, ..Config::default() };
    let (repo, store) = open_with_config(dir.path(), config);

    std::fs::write(dir.path().join("data.bin"), b"0123456789abcdef").unwrap();
    let cancel = CancellationToken::new();
    let commit_hash = repo.commit("tester", "s6", &cancel).await.unwrap();
    let head_before = repo.read_head_commit().unwrap();

    let commit = repo.read_object(&commit_hash).unwrap().try_into_commit().unwrap();
    let root = repo.read_object(&commit.tree).unwrap().try_into_tree().unwrap();
    let entry = root.find("data.bin").unwrap();
    let obj = repo.read_object(&entry.hash).unwrap();
    let Blob::Chunked { chunk_hashes, .. } = obj.try_as_blob().unwrap() else { panic!("expected chunked tier") };
    let first_chunk = chunk_hashes[0];

    let chunk_obj = repo.read_object(&first_chunk).unwrap();
    let Object::Blob(Blob::Inline { content_hash, data }) = chunk_obj else {
        panic!("a chunk is itself stored as an inline blob")
    };
    let mut flipped = data.to_vec();
    flipped[0] ^= 0xFF;
    let corrupted = Object::Blob(Blob::Inline { content_hash, data: flipped.into_boxed_slice() });

    store.forget(&first_chunk).unwrap();
    store.write(first_chunk, &corrupted.encode()).unwrap();

    std::fs::remove_file(dir.path().join("data.bin")).unwrap();
    let err = repo.checkout(commit_hash, true, &cancel).await.unwrap_err();
    assert_eq!(err.kind(), walgit::error::ErrorKind::Integrity);
    assert_eq!(repo.read_head_commit().unwrap(), head_before);
}
