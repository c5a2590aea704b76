//! Local content-addressed object store. `LocalStore` is the trait the
//! rest of the engine depends on; `MmapStore` is the production
//! implementation (an open-addressed hash table over a memory-mapped
//! file, directly descended from the teacher's `storage.rs`). An
//! in-memory `MemoryStore` fake backs unit tests that don't need real
//! file I/O.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::{Arc, Mutex};

use memmap2::{MmapMut, MmapOptions};
use tracing::instrument;

use crate::error::{Result, WalgitError};
use crate::hash::Hash;

/// Abstraction over "put encoded object bytes under a hash / get them
/// back / check existence", so the engine's commit/checkout/tier logic
/// never has to know whether objects live behind an mmap table, an
/// in-memory map, or something else a test substitutes.
pub trait LocalStore: Send + Sync {
    fn exists(&self, hash: &Hash) -> bool;
    fn read(&self, hash: &Hash) -> Result<Vec<u8>>;
    /// Write encoded bytes under `hash`. A no-op if the hash already
    /// exists (objects are immutable once written).
    fn write(&self, hash: Hash, data: &[u8]) -> Result<()>;
    fn write_batch(&self, writes: &[(Hash, Vec<u8>)]) -> Result<()> {
        for (hash, data) in writes {
            self.write(*hash, data)?;
        }
        Ok(())
    }
    fn sync(&self) -> Result<()>;

    /// Drop a hash from the store's index, used by `sweep()` to reclaim
    /// objects with a zero refcount. Not required to reclaim underlying
    /// disk space immediately — see `MmapStore::forget`.
    fn forget(&self, hash: &Hash) -> Result<()>;
}

/// Lets a caller keep its own handle to a store passed into a `Repository`
/// by value — tests use this to reach in and corrupt an object directly,
/// simulating on-disk bitrot a real deployment would hit via the mmap file.
impl<T: LocalStore + ?Sized> LocalStore for Arc<T> {
    fn exists(&self, hash: &Hash) -> bool {
        (**self).exists(hash)
    }

    fn read(&self, hash: &Hash) -> Result<Vec<u8>> {
        (**self).read(hash)
    }

    fn write(&self, hash: Hash, data: &[u8]) -> Result<()> {
        (**self).write(hash, data)
    }

    fn write_batch(&self, writes: &[(Hash, Vec<u8>)]) -> Result<()> {
        (**self).write_batch(writes)
    }

    fn sync(&self) -> Result<()> {
        (**self).sync()
    }

    fn forget(&self, hash: &Hash) -> Result<()> {
        (**self).forget(hash)
    }
}

const MAGIC: &[u8; 4] = b"WOS1";
const VERSION: u32 = 1;

const HEADER_SIZE: usize = 128;
const HASH_TABLE_BUCKETS: usize = 1 << 18; // 256K buckets, 2MB table
const HASH_TABLE_SIZE: usize = HASH_TABLE_BUCKETS * 8;
const DATA_START: u64 = (HEADER_SIZE + HASH_TABLE_SIZE) as u64;
const ENTRY_HEADER_SIZE: usize = 36; // hash(32) + len(4)

struct MmapInner {
    file: File,
    mmap: MmapMut,
    file_len: u64,
}

/// mmap-backed on-disk object table: an open-addressed hash index over a
/// flat append-only data region, matching the teacher's `Storage`
/// almost field-for-field. Wrapped in a `Mutex` so it can implement the
/// `Send + Sync` `LocalStore` trait; the original CLI only ever had one
/// thread touching storage at a time, but the gateway now shares one
/// store across the rayon scan pool.
pub struct MmapStore {
    inner: Mutex<MmapInner>,
}

impl MmapStore {
    pub fn open(objects_path: &Path) -> Result<Self> {
        let inner = if objects_path.exists() {
            Self::open_existing(objects_path)?
        } else {
            Self::create_new(objects_path)?
        };
        Ok(Self { inner: Mutex::new(inner) })
    }

    fn create_new(path: &Path) -> Result<MmapInner> {
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(path)?;
        let initial_size = HEADER_SIZE + HASH_TABLE_SIZE;
        file.set_len(initial_size as u64)?;

        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        #[cfg(unix)]
        unsafe {
            libc::madvise(
                mmap.as_ptr() as *mut libc::c_void,
                mmap.len(),
                libc::MADV_SEQUENTIAL | libc::MADV_WILLNEED,
            );
        }

        mmap[0..4].copy_from_slice(MAGIC);
        mmap[4..8].copy_from_slice(&VERSION.to_le_bytes());
        mmap[8..16].copy_from_slice(&0u64.to_le_bytes()); // count
        mmap[16..24].copy_from_slice(&DATA_START.to_le_bytes());
        mmap.flush()?;

        Ok(MmapInner { file, mmap, file_len: initial_size as u64 })
    }

    fn open_existing(path: &Path) -> Result<MmapInner> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        if mmap.len() < HEADER_SIZE || &mmap[0..4] != MAGIC {
            return Err(WalgitError::integrity("object-store", "corrupt or foreign object database"));
        }

        let file_len = file.metadata()?.len();
        let ht_end = HEADER_SIZE + HASH_TABLE_SIZE;

        // Keep the hash table hot; let the kernel evict the (likely huge)
        // append-only data region until a read actually touches it.
        #[cfg(unix)]
        unsafe {
            libc::madvise(mmap.as_ptr() as *mut libc::c_void, ht_end.min(mmap.len()), libc::MADV_WILLNEED);

            let data_len = mmap.len().saturating_sub(ht_end);
            if data_len > 0 {
                libc::madvise(mmap.as_ptr().add(ht_end) as *mut libc::c_void, data_len, libc::MADV_DONTNEED);
            }
        }

        Ok(MmapInner { file, mmap, file_len })
    }
}

impl MmapInner {
    fn hash_to_bucket(hash: &Hash) -> usize {
        let h = u64::from_le_bytes(hash[..8].try_into().unwrap());
        (h as usize) % HASH_TABLE_BUCKETS
    }

    fn get_bucket_offset(&self, bucket: usize) -> u64 {
        let offset = HEADER_SIZE + bucket * 8;
        u64::from_le_bytes(self.mmap[offset..offset + 8].try_into().unwrap())
    }

    fn set_bucket_offset(&mut self, bucket: usize, value: u64) {
        let offset = HEADER_SIZE + bucket * 8;
        self.mmap[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    fn exists(&self, hash: &Hash) -> bool {
        let start = Self::hash_to_bucket(hash);
        let mut bucket = start;
        loop {
            let offset = self.get_bucket_offset(bucket);
            if offset == 0 {
                return false;
            }
            let pos = offset as usize;
            if pos + 32 <= self.mmap.len() && self.mmap[pos..pos + 32] == hash[..] {
                return true;
            }
            bucket = (bucket + 1) % HASH_TABLE_BUCKETS;
            if bucket == start {
                return false;
            }
        }
    }

    fn read(&self, hash: &Hash) -> Result<Vec<u8>> {
        let start = Self::hash_to_bucket(hash);
        let mut bucket = start;
        loop {
            let offset = self.get_bucket_offset(bucket);
            if offset == 0 {
                return Err(WalgitError::not_found(crate::hash::to_hex(hash)));
            }
            let pos = offset as usize;
            if self.mmap[pos..pos + 32] == hash[..] {
                let size = u32::from_le_bytes(self.mmap[pos + 32..pos + 36].try_into().unwrap()) as usize;
                return Ok(self.mmap[pos + 36..pos + 36 + size].to_vec());
            }
            bucket = (bucket + 1) % HASH_TABLE_BUCKETS;
            if bucket == start {
                return Err(WalgitError::not_found(crate::hash::to_hex(hash)));
            }
        }
    }

    fn write_batch(&mut self, writes: &[(Hash, Vec<u8>)]) -> Result<()> {
        let mut buf = Vec::new();
        let mut to_insert = Vec::new();
        let mut offset = self.file_len;

        for (hash, data) in writes {
            if self.exists(hash) {
                continue;
            }
            buf.extend_from_slice(hash);
            buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
            buf.extend_from_slice(data);
            to_insert.push((*hash, offset));
            offset += (ENTRY_HEADER_SIZE + data.len()) as u64;
        }

        if buf.is_empty() {
            return Ok(());
        }

        let current_size = self.file_len;
        self.file_len = offset;
        self.file.set_len(self.file_len)?;

        let new_map = unsafe { MmapOptions::new().map_mut(&self.file)? };
        self.mmap = new_map;

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.write_at(&buf, current_size)?;
        }
        #[cfg(not(unix))]
        {
            use std::io::{Seek, SeekFrom, Write};
            self.file.seek(SeekFrom::Start(current_size))?;
            self.file.write_all(&buf)?;
        }

        for (hash, offset) in &to_insert {
            let start = Self::hash_to_bucket(hash);
            let mut bucket = start;
            loop {
                if self.get_bucket_offset(bucket) == 0 {
                    self.set_bucket_offset(bucket, *offset);
                    break;
                }
                bucket = (bucket + 1) % HASH_TABLE_BUCKETS;
                if bucket == start {
                    return Err(WalgitError::integrity("object-store", "hash table full"));
                }
            }
        }

        let count = u64::from_le_bytes(self.mmap[8..16].try_into().unwrap());
        self.mmap[8..16].copy_from_slice(&(count + to_insert.len() as u64).to_le_bytes());

        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.mmap.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Zero the bucket pointing at `hash`, if present. The data bytes in
    /// the append-only region are left in place — true space reclamation
    /// needs a compacting rewrite of the whole file, which is out of
    /// scope for `sweep()` today.
    fn forget(&mut self, hash: &Hash) {
        let start = Self::hash_to_bucket(hash);
        let mut bucket = start;
        loop {
            let offset = self.get_bucket_offset(bucket);
            if offset == 0 {
                return;
            }
            let pos = offset as usize;
            if pos + 32 <= self.mmap.len() && self.mmap[pos..pos + 32] == hash[..] {
                self.set_bucket_offset(bucket, 0);
                return;
            }
            bucket = (bucket + 1) % HASH_TABLE_BUCKETS;
            if bucket == start {
                return;
            }
        }
    }
}

impl LocalStore for MmapStore {
    #[instrument(skip(self), level = "trace")]
    fn exists(&self, hash: &Hash) -> bool {
        self.inner.lock().unwrap().exists(hash)
    }

    #[instrument(skip(self, hash), level = "trace")]
    fn read(&self, hash: &Hash) -> Result<Vec<u8>> {
        self.inner.lock().unwrap().read(hash)
    }

    fn write(&self, hash: Hash, data: &[u8]) -> Result<()> {
        self.write_batch(&[(hash, data.to_vec())])
    }

    #[instrument(skip(self, writes), level = "trace", fields(n = writes.len()))]
    fn write_batch(&self, writes: &[(Hash, Vec<u8>)]) -> Result<()> {
        self.inner.lock().unwrap().write_batch(writes)
    }

    fn sync(&self) -> Result<()> {
        self.inner.lock().unwrap().sync()
    }

    fn forget(&self, hash: &Hash) -> Result<()> {
        self.inner.lock().unwrap().forget(hash);
        Ok(())
    }
}

/// In-memory store fake used by tests.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<Hash, Vec<u8>>>,
}

impl LocalStore for MemoryStore {
    fn exists(&self, hash: &Hash) -> bool {
        self.objects.lock().unwrap().contains_key(hash)
    }

    fn read(&self, hash: &Hash) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .ok_or_else(|| WalgitError::not_found(crate::hash::to_hex(hash)))
    }

    fn write(&self, hash: Hash, data: &[u8]) -> Result<()> {
        self.objects.lock().unwrap().entry(hash).or_insert_with(|| data.to_vec());
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn forget(&self, hash: &Hash) -> Result<()> {
        self.objects.lock().unwrap().remove(hash);
        Ok(())
    }
}
