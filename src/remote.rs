//! External collaborator contracts: the remote blob service that holds
//! `External`-tier content, and the signer used to authorize writes to
//! it. Both are specified only as async traits here — concrete HTTP/
//! wallet implementations are external collaborators (see SPEC_FULL.md
//! §1) — with in-memory fakes so the engine is independently testable.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Result, WalgitError};
use crate::hash::Hash;

/// A signed authorization to perform one remote operation. Concrete
/// signers produce these from wallet/keypair material the engine never
/// touches directly.
#[derive(Debug, Clone)]
pub struct Signature(pub Vec<u8>);

#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, payload: &[u8]) -> Result<Signature>;
}

/// Opaque handle a `RemoteBlobService` returns for content it now holds;
/// stored inside `Blob::External` and handed back on `get`.
pub type Locator = Box<str>;

#[async_trait]
pub trait RemoteBlobService: Send + Sync {
    async fn put(&self, content_hash: Hash, data: Vec<u8>, auth: &Signature) -> Result<Locator>;
    async fn get(&self, locator: &str) -> Result<Vec<u8>>;
    async fn exists(&self, locator: &str) -> Result<bool>;
}

/// Test fake that always signs successfully.
pub struct FixedSigner;

#[async_trait]
impl Signer for FixedSigner {
    async fn sign(&self, payload: &[u8]) -> Result<Signature> {
        Ok(Signature(payload.to_vec()))
    }
}

/// In-memory `RemoteBlobService` fake. Supports injecting failures for a
/// configurable number of calls so `retry`/breaker tests can exercise
/// transient-failure-then-recovery without a real network dependency.
#[derive(Default)]
pub struct InMemoryRemoteBlobService {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    next_id: Mutex<u64>,
    fail_next: Mutex<u32>,
}

impl InMemoryRemoteBlobService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `fail_next` calls to `put`/`get` return `Remote` errors.
    pub fn fail_next_calls(&self, n: u32) {
        *self.fail_next.lock().unwrap() = n;
    }

    fn maybe_fail(&self) -> Result<()> {
        let mut n = self.fail_next.lock().unwrap();
        if *n > 0 {
            *n -= 1;
            return Err(WalgitError::Remote("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteBlobService for InMemoryRemoteBlobService {
    async fn put(&self, content_hash: Hash, data: Vec<u8>, _auth: &Signature) -> Result<Locator> {
        self.maybe_fail()?;
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        let locator = format!("mem://{}/{}", id, crate::hash::to_hex(&content_hash));
        self.blobs.lock().unwrap().insert(locator.clone(), data);
        Ok(locator.into_boxed_str())
    }

    async fn get(&self, locator: &str) -> Result<Vec<u8>> {
        self.maybe_fail()?;
        self.blobs
            .lock()
            .unwrap()
            .get(locator)
            .cloned()
            .ok_or_else(|| WalgitError::not_found(locator))
    }

    async fn exists(&self, locator: &str) -> Result<bool> {
        Ok(self.blobs.lock().unwrap().contains_key(locator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let svc = InMemoryRemoteBlobService::new();
        let signer = FixedSigner;
        let auth = signer.sign(b"payload").await.unwrap();

        let hash = crate::hash::hash_bytes(b"content");
        let locator = svc.put(hash, b"content".to_vec(), &auth).await.unwrap();
        assert!(svc.exists(&locator).await.unwrap());
        assert_eq!(svc.get(&locator).await.unwrap(), b"content");
    }

    #[tokio::test]
    async fn injected_failure_then_recovery() {
        let svc = InMemoryRemoteBlobService::new();
        let signer = FixedSigner;
        let auth = signer.sign(b"payload").await.unwrap();
        svc.fail_next_calls(2);

        let hash = crate::hash::hash_bytes(b"content");
        assert!(svc.put(hash, b"content".to_vec(), &auth).await.is_err());
        assert!(svc.put(hash, b"content".to_vec(), &auth).await.is_err());
        assert!(svc.put(hash, b"content".to_vec(), &auth).await.is_ok());
    }
}
