//! Content-addressed blob store: `state/blobs/<first2>/<sha256>` (spec §6).
//! Write-once per hash; concurrent writers with the same hash collapse
//! into a single file (idempotent `put`), mirroring the teacher's
//! `atomic_write` rename-swap so a partial write never becomes visible
//! under the final name.

use crate::error::Result;
use crate::util::atomic_write;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, sha256: &str) -> PathBuf {
        let prefix = &sha256[..sha256.len().min(2)];
        self.root.join(prefix).join(sha256)
    }

    /// Idempotent: if the blob already exists, does not rewrite it.
    pub fn put(&self, bytes: &[u8]) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let sha256 = hex::encode(hasher.finalize());

        let path = self.path_for(&sha256);
        if !path.exists() {
            atomic_write(&path, bytes)?;
        }
        Ok(sha256)
    }

    pub fn get(&self, sha256: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.path_for(sha256))?)
    }

    pub fn exists(&self, sha256: &str) -> bool {
        self.path_for(sha256).exists()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (BlobStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("cccc-test-blob-{}", uuid::Uuid::new_v4()));
        (BlobStore::new(dir.clone()), dir)
    }

    #[test]
    fn put_is_content_addressed_and_idempotent() {
        let (store, dir) = temp_store();
        let h1 = store.put(b"hello world").unwrap();
        let h2 = store.put(b"hello world").unwrap();
        assert_eq!(h1, h2);
        assert_eq!(store.get(&h1).unwrap(), b"hello world");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn different_bytes_different_hash() {
        let (store, dir) = temp_store();
        let h1 = store.put(b"a").unwrap();
        let h2 = store.put(b"b").unwrap();
        assert_ne!(h1, h2);
        let _ = std::fs::remove_dir_all(dir);
    }
}
