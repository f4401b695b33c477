//! Artifact storage backend
//!
//! Narrow put/get interface over whatever holds built artifacts. The local
//! store lays files out under a base directory; the in-memory store backs
//! tests.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("artifact i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A stored artifact: where it lives and what it hashes to
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub storage_key: String,
    /// Hex SHA-256 of the stored bytes
    pub checksum: String,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stores the bytes under `key`, returning the final location and checksum
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<StoredArtifact, ArtifactError>;

    /// Fetches the bytes at a location previously returned by `put`
    async fn get(&self, storage_key: &str) -> Result<Vec<u8>, ArtifactError>;
}

fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Artifact store backed by a local directory
pub struct LocalArtifactStore {
    base_dir: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<StoredArtifact, ArtifactError> {
        let path = self.base_dir.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        Ok(StoredArtifact {
            storage_key: path.to_string_lossy().to_string(),
            checksum: checksum(bytes),
        })
    }

    async fn get(&self, storage_key: &str) -> Result<Vec<u8>, ArtifactError> {
        match tokio::fs::read(storage_key).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(storage_key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory artifact store for tests
pub struct MemoryArtifactStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<StoredArtifact, ArtifactError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());

        Ok(StoredArtifact {
            storage_key: key.to_string(),
            checksum: checksum(bytes),
        })
    }

    async fn get(&self, storage_key: &str) -> Result<Vec<u8>, ArtifactError> {
        self.entries
            .lock()
            .unwrap()
            .get(storage_key)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(storage_key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path().to_path_buf());

        let stored = store.put("run-1/app.tar.gz", b"bundle").await.unwrap();
        let bytes = store.get(&stored.storage_key).await.unwrap();

        assert_eq!(bytes, b"bundle");
    }

    #[tokio::test]
    async fn test_local_store_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path().to_path_buf());

        let missing = dir.path().join("nope").to_string_lossy().to_string();
        assert!(matches!(
            store.get(&missing).await,
            Err(ArtifactError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_checksum_is_sha256_of_bytes() {
        let store = MemoryArtifactStore::new();
        let stored = store.put("k", b"hello").await.unwrap();

        // sha256("hello")
        assert_eq!(
            stored.checksum,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryArtifactStore::new();
        let stored = store.put("k", b"data").await.unwrap();
        assert_eq!(store.get(&stored.storage_key).await.unwrap(), b"data");
    }
}
