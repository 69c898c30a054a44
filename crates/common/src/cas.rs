//! Content-addressed trace image store
//!
//! Images captured during test runs are stored by their SHA-256 digest:
//! - identical screenshots are stored once
//! - reads verify the digest
//! - writes go through a temp file and a rename
//!
//! Each upload also writes a small reference file holding the digest under
//! `sessions/<session>/<result>/<name>`.

use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ContentAddressedStore {
    root: PathBuf,
}

impl ContentAddressedStore {
    /// Open or create a store rooted at `root`
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("objects")).await?;
        fs::create_dir_all(root.join("sessions")).await?;
        fs::create_dir_all(root.join("tmp")).await?;

        info!("Initialized image store at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    /// SHA-256 of `data`, hex encoded
    pub fn hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Path of an object, sharded by the first two digest characters
    pub fn object_path(&self, digest: &str) -> PathBuf {
        let (prefix, _) = digest.split_at(2.min(digest.len()));
        self.objects_dir().join("sha256").join(prefix).join(digest)
    }

    pub async fn has(&self, digest: &str) -> bool {
        fs::metadata(self.object_path(digest)).await.is_ok()
    }

    /// Store `data` and return its digest
    pub async fn put(&self, data: &[u8]) -> Result<String> {
        let digest = Self::hash(data);
        if self.has(&digest).await {
            debug!("Object {} already exists", digest);
            return Ok(digest);
        }

        let path = self.object_path(&digest);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp_path = self
            .root
            .join("tmp")
            .join(format!("{}.{}.tmp", digest, uuid::Uuid::new_v4()));
        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, &path).await?;

        debug!("Stored object {} ({} bytes)", digest, data.len());
        Ok(digest)
    }

    /// Read an object, verifying its digest
    pub async fn get(&self, digest: &str) -> Result<Vec<u8>> {
        let path = self.object_path(digest);
        if !self.has(digest).await {
            return Err(Error::not_found("object", digest));
        }

        let data = fs::read(&path).await?;
        let actual = Self::hash(&data);
        if actual != digest {
            return Err(Error::Integrity(format!(
                "digest mismatch: expected {}, got {}",
                digest, actual
            )));
        }
        Ok(data)
    }

    /// Store an image captured for one result; returns its digest
    pub async fn put_trace_image(
        &self,
        session_id: &str,
        result_id: &str,
        name: &str,
        data: &[u8],
    ) -> Result<String> {
        let digest = self.put(data).await?;
        let dir = self.sessions_dir().join(session_id).join(result_id);
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join(sanitize(name)), &digest).await?;
        debug!("Linked image {} to {}/{}", name, session_id, result_id);
        Ok(digest)
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get() {
        let tmp = TempDir::new().unwrap();
        let cas = ContentAddressedStore::new(tmp.path()).await.unwrap();

        let digest = cas.put(b"hello world").await.unwrap();
        assert!(cas.has(&digest).await);
        assert_eq!(cas.get(&digest).await.unwrap(), b"hello world".to_vec());
        assert_eq!(cas.put(b"hello world").await.unwrap(), digest);
    }

    #[tokio::test]
    async fn test_integrity_check() {
        let tmp = TempDir::new().unwrap();
        let cas = ContentAddressedStore::new(tmp.path()).await.unwrap();

        let digest = cas.put(b"screenshot").await.unwrap();
        fs::write(cas.object_path(&digest), b"corrupted").await.unwrap();
        assert!(matches!(cas.get(&digest).await, Err(Error::Integrity(_))));
    }

    #[tokio::test]
    async fn test_trace_image_is_linked_to_result() {
        let tmp = TempDir::new().unwrap();
        let cas = ContentAddressedStore::new(tmp.path()).await.unwrap();

        let digest = cas.put_trace_image("s1", "r1", "login/page.png", b"png").await.unwrap();
        let link = tmp.path().join("sessions").join("s1").join("r1").join("login_page.png");
        assert_eq!(fs::read_to_string(link).await.unwrap(), digest);
        assert_eq!(cas.get(&digest).await.unwrap(), b"png".to_vec());
    }
}
