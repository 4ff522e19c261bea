//! Remote object storage seam.
//!
//! Production buckets live behind this trait; [`LocalObjectStore`] mirrors the
//! same `{root}/{bucket}/{key}` layout on a filesystem.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::StoreError;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket name; part of the local cache path.
    fn bucket(&self) -> &str;

    /// Keys under `prefix`, sorted lexically.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Copies one object to `local`.
    async fn download(&self, key: &str, local: &Path) -> Result<(), StoreError>;

    /// Copies one local file to `key`.
    async fn upload(&self, local: &Path, key: &str) -> Result<(), StoreError>;
}

/// Filesystem-backed bucket.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    bucket: String,
}

impl LocalObjectStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(&self.bucket).join(key.trim_start_matches('/'))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let bucket_root = self.root.join(&self.bucket);
        let start = self.object_path(prefix);
        let mut keys = Vec::new();
        if !tokio::fs::try_exists(&start)
            .await
            .map_err(|e| StoreError::io(&start, e))?
        {
            return Ok(keys);
        }
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let metadata = tokio::fs::metadata(&dir)
                .await
                .map_err(|e| StoreError::io(&dir, e))?;
            if metadata.is_file() {
                if let Ok(rel) = dir.strip_prefix(&bucket_root) {
                    keys.push(rel.to_string_lossy().replace('\\', "/"));
                }
                continue;
            }
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| StoreError::io(&dir, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::io(&dir, e))?
            {
                pending.push(entry.path());
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn download(&self, key: &str, local: &Path) -> Result<(), StoreError> {
        let source = self.object_path(key);
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }
        tokio::fs::copy(&source, local)
            .await
            .map_err(|e| StoreError::io(&source, e))?;
        Ok(())
    }

    async fn upload(&self, local: &Path, key: &str) -> Result<(), StoreError> {
        let target = self.object_path(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }
        tokio::fs::copy(local, &target)
            .await
            .map_err(|e| StoreError::io(local, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_returns_sorted_keys_under_prefix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalObjectStore::new(dir.path(), "bucket");
        let scratch = dir.path().join("scratch.txt");
        tokio::fs::write(&scratch, b"x").await.expect("write");
        store.upload(&scratch, "runs/b/2.txt").await.expect("upload");
        store.upload(&scratch, "runs/b/1.txt").await.expect("upload");
        store.upload(&scratch, "other/3.txt").await.expect("upload");

        let keys = store.list("runs").await.expect("list");
        assert_eq!(keys, vec!["runs/b/1.txt", "runs/b/2.txt"]);
        assert!(store.list("missing").await.expect("list").is_empty());
    }
}
