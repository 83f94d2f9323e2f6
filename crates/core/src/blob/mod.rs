//! Flat-file blob storage addressed by hashed cache keys.
//!
//! One root directory, created lazily on first write. Files are named by
//! the SHA-256 hex of their cache key; an optional `.mime` sidecar next to
//! each blob carries the Content-Type for response reconstruction.
//!
//! Concurrency contract: operations on different keys may run from any
//! number of tasks; callers serialize operations on the same key. `put` is
//! idempotent under "already exists", which is what makes concurrent saves
//! of a shared asset safe.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::key::hashed_path;

/// Result of moving a staged file into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The blob was newly written.
    Created,
    /// A blob for this key was already present; the staged file was
    /// discarded and the existing content kept. The caller should still
    /// record its membership link.
    AlreadyExists,
}

/// Binary storage keyed by hashed cache key under a single root directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Create a store rooted at `root`. The directory itself is created
    /// lazily on the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(hashed_path(key))
    }

    fn mime_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.mime", hashed_path(key)))
    }

    /// Move a staged temp file into the store under `key`.
    ///
    /// The move is a rename, not a copy, so a completed blob is always
    /// whole. An existing blob at the target is not an error: the staged
    /// copy is removed and `PutOutcome::AlreadyExists` returned so the
    /// engine can link the membership without rewriting shared content.
    pub async fn put(&self, staged: &Path, key: &str, mime: Option<&str>) -> Result<PutOutcome, Error> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::blob_io(key, e))?;

        let target = self.blob_path(key);

        if tokio::fs::try_exists(&target)
            .await
            .map_err(|e| Error::blob_io(key, e))?
        {
            if let Err(e) = tokio::fs::remove_file(staged).await
                && e.kind() != ErrorKind::NotFound
            {
                tracing::warn!(key, error = %e, "failed to discard staged duplicate");
            }
            tracing::debug!(key, "blob already present, keeping existing content");
            return Ok(PutOutcome::AlreadyExists);
        }

        match tokio::fs::rename(staged, &target).await {
            Ok(()) => {}
            // Staging dirs can live on another filesystem; fall back to a
            // copy into place followed by removal of the staged file.
            Err(e) if e.kind() == ErrorKind::CrossesDevices => {
                tokio::fs::copy(staged, &target)
                    .await
                    .map_err(|e| Error::blob_io(key, e))?;
                let _ = tokio::fs::remove_file(staged).await;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::StagedFileMissing(staged.display().to_string()));
            }
            Err(e) => return Err(Error::blob_io(key, e)),
        }

        if let Some(mime) = mime {
            tokio::fs::write(self.mime_path(key), mime)
                .await
                .map_err(|e| Error::blob_io(key, e))?;
        }

        tracing::debug!(key, "blob stored");
        Ok(PutOutcome::Created)
    }

    /// Whether a blob for `key` exists.
    pub async fn exists(&self, key: &str) -> bool {
        tokio::fs::try_exists(self.blob_path(key)).await.unwrap_or(false)
    }

    /// Read the blob for `key`, or `None` if absent.
    pub async fn read(&self, key: &str) -> Option<Vec<u8>> {
        match tokio::fs::read(self.blob_path(key)).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "blob read failed");
                None
            }
        }
    }

    /// Read the stored MIME type for `key`, if one was recorded.
    pub async fn mime(&self, key: &str) -> Option<String> {
        match tokio::fs::read_to_string(self.mime_path(key)).await {
            Ok(mime) => Some(mime),
            Err(_) => None,
        }
    }

    /// Delete the blob (and sidecar) for `key`.
    ///
    /// A missing blob counts as success: concurrent cleanup passes may race
    /// on the same orphan.
    pub async fn delete(&self, key: &str) -> Result<(), Error> {
        match tokio::fs::remove_file(self.blob_path(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::blob_io(key, e)),
        }
        match tokio::fs::remove_file(self.mime_path(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::blob_io(key, e)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn stage(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        tokio::fs::write(&path, contents).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_put_and_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().join("blobs"));
        let staged = stage(&dir, "staged", b"<html>Dog</html>").await;

        let outcome = store
            .put(&staged, "en.wikipedia.org__mobile-html__Dog", Some("text/html"))
            .await
            .unwrap();
        assert_eq!(outcome, PutOutcome::Created);

        let bytes = store.read("en.wikipedia.org__mobile-html__Dog").await.unwrap();
        assert_eq!(bytes, b"<html>Dog</html>");
        assert_eq!(
            store.mime("en.wikipedia.org__mobile-html__Dog").await,
            Some("text/html".to_string())
        );
        assert!(!tokio::fs::try_exists(&staged).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_existing_key_keeps_original_content() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().join("blobs"));

        let first = stage(&dir, "first", b"original").await;
        let second = stage(&dir, "second", b"duplicate download").await;

        assert_eq!(store.put(&first, "pagelib__js", None).await.unwrap(), PutOutcome::Created);
        assert_eq!(
            store.put(&second, "pagelib__js", None).await.unwrap(),
            PutOutcome::AlreadyExists
        );

        assert_eq!(store.read("pagelib__js").await.unwrap(), b"original");
        // The duplicate staged file is cleaned up.
        assert!(!tokio::fs::try_exists(&second).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_missing_staged_file() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().join("blobs"));

        let err = store
            .put(&dir.path().join("nope"), "pagelib__js", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StagedFileMissing(_)));
        assert!(!store.exists("pagelib__js").await);
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().join("blobs"));
        store.delete("never-stored").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_removes_blob_and_sidecar() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().join("blobs"));
        let staged = stage(&dir, "staged", b"body {}").await;

        store.put(&staged, "base__css", Some("text/css")).await.unwrap();
        store.delete("base__css").await.unwrap();

        assert!(!store.exists("base__css").await);
        assert_eq!(store.mime("base__css").await, None);
        assert_eq!(store.read("base__css").await, None);
    }

    #[tokio::test]
    async fn test_filenames_are_hashed() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().join("blobs"));
        let staged = stage(&dir, "staged", b"x").await;
        // Raw keys can exceed name-length limits or contain unsafe chars.
        let key = "https://en.wikipedia.org/some/very/unsafe key?with=query";
        store.put(&staged, key, None).await.unwrap();

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(store.root()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().into_string().unwrap());
        }
        assert_eq!(names, vec![hashed_path(key)]);
    }
}
