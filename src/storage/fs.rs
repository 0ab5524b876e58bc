//! Local-directory blob store for offline runs.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{BlobError, BlobStore};

/// Writes objects to `{root}/{bucket}/{path}` and serves them from
/// `{public_base_url}/{bucket}/{path}`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsBlobStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

/// Accepts only relative paths made of plain components.
fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

#[async_trait]
impl BlobStore for FsBlobStore {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn put(&self, bucket: &str, path: &str, bytes: &[u8], _content_type: &str) -> Result<String, BlobError> {
        let object = format!("{bucket}/{path}");
        if !is_safe_relative(bucket) || !is_safe_relative(path) {
            return Err(BlobError::InvalidPath { path: object });
        }

        let target = self.root.join(bucket).join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| BlobError::Io {
                    path: object.clone(),
                    source,
                })?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|source| BlobError::Io {
                path: object.clone(),
                source,
            })?;
        debug!(target = %target.display(), bytes = bytes.len(), "wrote blob");

        Ok(format!("{}/{object}", self.public_base_url))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_writes_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), "http://localhost:8000/");

        let url = store.put("images", "public/a_1234abcd.jpg", b"first", "image/jpeg").await.unwrap();
        assert_eq!(url, "http://localhost:8000/images/public/a_1234abcd.jpg");
        store.put("images", "public/a_1234abcd.jpg", b"second", "image/jpeg").await.unwrap();

        let written = std::fs::read(dir.path().join("images/public/a_1234abcd.jpg")).unwrap();
        assert_eq!(written, b"second");
    }

    #[tokio::test]
    async fn test_put_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), "http://localhost");
        let result = store.put("images", "../escape.jpg", b"x", "image/jpeg").await;
        assert!(matches!(result, Err(BlobError::InvalidPath { .. })));
        let result = store.put("images", "/etc/passwd", b"x", "image/jpeg").await;
        assert!(matches!(result, Err(BlobError::InvalidPath { .. })));
    }
}
