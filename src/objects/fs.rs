use crate::objects::{ChunkSource, ObjectError, ObjectStore};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Object store backed by a local directory
pub struct FsObjectStore {
    root: PathBuf,
    assets_domain: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, assets_domain: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            assets_domain: assets_domain.into(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ObjectError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(ObjectError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn save_stream(
        &self,
        key: &str,
        body: &mut dyn ChunkSource,
        size: Option<u64>,
    ) -> Result<u64, ObjectError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let partial = path.with_extension("part");
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut written: u64 = 0;

        let copied: Result<(), ObjectError> = async {
            while let Some(chunk) = body.next_chunk().await? {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        let checked = copied.and_then(|_| match size {
            Some(expected) if expected != written => Err(ObjectError::SizeMismatch {
                key: key.to_string(),
                expected,
                actual: written,
            }),
            _ => Ok(()),
        });

        if let Err(e) = checked {
            drop(file);
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        drop(file);
        tokio::fs::rename(&partial, &path).await?;
        tracing::debug!("Stored object {} ({} bytes)", key, written);

        Ok(written)
    }

    fn assets_domain(&self) -> &str {
        &self.assets_domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Chunks(Vec<Vec<u8>>);

    #[async_trait]
    impl ChunkSource for Chunks {
        async fn next_chunk(&mut self) -> std::io::Result<Option<Vec<u8>>> {
            if self.0.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.0.remove(0)))
            }
        }
    }

    #[tokio::test]
    async fn test_save_stream_writes_file() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path(), "https://assets.example.com/");

        let mut body = Chunks(vec![b"abc".to_vec(), b"def".to_vec()]);
        let written = store
            .save_stream("post/1/0.jpg", &mut body, Some(6))
            .await
            .unwrap();

        assert_eq!(written, 6);
        let stored = std::fs::read(dir.path().join("post/1/0.jpg")).unwrap();
        assert_eq!(stored, b"abcdef");
        assert_eq!(
            store.public_url("post/1/0.jpg"),
            "https://assets.example.com/post/1/0.jpg"
        );
    }

    #[tokio::test]
    async fn test_size_mismatch_keeps_nothing() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path(), "https://assets.example.com");

        let mut body = Chunks(vec![b"abc".to_vec()]);
        let result = store.save_stream("note/9/0.png", &mut body, Some(10)).await;

        assert!(matches!(result, Err(ObjectError::SizeMismatch { .. })));
        assert!(!dir.path().join("note/9/0.png").exists());
        assert!(!dir.path().join("note/9/0.part").exists());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path(), "https://assets.example.com");

        for key in ["../escape.jpg", "/abs.jpg", ""] {
            let mut body = Chunks(vec![]);
            let result = store.save_stream(key, &mut body, None).await;
            assert!(matches!(result, Err(ObjectError::InvalidKey(_))), "{}", key);
        }
    }
}
