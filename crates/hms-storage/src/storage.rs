//! 影像存储管理

use async_trait::async_trait;
use hms_core::{HmsError, Result};
use std::path::{Component, Path, PathBuf};

/// 影像文件存放的子目录
pub const IMAGE_DIR: &str = "medical-images";

/// 文件存储协作方
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// 写入文件，返回存储路径
    async fn store(&self, file_name: &str, data: &[u8]) -> Result<String>;

    /// 按存储路径删除，文件不存在时视为成功
    async fn delete(&self, storage_path: &str) -> Result<()>;

    async fn read(&self, storage_path: &str) -> Result<Vec<u8>>;
}

/// 本地文件系统存储
#[derive(Debug, Clone)]
pub struct LocalImageStore {
    base_path: PathBuf,
}

impl LocalImageStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn resolve(&self, storage_path: &str) -> Result<PathBuf> {
        let relative = Path::new(storage_path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if storage_path.is_empty() || escapes {
            return Err(HmsError::Storage(format!("invalid storage path: {}", storage_path)));
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn store(&self, file_name: &str, data: &[u8]) -> Result<String> {
        let storage_path = format!("{}/{}", IMAGE_DIR, file_name);
        let full_path = self.resolve(&storage_path)?;
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&full_path, data).await?;
        tracing::debug!(path = %full_path.display(), bytes = data.len(), "Stored image file");
        Ok(storage_path)
    }

    async fn delete(&self, storage_path: &str) -> Result<()> {
        let full_path = self.resolve(storage_path)?;
        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => {
                tracing::debug!(path = %full_path.display(), "Deleted image file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, storage_path: &str) -> Result<Vec<u8>> {
        let full_path = self.resolve(storage_path)?;
        let data = tokio::fs::read(full_path).await?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalImageStore::new(dir.path());

        let path = store.store("scan.png", b"pixels").await.unwrap();
        assert_eq!(path, "medical-images/scan.png");
        assert_eq!(store.read(&path).await.unwrap(), b"pixels");

        store.delete(&path).await.unwrap();
        assert!(!dir.path().join(&path).exists());
        // 再次删除不报错
        store.delete(&path).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_paths_outside_base() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalImageStore::new(dir.path());

        assert!(store.delete("../etc/passwd").await.is_err());
        assert!(store.read("/etc/passwd").await.is_err());
        assert!(store.store("../escape.png", b"x").await.is_err());
    }
}
