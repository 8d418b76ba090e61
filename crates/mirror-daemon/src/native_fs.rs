//! Native filesystem implementation using tokio::fs.

use async_trait::async_trait;
use mirror_core::fs::{FileSystem, FsError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Native filesystem rooted at the mirror directory
pub struct NativeFs {
    base_path: PathBuf,
}

impl NativeFs {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }
}

fn io_error(path: &str, e: std::io::Error) -> FsError {
    if e.kind() == ErrorKind::NotFound {
        FsError::NotFound(path.to_string())
    } else {
        FsError::Io(format!("{}: {}", path, e))
    }
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(self.full_path(path))
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(path, e))?;
        }

        let mut file = fs::File::create(&full_path)
            .await
            .map_err(|e| io_error(path, e))?;
        file.write_all(content).await.map_err(|e| io_error(path, e))?;
        // The edit loop reads files back, so the content must be on disk
        file.sync_all().await.map_err(|e| io_error(path, e))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        fs::remove_file(self.full_path(path))
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        fs::try_exists(self.full_path(path))
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.full_path(path))
            .await
            .map_err(|e| io_error(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_creates_parents_and_reads_back() {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::new(dir.path().to_path_buf());

        fs.write("notes/Todo.txt", b"buy milk").await.unwrap();

        assert_eq!(fs.read("notes/Todo.txt").await.unwrap(), b"buy milk");
        assert!(dir.path().join("notes/Todo.txt").is_file());
    }

    #[tokio::test]
    async fn test_write_truncates_existing_file() {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::new(dir.path().to_path_buf());

        fs.write("a.txt", b"a much longer text").await.unwrap();
        fs.write("a.txt", b"short").await.unwrap();

        assert_eq!(fs.read("a.txt").await.unwrap(), b"short");
    }

    #[tokio::test]
    async fn test_missing_file_maps_to_not_found() {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::new(dir.path().to_path_buf());

        assert!(matches!(fs.read("nope.txt").await, Err(FsError::NotFound(_))));
        assert!(matches!(fs.delete("nope.txt").await, Err(FsError::NotFound(_))));
        assert!(!fs.exists("nope.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_mkdir_and_delete() {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::new(dir.path().to_path_buf());

        fs.mkdir("notes/nested").await.unwrap();
        assert!(fs.exists("notes/nested").await.unwrap());

        fs.write("notes/x.txt", b"x").await.unwrap();
        fs.delete("notes/x.txt").await.unwrap();
        assert!(!fs.exists("notes/x.txt").await.unwrap());
    }
}
