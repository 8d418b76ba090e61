//! FileSystem trait abstraction for the materialized mirror.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` (in mirror-daemon) - Uses tokio::fs
//!
//! Paths are relative to the mirror root and always use `/` separators.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Not valid UTF-8 text: {0}")]
    InvalidText(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Platform-independent filesystem abstraction.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read file contents
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write file contents and flush them to stable storage before returning.
    /// Creates parent directories if needed.
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;

    /// Delete a file
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check if path exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Create directory (and parents if needed)
    async fn mkdir(&self, path: &str) -> Result<()>;
}

/// In-memory filesystem for testing
#[derive(Default)]
pub struct InMemoryFs {
    files: RwLock<HashMap<String, Vec<u8>>>,
    dirs: RwLock<HashSet<String>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every file path currently stored.
    pub fn paths(&self) -> Vec<String> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        let mut paths: Vec<String> = files.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn normalize_path(path: &str) -> String {
        crate::file_index::normalize_path(path)
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .get(&path)
            .cloned()
            .ok_or(FsError::NotFound(path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let path = Self::normalize_path(path);

        if let Some((parent, _)) = path.rsplit_once('/') {
            self.mkdir(parent).await?;
        }

        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.insert(path, content.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = Self::normalize_path(path);
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        match files.remove(&path) {
            Some(_) => Ok(()),
            None => Err(FsError::NotFound(path)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        let dirs = self.dirs.read().unwrap_or_else(|e| e.into_inner());
        Ok(files.contains_key(&path) || dirs.contains(&path))
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let path = Self::normalize_path(path);
        let mut dirs = self.dirs.write().unwrap_or_else(|e| e.into_inner());

        // Register every ancestor so exists() agrees with a real filesystem
        let mut prefix = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            dirs.insert(prefix.clone());
        }
        Ok(())
    }
}

// Lets tests keep a handle on a filesystem that the materializer owns
#[async_trait]
impl<T: FileSystem> FileSystem for std::sync::Arc<T> {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        (**self).read(path).await
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        (**self).write(path, content).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        (**self).delete(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path).await
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        (**self).mkdir(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_fs_basic_operations() {
        let fs = InMemoryFs::new();

        fs.write("notes/Todo.txt", b"milk").await.unwrap();

        assert_eq!(fs.read("notes/Todo.txt").await.unwrap(), b"milk");
        assert!(fs.exists("notes").await.unwrap());
        assert!(fs.exists("./notes/Todo.txt").await.unwrap());

        fs.delete("notes/Todo.txt").await.unwrap();
        assert!(!fs.exists("notes/Todo.txt").await.unwrap());
        assert!(matches!(
            fs.delete("notes/Todo.txt").await,
            Err(FsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_inmemory_fs_overwrite_replaces_content() {
        let fs = InMemoryFs::new();

        fs.write("a.txt", b"first").await.unwrap();
        fs.write("a.txt", b"second").await.unwrap();

        assert_eq!(fs.read("a.txt").await.unwrap(), b"second");
        assert_eq!(fs.paths(), vec!["a.txt".to_string()]);
    }
}
