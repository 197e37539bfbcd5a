//! File-backed storage implementation
//!
//! Every key maps to one file inside the storage directory. Writes go to a
//! temporary file first and are renamed into place, so a crash mid-write
//! leaves the previous value intact.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use quire_core::{DurableStore, StorageError};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Directory-backed implementation of [`DurableStore`]
#[derive(Debug)]
pub struct FileStore {
    /// Path to the storage directory
    storage_path: PathBuf,
    /// Serializes writers so temp files never collide
    write_lock: Mutex<()>,
    /// Whether to fsync before the rename
    sync_writes: bool,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `storage_path`
    pub async fn new(storage_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::with_options(storage_path, true).await
    }

    /// Open with an explicit durability setting
    pub async fn with_options(
        storage_path: impl AsRef<Path>,
        sync_writes: bool,
    ) -> Result<Self, StorageError> {
        let storage_path = storage_path.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&storage_path).await?;
        info!(path = ?storage_path, "Opened file store");

        Ok(Self {
            storage_path,
            write_lock: Mutex::new(()),
            sync_writes,
        })
    }

    /// Root directory of the store
    pub fn path(&self) -> &Path {
        &self.storage_path
    }

    /// File path for a key
    ///
    /// Keys are free-form, so anything outside `[A-Za-z0-9._-]` is replaced
    /// to keep the file name inside the storage directory.
    fn key_path(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.storage_path.join(format!("{}.json", file_name))
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.key_path(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(format!("{}: {}", path.display(), e))),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let path = self.key_path(key);
        let temp_path = path.with_extension("json.tmp");

        {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(value.as_bytes()).await?;
            if self.sync_writes {
                file.sync_all().await?;
            }
        }
        tokio::fs::rename(&temp_path, &path).await?;

        debug!(key, path = ?path, bytes = value.len(), "Stored value");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.key_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
