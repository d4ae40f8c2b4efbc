//! Boundary between the engine and wherever the synced folder actually
//! lives.  Everything above this trait deals in relative file names and
//! bytes; hosts that proxy their own vault API implement it directly.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage I/O: {0}")]
    Io(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Minimal file surface inside the synced folder.  Paths are names relative
/// to the folder root; `""` addresses the root itself.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;
    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError>;
    async fn remove(&self, path: &str) -> Result<(), StorageError>;
    /// File names directly inside `dir`.  A missing directory lists empty.
    async fn list(&self, dir: &str) -> Result<Vec<String>, StorageError>;
}

fn map_io(path: &str, err: std::io::Error) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(path.to_string())
    } else {
        StorageError::Io(format!("{path}: {err}"))
    }
}

/// [`Storage`] rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        tokio::fs::try_exists(self.resolve(path))
            .await
            .map_err(|err| map_io(path, err))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        tokio::fs::read(self.resolve(path))
            .await
            .map_err(|err| map_io(path, err))
    }

    /// Write-then-rename so a crash mid-write never leaves a truncated
    /// document for another device to sync.  The `.tmp` sibling is cleaned
    /// up on every error path.
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| map_io(path, err))?;
        }

        let tmp = {
            let filename = full
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "wordledger".to_string());
            full.with_file_name(format!("{filename}.tmp"))
        };

        let write_result: Result<(), std::io::Error> = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)
                .await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(map_io(path, err));
        }
        if let Err(err) = tokio::fs::rename(&tmp, &full).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(map_io(path, err));
        }
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        tokio::fs::remove_file(self.resolve(path))
            .await
            .map_err(|err| map_io(path, err))
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        let mut entries = match tokio::fs::read_dir(self.resolve(dir)).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(map_io(dir, err)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| map_io(dir, err))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|ty| ty.is_file())
                .unwrap_or(false);
            if is_file {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }
}

/// In-memory [`Storage`] used in tests and by hosts without a real
/// filesystem.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.files
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.guard().contains_key(path))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.guard()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.guard().insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        self.guard()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        let files = self.guard();
        let mut names: Vec<String> = files
            .keys()
            .filter_map(|key| {
                let rest = if dir.is_empty() {
                    key.as_str()
                } else {
                    key.strip_prefix(dir)?.strip_prefix('/')?
                };
                if rest.is_empty() || rest.contains('/') {
                    None
                } else {
                    Some(rest.to_string())
                }
            })
            .collect();
        names.sort();
        Ok(names)
    }
}
