//! Artifact storage seam.
//!
//! Engines write every artifact (crawl summary, scene videos, trace
//! archives) through [`Storage`] using job-relative paths, so tests run
//! against [`MemoryStorage`] and production against [`FsStorage`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::result::{GrabarError, GrabarResult};

/// File name of the crawl summary artifact inside a job directory.
pub const CRAWL_SUMMARY_FILE: &str = "crawlSummary.json";

/// Job-scoped artifact store. Paths are relative to the job root and use
/// `/` separators.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `data` at `path`, creating parent directories as needed.
    async fn write_file(&self, path: &str, data: &[u8]) -> GrabarResult<()>;

    /// Read the file at `path`.
    async fn read_file(&self, path: &str) -> GrabarResult<Vec<u8>>;

    /// Whether a file exists at `path`.
    async fn exists(&self, path: &str) -> bool;

    /// Relative paths of all files under `prefix`.
    async fn list_files(&self, prefix: &str) -> GrabarResult<Vec<String>>;

    /// Copy the file at `from` to `to`.
    async fn copy(&self, from: &str, to: &str) -> GrabarResult<()>;

    /// Move the file at `from` to `to`, removing the original.
    async fn rename(&self, from: &str, to: &str) -> GrabarResult<()>;

    /// Absolute filesystem path for `path`, when the store is disk-backed.
    fn full_path(&self, path: &str) -> Option<PathBuf>;
}

/// Disk-backed [`Storage`] rooted at a job directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Store rooted at `root`. The directory is created lazily on first
    /// write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    async fn ensure_parent(&self, target: &Path) -> GrabarResult<()> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn write_file(&self, path: &str, data: &[u8]) -> GrabarResult<()> {
        let target = self.resolve(path);
        self.ensure_parent(&target).await?;
        tokio::fs::write(&target, data)
            .await
            .map_err(|e| GrabarError::Storage {
                path: path.to_string(),
                message: e.to_string(),
            })
    }

    async fn read_file(&self, path: &str) -> GrabarResult<Vec<u8>> {
        tokio::fs::read(self.resolve(path))
            .await
            .map_err(|e| GrabarError::Storage {
                path: path.to_string(),
                message: e.to_string(),
            })
    }

    async fn exists(&self, path: &str) -> bool {
        tokio::fs::try_exists(self.resolve(path)).await.unwrap_or(false)
    }

    async fn list_files(&self, prefix: &str) -> GrabarResult<Vec<String>> {
        let dir = self.resolve(prefix);
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => {
                return Err(GrabarError::Storage {
                    path: prefix.to_string(),
                    message: e.to_string(),
                })
            }
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                let name = entry.file_name().to_string_lossy().into_owned();
                let prefix = prefix.trim_end_matches('/');
                if prefix.is_empty() {
                    out.push(name);
                } else {
                    out.push(format!("{prefix}/{name}"));
                }
            }
        }
        out.sort();
        Ok(out)
    }

    async fn copy(&self, from: &str, to: &str) -> GrabarResult<()> {
        let target = self.resolve(to);
        self.ensure_parent(&target).await?;
        tokio::fs::copy(self.resolve(from), &target)
            .await
            .map_err(|e| GrabarError::Storage {
                path: to.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> GrabarResult<()> {
        let target = self.resolve(to);
        self.ensure_parent(&target).await?;
        tokio::fs::rename(self.resolve(from), &target)
            .await
            .map_err(|e| GrabarError::Storage {
                path: to.to_string(),
                message: e.to_string(),
            })
    }

    fn full_path(&self, path: &str) -> Option<PathBuf> {
        Some(self.resolve(path))
    }
}

/// In-memory [`Storage`] for tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored paths, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.files
            .lock()
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn write_file(&self, path: &str, data: &[u8]) -> GrabarResult<()> {
        if let Ok(mut files) = self.files.lock() {
            files.insert(path.to_string(), data.to_vec());
        }
        Ok(())
    }

    async fn read_file(&self, path: &str) -> GrabarResult<Vec<u8>> {
        self.files
            .lock()
            .ok()
            .and_then(|f| f.get(path).cloned())
            .ok_or_else(|| GrabarError::Storage {
                path: path.to_string(),
                message: "not found".to_string(),
            })
    }

    async fn exists(&self, path: &str) -> bool {
        self.files
            .lock()
            .map(|f| f.contains_key(path))
            .unwrap_or(false)
    }

    async fn list_files(&self, prefix: &str) -> GrabarResult<Vec<String>> {
        let prefix = prefix.trim_end_matches('/');
        let needle = if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}/")
        };
        Ok(self
            .files
            .lock()
            .map(|f| {
                f.keys()
                    .filter(|k| k.starts_with(&needle))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn copy(&self, from: &str, to: &str) -> GrabarResult<()> {
        let data = self.read_file(from).await?;
        self.write_file(to, &data).await
    }

    async fn rename(&self, from: &str, to: &str) -> GrabarResult<()> {
        let data = self.read_file(from).await?;
        self.write_file(to, &data).await?;
        if let Ok(mut files) = self.files.lock() {
            files.remove(from);
        }
        Ok(())
    }

    fn full_path(&self, _path: &str) -> Option<PathBuf> {
        None
    }
}
