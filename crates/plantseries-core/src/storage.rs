//! Filesystem primitives for the partition store.
//!
//! This module centralizes path resolution and the handful of raw file
//! operations the store needs:
//!
//! - Atomic replacement of a partition file (write-to-temp then rename),
//!   so readers never observe a half-written partition.
//! - Whole-file reads into memory for the Parquet readers.
//! - Directory listing for partition discovery.
//!
//! Only the local filesystem is supported; the [`StoreRoot`] indirection
//! keeps path conventions in one place so an object-storage adapter can
//! be introduced later without rewriting the store logic.

use std::io;
use std::path::{Path, PathBuf};

use snafu::prelude::*;
use tokio::{fs, io::AsyncWriteExt};

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Root directory under which all plant/machine partitions live.
#[derive(Debug, Clone)]
pub struct StoreRoot(PathBuf);

impl StoreRoot {
    /// A store rooted at the given local directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self(root.into())
    }

    /// Resolve a store-relative path to an absolute one.
    pub fn resolve(&self, rel: &Path) -> PathBuf {
        self.0.join(rel)
    }
}

/// Errors raised by the filesystem layer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// The file does not exist.
    #[snafu(display("Path not found: {path}"))]
    NotFound {
        /// Path that was missing.
        path: String,
        /// Underlying filesystem error.
        source: io::Error,
    },

    /// Any other local I/O failure.
    #[snafu(display("I/O error at {path}: {source}"))]
    Io {
        /// Path where the failure occurred.
        path: String,
        /// Underlying filesystem error.
        source: io::Error,
    },
}

/// Removes a temporary file on drop unless disarmed after a successful
/// rename.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            // Best-effort cleanup; we are already on an error path.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

async fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent).await.context(IoSnafu {
            path: parent.display().to_string(),
        })?;
    }
    Ok(())
}

/// Write `contents` to `rel_path` under `root` with all-or-nothing
/// semantics.
///
/// The payload goes to a sibling `.tmp` file first, is synced, and is
/// then renamed over the target. A concurrent reader sees either the old
/// file or the new one, never a partial write.
pub async fn write_atomic(root: &StoreRoot, rel_path: &Path, contents: &[u8]) -> StorageResult<()> {
    let abs = root.resolve(rel_path);
    create_parent_dir(&abs).await?;

    let tmp_path = abs.with_extension("tmp");
    let mut guard = TempFileGuard::new(tmp_path.clone());

    {
        let mut file = fs::File::create(&tmp_path).await.context(IoSnafu {
            path: tmp_path.display().to_string(),
        })?;
        file.write_all(contents).await.context(IoSnafu {
            path: tmp_path.display().to_string(),
        })?;
        file.sync_all().await.context(IoSnafu {
            path: tmp_path.display().to_string(),
        })?;
    }

    fs::rename(&tmp_path, &abs).await.context(IoSnafu {
        path: abs.display().to_string(),
    })?;
    guard.disarm();

    Ok(())
}

/// Read the full contents of `rel_path` under `root`.
///
/// A missing file maps to [`StorageError::NotFound`] so callers can
/// degrade to "no data" without string-matching on messages.
pub async fn read_all_bytes(root: &StoreRoot, rel_path: &Path) -> StorageResult<Vec<u8>> {
    let abs = root.resolve(rel_path);
    let path = abs.display().to_string();
    match fs::read(&abs).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e).context(NotFoundSnafu { path }),
        Err(e) => Err(e).context(IoSnafu { path }),
    }
}

/// Read `rel_path` under `root` as UTF-8 text.
pub async fn read_to_string(root: &StoreRoot, rel_path: &Path) -> StorageResult<String> {
    let abs = root.resolve(rel_path);
    let path = abs.display().to_string();
    match fs::read_to_string(&abs).await {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e).context(NotFoundSnafu { path }),
        Err(e) => Err(e).context(IoSnafu { path }),
    }
}

/// Whether `rel_path` exists as a regular file.
pub async fn file_exists(root: &StoreRoot, rel_path: &Path) -> bool {
    fs::metadata(root.resolve(rel_path))
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Remove the file at `rel_path`. Missing files are not an error.
pub async fn remove_file(root: &StoreRoot, rel_path: &Path) -> StorageResult<()> {
    let abs = root.resolve(rel_path);
    match fs::remove_file(&abs).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context(IoSnafu {
            path: abs.display().to_string(),
        }),
    }
}

/// File names (not paths) of the regular files directly under `rel_dir`.
///
/// A missing directory yields an empty list: querying a plant/machine
/// that has never been written degrades to "no partitions" rather than
/// an error.
pub async fn list_file_names(root: &StoreRoot, rel_dir: &Path) -> StorageResult<Vec<String>> {
    let abs = root.resolve(rel_dir);
    let mut entries = match fs::read_dir(&abs).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).context(IoSnafu {
                path: abs.display().to_string(),
            });
        }
    };

    let mut names = Vec::new();
    loop {
        let entry = entries.next_entry().await.context(IoSnafu {
            path: abs.display().to_string(),
        })?;
        let Some(entry) = entry else { break };
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        if is_file {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn write_atomic_round_trips_and_leaves_no_tmp() -> TestResult {
        let tmp = TempDir::new()?;
        let root = StoreRoot::new(tmp.path());
        let rel = Path::new("a/b/part.parquet");

        write_atomic(&root, rel, b"payload").await?;

        assert_eq!(read_all_bytes(&root, rel).await?, b"payload");
        assert!(!tmp.path().join("a/b/part.tmp").exists());
        Ok(())
    }

    #[tokio::test]
    async fn write_atomic_replaces_existing_contents() -> TestResult {
        let tmp = TempDir::new()?;
        let root = StoreRoot::new(tmp.path());
        let rel = Path::new("part.parquet");

        write_atomic(&root, rel, b"old").await?;
        write_atomic(&root, rel, b"new").await?;

        assert_eq!(read_all_bytes(&root, rel).await?, b"new");
        Ok(())
    }

    #[tokio::test]
    async fn read_missing_file_is_not_found() -> TestResult {
        let tmp = TempDir::new()?;
        let root = StoreRoot::new(tmp.path());

        let err = read_all_bytes(&root, Path::new("absent"))
            .await
            .expect_err("expected NotFound");
        assert!(matches!(err, StorageError::NotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn list_file_names_missing_dir_is_empty() -> TestResult {
        let tmp = TempDir::new()?;
        let root = StoreRoot::new(tmp.path());

        let names = list_file_names(&root, Path::new("nope/nothing")).await?;
        assert!(names.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn list_file_names_sorts_and_skips_dirs() -> TestResult {
        let tmp = TempDir::new()?;
        let root = StoreRoot::new(tmp.path());

        write_atomic(&root, Path::new("dir/2024-02.parquet"), b"b").await?;
        write_atomic(&root, Path::new("dir/2024-01.parquet"), b"a").await?;
        tokio::fs::create_dir_all(tmp.path().join("dir/sub")).await?;

        let names = list_file_names(&root, Path::new("dir")).await?;
        assert_eq!(names, vec!["2024-01.parquet", "2024-02.parquet"]);
        Ok(())
    }

    #[tokio::test]
    async fn remove_file_is_idempotent() -> TestResult {
        let tmp = TempDir::new()?;
        let root = StoreRoot::new(tmp.path());
        let rel = Path::new("gone.parquet");

        write_atomic(&root, rel, b"x").await?;
        remove_file(&root, rel).await?;
        remove_file(&root, rel).await?;
        assert!(!file_exists(&root, rel).await);
        Ok(())
    }
}
