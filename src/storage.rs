use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::StorageError;

pub const COVER_FILENAME: &str = "cover.jpg";
const TRASH_DIR: &str = ".trash";
const ORIGIN_EXT: &str = "origin";

/// Filesystem-backed resource cache. Keys are paths relative to the cache root,
/// built with [`series_dir`], [`cover_key`], [`chapter_dir`] and [`page_key`].
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Absolute location of `key`.
    fn resolve(&self, key: &Path) -> PathBuf;
    async fn read(&self, key: &Path) -> Result<Option<Vec<u8>>, StorageError>;
    async fn exists(&self, key: &Path) -> Result<bool, StorageError>;
    /// Write atomically, creating parent directories. Returns the absolute path.
    async fn write(&self, key: &Path, bytes: &[u8]) -> Result<PathBuf, StorageError>;
    async fn create_dir(&self, key: &Path) -> Result<(), StorageError>;
    /// Move a directory out of the addressable tree, remembering where it came
    /// from. `None` if it did not exist.
    async fn retire_dir(&self, key: &Path) -> Result<Option<PathBuf>, StorageError>;
    /// Undo [`ResourceStore::retire_dir`].
    async fn restore_dir(&self, retired: &Path, key: &Path) -> Result<(), StorageError>;
    async fn purge(&self, retired: &Path) -> Result<(), StorageError>;
    /// Settle leftovers of interrupted deletions. Entries whose key is in `live`
    /// go back into place, everything else is removed.
    async fn sweep(&self, live: &HashSet<PathBuf>) -> Result<SweepReport, StorageError>;
}

/// Outcome of [`ResourceStore::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub restored: usize,
    pub purged: usize,
}

#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }
    pub fn root(&self) -> &Path { &self.root }

    fn trash(&self) -> PathBuf { self.root.join(TRASH_DIR) }
}

#[async_trait]
impl ResourceStore for DiskCache {
    fn resolve(&self, key: &Path) -> PathBuf { self.root.join(key) }

    async fn read(&self, key: &Path) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.resolve(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    async fn exists(&self, key: &Path) -> Result<bool, StorageError> {
        let path = self.resolve(key);
        tokio::fs::try_exists(&path).await.map_err(|e| StorageError::io(path, e))
    }

    async fn write(&self, key: &Path, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        let path = self.resolve(key);
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        tokio::fs::create_dir_all(&parent).await.map_err(|e| StorageError::io(&parent, e))?;

        // Readers only ever see complete files
        let tmp = parent.join(format!(".part-{}", uuid::Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&tmp, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::io(tmp, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::io(path, e));
        }
        debug!(path = %path.display(), len = bytes.len(), "cached resource");
        Ok(path)
    }

    async fn create_dir(&self, key: &Path) -> Result<(), StorageError> {
        let path = self.resolve(key);
        tokio::fs::create_dir_all(&path).await.map_err(|e| StorageError::io(path, e))
    }

    async fn retire_dir(&self, key: &Path) -> Result<Option<PathBuf>, StorageError> {
        let path = self.resolve(key);
        if !tokio::fs::try_exists(&path).await.map_err(|e| StorageError::io(&path, e))? {
            return Ok(None);
        }
        let trash = self.trash();
        tokio::fs::create_dir_all(&trash).await.map_err(|e| StorageError::io(&trash, e))?;
        let retired = trash.join(uuid::Uuid::new_v4().to_string());

        // The origin goes down first so a retired directory is never anonymous
        let origin = origin_file(&retired);
        tokio::fs::write(&origin, key.to_string_lossy().as_bytes())
            .await
            .map_err(|e| StorageError::io(&origin, e))?;
        if let Err(e) = tokio::fs::rename(&path, &retired).await {
            let _ = tokio::fs::remove_file(&origin).await;
            return Err(StorageError::io(path, e));
        }
        Ok(Some(retired))
    }

    async fn restore_dir(&self, retired: &Path, key: &Path) -> Result<(), StorageError> {
        let path = self.resolve(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| StorageError::io(parent, e))?;
        }
        tokio::fs::rename(retired, &path).await.map_err(|e| StorageError::io(path, e))?;
        remove_origin(retired).await;
        Ok(())
    }

    async fn purge(&self, retired: &Path) -> Result<(), StorageError> {
        match tokio::fs::remove_dir_all(retired).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io(retired, e)),
        }
        remove_origin(retired).await;
        Ok(())
    }

    async fn sweep(&self, live: &HashSet<PathBuf>) -> Result<SweepReport, StorageError> {
        let trash = self.trash();
        let mut entries = match tokio::fs::read_dir(&trash).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(SweepReport::default()),
            Err(e) => return Err(StorageError::io(trash, e)),
        };
        let mut retired = Vec::new();
        let mut origins = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| StorageError::io(&trash, e))? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == ORIGIN_EXT) {
                origins.push(path);
            } else {
                retired.push(path);
            }
        }

        let mut report = SweepReport::default();
        for path in retired {
            let key = match tokio::fs::read_to_string(origin_file(&path)).await {
                Ok(raw) => Some(PathBuf::from(raw.trim())),
                Err(e) if e.kind() == ErrorKind::NotFound => None,
                Err(e) => return Err(StorageError::io(origin_file(&path), e)),
            };
            match key.filter(|k| live.contains(k)) {
                Some(key) => {
                    if self.exists(&key).await? {
                        warn!(retired = %path.display(), key = %key.display(), "retired directory shadowed by a live one, kept aside");
                        continue;
                    }
                    self.restore_dir(&path, &key).await?;
                    debug!(key = %key.display(), "retired directory restored");
                    report.restored += 1;
                }
                None => match self.purge(&path).await {
                    Ok(()) => report.purged += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "could not purge retired resources"),
                },
            }
        }

        // Origins whose directory never made it into the trash
        for origin in origins {
            if !tokio::fs::try_exists(origin.with_extension("")).await.unwrap_or(true) {
                let _ = tokio::fs::remove_file(&origin).await;
            }
        }
        Ok(report)
    }
}

fn origin_file(retired: &Path) -> PathBuf {
    retired.with_extension(ORIGIN_EXT)
}

async fn remove_origin(retired: &Path) {
    if let Err(e) = tokio::fs::remove_file(origin_file(retired)).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %retired.display(), error = %e, "could not remove origin marker");
        }
    }
}

/// Make `raw` safe to use as a single path component.
pub fn sanitize_component(raw: &str) -> Result<String, StorageError> {
    let clean: String = raw
        .trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') || c.is_control() { '_' } else { c })
        .collect();
    if clean.is_empty() || clean == "." || clean == ".." {
        return Err(StorageError::InvalidKey(raw.to_string()));
    }
    Ok(clean)
}

pub fn series_dir(source_id: &str, series_slug: &str) -> Result<PathBuf, StorageError> {
    Ok(PathBuf::from(sanitize_component(source_id)?).join(sanitize_component(series_slug)?))
}

pub fn cover_key(source_id: &str, series_slug: &str) -> Result<PathBuf, StorageError> {
    Ok(series_dir(source_id, series_slug)?.join(COVER_FILENAME))
}

pub fn chapter_dir(source_id: &str, series_slug: &str, chapter_slug: &str) -> Result<PathBuf, StorageError> {
    Ok(series_dir(source_id, series_slug)?.join(sanitize_component(chapter_slug)?))
}

pub fn page_key(source_id: &str, series_slug: &str, chapter_slug: &str, filename: &str) -> Result<PathBuf, StorageError> {
    Ok(chapter_dir(source_id, series_slug, chapter_slug)?.join(sanitize_component(filename)?))
}

/// Cache filename for a page identifier: its last path segment, query and fragment stripped.
pub fn page_filename(identifier: &str) -> Result<String, StorageError> {
    let no_query = identifier.split(['?', '#']).next().unwrap_or_default();
    let last = no_query.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    sanitize_component(last)
}
