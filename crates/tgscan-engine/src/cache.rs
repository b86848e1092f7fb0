//! On-disk group cache.
//!
//! The cache is a pretty-printed JSON array of [`Group`] records. Saves go
//! through a sibling temp file followed by a rename, so a crash mid-write
//! never leaves a truncated cache behind.

use std::path::{Path, PathBuf};

use tgscan_core::Group;

use crate::error::CacheError;

#[derive(Debug, Clone)]
pub struct GroupCache {
    path: PathBuf,
}

impl GroupCache {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Reads the cached groups.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotFound`] if no cache file exists,
    /// [`CacheError::Corrupt`] if it does not parse, [`CacheError::Io`]
    /// for any other read failure.
    pub async fn load(&self) -> Result<Vec<Group>, CacheError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound {
                    path: self.display(),
                });
            }
            Err(source) => {
                return Err(CacheError::Io {
                    path: self.display(),
                    source,
                });
            }
        };
        let groups: Vec<Group> =
            serde_json::from_slice(&bytes).map_err(|source| CacheError::Corrupt {
                path: self.display(),
                source,
            })?;
        tracing::debug!(path = %self.path.display(), groups = groups.len(), "loaded group cache");
        Ok(groups)
    }

    /// Replaces the cache contents with `groups`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the temp file cannot be written or
    /// renamed into place.
    pub async fn save(&self, groups: &[Group]) -> Result<(), CacheError> {
        let body = serde_json::to_vec_pretty(groups).map_err(|source| CacheError::Corrupt {
            path: self.display(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(source))?;
        }

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|source| self.io_error(source))?;
        if let Err(source) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.io_error(source));
        }

        tracing::info!(path = %self.path.display(), groups = groups.len(), "saved group cache");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_else(|| "groups_cache.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn display(&self) -> String {
        self.path.display().to_string()
    }

    fn io_error(&self, source: std::io::Error) -> CacheError {
        CacheError::Io {
            path: self.display(),
            source,
        }
    }
}
