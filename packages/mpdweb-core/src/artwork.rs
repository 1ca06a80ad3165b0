//! Cover art storage.
//!
//! The cover of the current song lives in exactly one file. The change
//! watcher is its only writer; the `/cover` handler and any external reader
//! may read it at any time.
//!
//! Updates are written to a sibling temporary file and then renamed over the
//! target, so a reader sees either the previous cover or the new one, never a
//! partially written file.
//!
//! # Example
//!
//! ```ignore
//! use mpdweb_core::CoverStore;
//!
//! let store = CoverStore::in_temp_dir();
//! store.replace(&jpeg_bytes).await?;
//! let current = store.read().await?; // Some(bytes)
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;

/// Errors raised by cover storage operations.
#[derive(Debug, Error)]
pub enum CoverError {
    /// Writing the temporary file failed.
    #[error("Failed to write cover to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Renaming the temporary file over the cover failed.
    #[error("Failed to replace cover at {path}: {source}")]
    Replace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading or removing the cover failed.
    #[error("Cover I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenient Result alias for cover storage operations.
pub type CoverResult<T> = Result<T, CoverError>;

/// The single on-disk copy of the current cover image.
#[derive(Debug, Clone)]
pub struct CoverStore {
    path: PathBuf,
}

impl CoverStore {
    /// Creates a store for the cover at `path`.
    ///
    /// The parent directory must exist. Nothing is written until the first
    /// [`replace`](Self::replace).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates a store backed by a uniquely named file in the system temp dir.
    #[must_use]
    pub fn in_temp_dir() -> Self {
        let name = format!("mpdweb-cover-{}", uuid::Uuid::new_v4().simple());
        Self::new(std::env::temp_dir().join(name))
    }

    /// Returns the location of the cover file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cover".to_string());
        self.path.with_file_name(format!(
            ".{}.{}.tmp",
            name,
            uuid::Uuid::new_v4().simple()
        ))
    }

    /// Atomically replaces the stored cover with `data`.
    pub async fn replace(&self, data: &[u8]) -> CoverResult<()> {
        let staging = self.staging_path();

        if let Err(source) = tokio::fs::write(&staging, data).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(CoverError::Write {
                path: staging,
                source,
            });
        }

        if let Err(source) = tokio::fs::rename(&staging, &self.path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(CoverError::Replace {
                path: self.path.clone(),
                source,
            });
        }

        log::debug!(
            "[Cover] Stored {} bytes at {}",
            data.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Reads the current cover, or `None` if no cover is stored.
    pub async fn read(&self) -> CoverResult<Option<Bytes>> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CoverError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Removes the stored cover. Removing a missing cover is not an error.
    pub async fn clear(&self) -> CoverResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CoverError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}
