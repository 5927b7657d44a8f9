//! Image files captured on the device.
//!
//! Each captured photo is copied into one directory as `<photo id>.<ext>`
//! and stays there until the store drops the photo.

use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

const DEFAULT_EXTENSION: &str = "jpg";

#[derive(Debug, thiserror::Error)]
pub enum PhotoFileError {
    #[error("Photo file error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Disk usage of the captured photo directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoStorage {
    pub files: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct PhotoFiles {
    dir: PathBuf,
}

impl PhotoFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copies `source` into the photo directory under the photo's id.
    pub async fn import(&self, photo_id: &str, source: &Path) -> Result<PathBuf, PhotoFileError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| PhotoFileError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let extension = source
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
        let target = self.dir.join(format!("{}.{}", photo_id, extension));
        tokio::fs::copy(source, &target)
            .await
            .map_err(|e| PhotoFileError::Io {
                path: source.to_path_buf(),
                source: e,
            })?;
        tracing::debug!(photo = photo_id, path = %target.display(), "Stored photo file");
        Ok(target)
    }

    /// Deletes a stored file. A file that is already gone is not an error.
    pub async fn remove(path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed photo file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove photo file"),
        }
    }

    pub async fn usage(&self) -> Result<PhotoStorage, PhotoFileError> {
        let io_error = |source: io::Error| PhotoFileError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(PhotoStorage::default()),
            Err(e) => return Err(io_error(e)),
        };

        let mut usage = PhotoStorage::default();
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let metadata = entry.metadata().await.map_err(io_error)?;
            if metadata.is_file() {
                usage.files += 1;
                usage.bytes += metadata.len();
            }
        }
        Ok(usage)
    }
}

/// `file://` URI for a stored photo, used as its URL until the server
/// hands out a real one.
pub fn file_uri(path: &Path) -> String {
    format!("file://{}", path.display())
}
