//! On-disk layout of the offline cache
//!
//! Two flat directories under the host data directory:
//!
//! ```text
//! <data>/offline/content/<stem>.<ext>
//! <data>/offline/art/<stem>.jpg
//! ```
//!
//! `<stem>` is the content id escaped by [`sanitize_file_stem`].

use crate::error::{OfflineError, Result};
use bridge_traits::storage::FileSystemAccess;
use std::path::{Path, PathBuf};

const OFFLINE_DIR: &str = "offline";
const CONTENT_DIR: &str = "content";
const ART_DIR: &str = "art";
const ART_EXTENSION: &str = "jpg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Layout rooted in the host's data directory
    pub async fn resolve(fs: &dyn FileSystemAccess) -> Result<Self> {
        let data_dir = fs
            .get_data_directory()
            .await
            .map_err(|e| OfflineError::Storage(format!("data directory unavailable: {}", e)))?;
        Ok(Self::new(data_dir.join(OFFLINE_DIR)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn content_dir(&self) -> PathBuf {
        self.root.join(CONTENT_DIR)
    }

    pub fn art_dir(&self) -> PathBuf {
        self.root.join(ART_DIR)
    }

    pub async fn ensure_dirs(&self, fs: &dyn FileSystemAccess) -> Result<()> {
        for dir in [self.content_dir(), self.art_dir()] {
            fs.create_dir_all(&dir)
                .await
                .map_err(|e| OfflineError::Storage(format!("{}: {}", dir.display(), e)))?;
        }
        Ok(())
    }

    pub fn content_path(&self, content_id: &str, extension: &str) -> PathBuf {
        self.content_dir()
            .join(format!("{}.{}", sanitize_file_stem(content_id), extension))
    }

    pub fn art_path(&self, content_id: &str) -> PathBuf {
        self.art_dir()
            .join(format!("{}.{}", sanitize_file_stem(content_id), ART_EXTENSION))
    }
}

/// Map a content id onto `[A-Za-z0-9_-]` without collisions
///
/// ASCII letters, digits and `-` pass through. Every other byte, `_`
/// included, becomes `_` followed by two upper-case hex digits, so distinct
/// ids always get distinct stems.
pub fn sanitize_file_stem(content_id: &str) -> String {
    if content_id.is_empty() {
        return "_".to_string();
    }

    let mut stem = String::with_capacity(content_id.len());
    for byte in content_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("_{:02X}", byte));
        }
    }
    stem
}

/// Stored form of a path in the metadata store
pub(crate) fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Delete a file, treating an already missing file as success
///
/// # Returns
/// `true` if a file was removed
pub(crate) async fn remove_if_present(fs: &dyn FileSystemAccess, path: &Path) -> Result<bool> {
    let present = fs
        .exists(path)
        .await
        .map_err(|e| OfflineError::Storage(format!("{}: {}", path.display(), e)))?;
    if !present {
        return Ok(false);
    }

    fs.delete_file(path)
        .await
        .map_err(|e| OfflineError::Storage(format!("{}: {}", path.display(), e)))?;
    Ok(true)
}
