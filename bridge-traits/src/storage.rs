//! Storage capabilities: the filesystem the offline content lives on, the
//! keychain holding the server token, and the host's preference store.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    /// Unix seconds
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

/// Sandboxed file access.
///
/// Desktop hosts map this straight onto the local filesystem; mobile hosts
/// resolve the directories inside the app container.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn room_for(fs: &dyn FileSystemAccess, bytes: u64) -> Result<bool> {
///     let root = fs.get_data_directory().await?.join("offline");
///     Ok(fs.available_space(&root).await? > bytes)
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Scratch space the OS may purge under storage pressure
    async fn get_cache_directory(&self) -> Result<PathBuf>;

    /// Durable application data; offline media is stored below it
    async fn get_data_directory(&self) -> Result<PathBuf>;

    async fn exists(&self, path: &Path) -> Result<bool>;

    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Recursive, succeeds when the directory already exists
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Replace the whole file with `data`
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Direct children of `path`
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Truncating writer for streamed downloads
    async fn open_write_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn tokio::io::AsyncWrite + Send + Unpin>>;

    /// Bytes available to the application on the volume holding `path`
    async fn available_space(&self, path: &Path) -> Result<u64>;
}

/// Platform keychain (Keychain, Keystore, Secret Service, DPAPI).
///
/// Values are opaque bytes. Implementations must never log them.
#[async_trait]
pub trait SecureStore: Send + Sync {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// `Ok(None)` when nothing is stored under `key`
    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn delete_secret(&self, key: &str) -> Result<()>;
}

/// Typed user preferences.
///
/// The offline core reads the cache cap and the overheat-protection toggle
/// from here:
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn limit_cache(store: &dyn SettingsStore) -> Result<()> {
///     store.set_i64("offline.max_cache_bytes", 4 * 1024 * 1024 * 1024).await?;
///     store.set_bool("offline.overheat_protection", true).await
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    async fn set_bool(&self, key: &str, value: bool) -> Result<()>;

    async fn get_bool(&self, key: &str) -> Result<Option<bool>>;

    async fn set_i64(&self, key: &str, value: i64) -> Result<()>;

    async fn get_i64(&self, key: &str) -> Result<Option<i64>>;

    async fn delete(&self, key: &str) -> Result<()>;
}
