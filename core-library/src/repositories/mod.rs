//! # Repository Pattern Implementation
//!
//! Repository traits and their SQLite implementations for the offline
//! metadata store.
//!
//! ## Architecture
//!
//! - Traits define the interface for each relation
//! - SQLite implementations use sqlx for async database access
//! - Writes are single-statement upserts; the only multi-row write
//!   (`insert_many` for song links) runs in a transaction
//!
//! ## Available Repositories
//!
//! - `DownloadJobRepository` - Queued and in-flight single-asset transfers
//! - `CachedAssetRepository` - Songs retained on disk, LRU bookkeeping
//! - `PlaylistDownloadRepository` - Bulk download aggregates and phase pointer
//! - `PlaylistSongRepository` - Per-song links of a bulk download
//! - `DownloadPreferenceRepository` - Short-lived per-playlist choices

pub mod asset;
pub mod job;
pub mod playlist;
pub mod preference;
pub mod song_link;

pub use asset::{CachedAssetRepository, SqliteCachedAssetRepository};
pub use job::{DownloadJobRepository, SqliteDownloadJobRepository};
pub use playlist::{PlaylistDownloadRepository, SqlitePlaylistDownloadRepository};
pub use preference::{DownloadPreferenceRepository, SqliteDownloadPreferenceRepository};
pub use song_link::{PlaylistSongRepository, SqlitePlaylistSongRepository};

/// Non-negative SQLite integer to `u64`
pub(crate) fn to_u64(value: i64) -> u64 {
    value.max(0) as u64
}

/// Non-negative SQLite integer to `u32`, saturating
pub(crate) fn to_u32(value: i64) -> u32 {
    value.clamp(0, u32::MAX as i64) as u32
}
