//! Domain models for the offline metadata store
//!
//! Rows are plain structs; status enums carry their own persistence names and
//! the transition rules the rest of the core relies on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// =============================================================================
// ID Types
// =============================================================================

/// Unique identifier for a download job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadJobId(pub String);

impl DownloadJobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DownloadJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DownloadJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a persisted enum value is not recognised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// =============================================================================
// Quality
// =============================================================================

/// Requested transfer quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AudioQuality {
    /// Passthrough of the stored file
    #[default]
    Original,
    High,
    Medium,
    Low,
}

text_enum!(AudioQuality, "quality", {
    Original => "original",
    High => "high",
    Medium => "medium",
    Low => "low",
});

impl AudioQuality {
    /// Bitrate cap in kbps; `None` for passthrough
    pub fn max_bitrate_kbps(&self) -> Option<u32> {
        match self {
            Self::Original => None,
            Self::High => Some(320),
            Self::Medium => Some(192),
            Self::Low => Some(128),
        }
    }

    /// Container requested from the transcoder; `None` for passthrough
    pub fn container(&self) -> Option<&'static str> {
        match self {
            Self::Original => None,
            _ => Some("mp3"),
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Original)
    }
}

// =============================================================================
// Media item
// =============================================================================

/// Descriptive fields of a remote song, as handed in by the catalog layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub content_id: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub album_id: Option<String>,
    pub artist_id: Option<String>,
    pub duration_ms: i64,
    /// Primary image tag used to fetch cover art
    pub image_tag: Option<String>,
}

impl MediaItem {
    pub fn new(
        content_id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            title: title.into(),
            artist: artist.into(),
            album: None,
            album_id: None,
            artist_id: None,
            duration_ms: 0,
            image_tag: None,
        }
    }

    pub fn with_album(mut self, album: impl Into<String>, album_id: Option<String>) -> Self {
        self.album = Some(album.into());
        self.album_id = album_id;
        self
    }

    pub fn with_artist_id(mut self, artist_id: impl Into<String>) -> Self {
        self.artist_id = Some(artist_id.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_image_tag(mut self, tag: impl Into<String>) -> Self {
        self.image_tag = Some(tag.into());
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.content_id.trim().is_empty() {
            return Err("content_id cannot be empty".to_string());
        }
        if self.duration_ms < 0 {
            return Err("duration_ms cannot be negative".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Download jobs
// =============================================================================

/// Lifecycle of a single-asset transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

text_enum!(DownloadStatus, "download status", {
    Pending => "pending",
    Downloading => "downloading",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl DownloadStatus {
    /// Whether a job may move from `self` to `next`.
    ///
    /// Pending → Downloading → {Completed, Failed}; Cancelled from Pending or
    /// Downloading; Failed → Pending only through an explicit retry.
    pub fn can_transition_to(&self, next: DownloadStatus) -> bool {
        use DownloadStatus::*;
        matches!(
            (self, next),
            (Pending, Downloading)
                | (Pending, Cancelled)
                | (Downloading, Completed)
                | (Downloading, Failed)
                | (Downloading, Cancelled)
                | (Failed, Pending)
        )
    }

    /// Rows in these states occupy the content id
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Pending | Self::Downloading | Self::Failed)
    }
}

/// One queued or active single-asset transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadJob {
    pub id: DownloadJobId,
    pub item: MediaItem,
    pub quality: AudioQuality,
    pub status: DownloadStatus,
    /// Fraction in [0, 1]
    pub progress: f64,
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    pub added_at: i64,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub parent_playlist_id: Option<String>,
    pub position_in_playlist: Option<u32>,
}

impl DownloadJob {
    pub fn new(item: MediaItem, quality: AudioQuality, added_at: i64) -> Self {
        Self {
            id: DownloadJobId::new(),
            item,
            quality,
            status: DownloadStatus::Pending,
            progress: 0.0,
            bytes_downloaded: 0,
            total_bytes: None,
            added_at,
            error_message: None,
            retry_count: 0,
            parent_playlist_id: None,
            position_in_playlist: None,
        }
    }

    /// Tag the job as belonging to a playlist run
    pub fn for_playlist(mut self, playlist_id: impl Into<String>, position: u32) -> Self {
        self.parent_playlist_id = Some(playlist_id.into());
        self.position_in_playlist = Some(position);
        self
    }

    pub fn content_id(&self) -> &str {
        &self.item.content_id
    }
}

// =============================================================================
// Cached assets
// =============================================================================

/// A song retained on local storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAsset {
    /// Same as the content id it was downloaded from
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_ms: i64,
    pub quality: AudioQuality,
    pub content_path: String,
    pub art_path: Option<String>,
    pub downloaded_at: i64,
    pub content_bytes: u64,
    pub art_bytes: u64,
    pub last_access_at: i64,
    pub bitrate: Option<u32>,
    pub format: String,
    pub album_id: Option<String>,
    pub artist_id: Option<String>,
}

impl CachedAsset {
    /// Bytes counted against the cache cap
    pub fn total_bytes(&self) -> u64 {
        self.content_bytes.saturating_add(self.art_bytes)
    }
}

/// Aggregate size of the cache as stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssetTotals {
    pub count: u64,
    pub total_bytes: u64,
}

// =============================================================================
// Playlist downloads
// =============================================================================

/// Aggregate status of a bulk download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaylistStatus {
    Pending,
    Downloading,
    Full,
    Partial,
    Paused,
    Cancelled,
}

text_enum!(PlaylistStatus, "playlist status", {
    Pending => "pending",
    Downloading => "downloading",
    Full => "full",
    Partial => "partial",
    Paused => "paused",
    Cancelled => "cancelled",
});

impl PlaylistStatus {
    /// Final status from per-song outcomes.
    ///
    /// Full iff nothing failed and every song downloaded; Partial iff some
    /// failed and some downloaded; Cancelled otherwise (including nothing
    /// attempted at all).
    pub fn from_counts(downloaded: u32, failed: u32, total: u32) -> Self {
        if downloaded == 0 && failed == 0 {
            Self::Cancelled
        } else if failed == 0 && downloaded == total {
            Self::Full
        } else if failed > 0 && downloaded > 0 {
            Self::Partial
        } else {
            Self::Cancelled
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Full | Self::Partial | Self::Cancelled)
    }
}

/// Persisted phase pointer of a playlist run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaylistPhase {
    Validate,
    Download,
    Rollup,
    Done,
}

text_enum!(PlaylistPhase, "playlist phase", {
    Validate => "validate",
    Download => "download",
    Rollup => "rollup",
    Done => "done",
});

/// One bulk download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistDownload {
    pub playlist_id: String,
    pub name: String,
    pub total_songs: u32,
    pub downloaded_count: u32,
    pub failed_count: u32,
    pub status: PlaylistStatus,
    pub phase: PlaylistPhase,
    /// Phase D passes started so far
    pub attempt: u32,
    pub quality: AudioQuality,
    pub cover_url: Option<String>,
    pub last_updated_at: i64,
    pub started_at: i64,
}

impl PlaylistDownload {
    pub fn new(
        playlist_id: impl Into<String>,
        name: impl Into<String>,
        total_songs: u32,
        quality: AudioQuality,
        now: i64,
    ) -> Self {
        Self {
            playlist_id: playlist_id.into(),
            name: name.into(),
            total_songs,
            downloaded_count: 0,
            failed_count: 0,
            status: PlaylistStatus::Downloading,
            phase: PlaylistPhase::Validate,
            attempt: 0,
            quality,
            cover_url: None,
            last_updated_at: now,
            started_at: now,
        }
    }
}

/// Per-song state inside a playlist download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SongLinkStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

text_enum!(SongLinkStatus, "song link status", {
    Pending => "pending",
    Downloading => "downloading",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl SongLinkStatus {
    /// Still owed work by a playlist run
    pub fn is_remaining(&self) -> bool {
        matches!(self, Self::Pending | Self::Downloading | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistSongLink {
    pub playlist_id: String,
    pub position: u32,
    pub item: MediaItem,
    pub status: SongLinkStatus,
    pub expected_bytes: u64,
}

impl PlaylistSongLink {
    pub fn song_id(&self) -> &str {
        &self.item.content_id
    }
}

/// Per-status tallies of a playlist's links
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkCounts {
    pub pending: u32,
    pub downloading: u32,
    pub completed: u32,
    pub failed: u32,
    pub cancelled: u32,
}

impl LinkCounts {
    pub fn total(&self) -> u32 {
        self.pending + self.downloading + self.completed + self.failed + self.cancelled
    }

    pub fn remaining(&self) -> u32 {
        self.pending + self.downloading + self.failed
    }

    pub(crate) fn add(&mut self, status: SongLinkStatus, count: u32) {
        match status {
            SongLinkStatus::Pending => self.pending += count,
            SongLinkStatus::Downloading => self.downloading += count,
            SongLinkStatus::Completed => self.completed += count,
            SongLinkStatus::Failed => self.failed += count,
            SongLinkStatus::Cancelled => self.cancelled += count,
        }
    }
}

// =============================================================================
// Preferences
// =============================================================================

/// Short-lived user choice for one playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadPreference {
    pub playlist_id: String,
    pub allow_metered_network: bool,
    pub expires_at: i64,
}

impl DownloadPreference {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}
