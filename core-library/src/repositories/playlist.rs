//! Playlist download repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{AudioQuality, PlaylistDownload, PlaylistPhase, PlaylistStatus};
use crate::repositories::to_u32;
use async_trait::async_trait;
use sqlx::{query, sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument};

const PLAYLIST_COLUMNS: &str = r#"
    playlist_id, name, total_songs, downloaded_count, failed_count, status, phase, attempt,
    quality, cover_url, last_updated_at, started_at
"#;

/// Playlist download repository interface
#[async_trait]
pub trait PlaylistDownloadRepository: Send + Sync {
    /// Insert a playlist download, replacing the aggregate of an earlier run
    /// with the same id (its song links are left to the caller)
    async fn insert(&self, playlist: &PlaylistDownload) -> Result<()>;

    async fn find_by_id(&self, playlist_id: &str) -> Result<Option<PlaylistDownload>>;

    async fn find_by_status(&self, status: PlaylistStatus) -> Result<Vec<PlaylistDownload>>;

    async fn find_all(&self) -> Result<Vec<PlaylistDownload>>;

    /// # Errors
    /// `NotFound` if the playlist does not exist
    async fn update_status(&self, playlist_id: &str, status: PlaylistStatus, at: i64) -> Result<()>;

    /// Persist the running tallies of a Phase D pass
    async fn update_counts(
        &self,
        playlist_id: &str,
        downloaded: u32,
        failed: u32,
        at: i64,
    ) -> Result<()>;

    /// Move the persisted phase pointer
    async fn set_phase(
        &self,
        playlist_id: &str,
        phase: PlaylistPhase,
        attempt: u32,
        at: i64,
    ) -> Result<()>;
}

/// SQLite implementation of PlaylistDownloadRepository
pub struct SqlitePlaylistDownloadRepository {
    pool: SqlitePool,
}

impl SqlitePlaylistDownloadRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> Result<PlaylistDownload> {
        let status: String = row.try_get("status")?;
        let phase: String = row.try_get("phase")?;
        let quality: String = row.try_get("quality")?;

        Ok(PlaylistDownload {
            playlist_id: row.try_get("playlist_id")?,
            name: row.try_get("name")?,
            total_songs: to_u32(row.try_get("total_songs")?),
            downloaded_count: to_u32(row.try_get("downloaded_count")?),
            failed_count: to_u32(row.try_get("failed_count")?),
            status: status.parse::<PlaylistStatus>()?,
            phase: phase.parse::<PlaylistPhase>()?,
            attempt: to_u32(row.try_get("attempt")?),
            quality: quality.parse::<AudioQuality>()?,
            cover_url: row.try_get("cover_url")?,
            last_updated_at: row.try_get("last_updated_at")?,
            started_at: row.try_get("started_at")?,
        })
    }

    fn not_found(playlist_id: &str) -> LibraryError {
        LibraryError::NotFound {
            entity_type: "PlaylistDownload".to_string(),
            id: playlist_id.to_string(),
        }
    }
}

#[async_trait]
impl PlaylistDownloadRepository for SqlitePlaylistDownloadRepository {
    #[instrument(skip(self, playlist), fields(playlist_id = %playlist.playlist_id))]
    async fn insert(&self, playlist: &PlaylistDownload) -> Result<()> {
        if playlist.playlist_id.trim().is_empty() {
            return Err(LibraryError::InvalidInput {
                field: "playlist_id".to_string(),
                message: "playlist id cannot be empty".to_string(),
            });
        }

        query(
            r#"
            INSERT INTO playlist_downloads (
                playlist_id, name, total_songs, downloaded_count, failed_count, status,
                phase, attempt, quality, cover_url, last_updated_at, started_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(playlist_id) DO UPDATE SET
                name = excluded.name,
                total_songs = excluded.total_songs,
                downloaded_count = excluded.downloaded_count,
                failed_count = excluded.failed_count,
                status = excluded.status,
                phase = excluded.phase,
                attempt = excluded.attempt,
                quality = excluded.quality,
                cover_url = excluded.cover_url,
                last_updated_at = excluded.last_updated_at,
                started_at = excluded.started_at
            "#,
        )
        .bind(&playlist.playlist_id)
        .bind(&playlist.name)
        .bind(playlist.total_songs as i64)
        .bind(playlist.downloaded_count as i64)
        .bind(playlist.failed_count as i64)
        .bind(playlist.status.as_str())
        .bind(playlist.phase.as_str())
        .bind(playlist.attempt as i64)
        .bind(playlist.quality.as_str())
        .bind(&playlist.cover_url)
        .bind(playlist.last_updated_at)
        .bind(playlist.started_at)
        .execute(&self.pool)
        .await?;

        debug!("Stored playlist download");
        Ok(())
    }

    async fn find_by_id(&self, playlist_id: &str) -> Result<Option<PlaylistDownload>> {
        let sql = format!(
            "SELECT {} FROM playlist_downloads WHERE playlist_id = ?",
            PLAYLIST_COLUMNS
        );
        let row = query(&sql)
            .bind(playlist_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn find_by_status(&self, status: PlaylistStatus) -> Result<Vec<PlaylistDownload>> {
        let sql = format!(
            "SELECT {} FROM playlist_downloads WHERE status = ? ORDER BY started_at ASC",
            PLAYLIST_COLUMNS
        );
        let rows = query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn find_all(&self) -> Result<Vec<PlaylistDownload>> {
        let sql = format!(
            "SELECT {} FROM playlist_downloads ORDER BY started_at ASC",
            PLAYLIST_COLUMNS
        );
        let rows = query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn update_status(&self, playlist_id: &str, status: PlaylistStatus, at: i64) -> Result<()> {
        let result = query(
            "UPDATE playlist_downloads SET status = ?, last_updated_at = ? WHERE playlist_id = ?",
        )
        .bind(status.as_str())
        .bind(at)
        .bind(playlist_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(playlist_id));
        }
        debug!(playlist_id = %playlist_id, status = %status, "Updated playlist status");
        Ok(())
    }

    async fn update_counts(
        &self,
        playlist_id: &str,
        downloaded: u32,
        failed: u32,
        at: i64,
    ) -> Result<()> {
        let result = query(
            r#"
            UPDATE playlist_downloads
            SET downloaded_count = ?, failed_count = ?, last_updated_at = ?
            WHERE playlist_id = ?
            "#,
        )
        .bind(downloaded as i64)
        .bind(failed as i64)
        .bind(at)
        .bind(playlist_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(playlist_id));
        }
        Ok(())
    }

    async fn set_phase(
        &self,
        playlist_id: &str,
        phase: PlaylistPhase,
        attempt: u32,
        at: i64,
    ) -> Result<()> {
        let result = query(
            r#"
            UPDATE playlist_downloads
            SET phase = ?, attempt = ?, last_updated_at = ?
            WHERE playlist_id = ?
            "#,
        )
        .bind(phase.as_str())
        .bind(attempt as i64)
        .bind(at)
        .bind(playlist_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(playlist_id));
        }
        debug!(playlist_id = %playlist_id, phase = %phase, attempt, "Moved phase pointer");
        Ok(())
    }
}
