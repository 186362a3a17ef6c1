//! Download job repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{AudioQuality, DownloadJob, DownloadJobId, DownloadStatus, MediaItem};
use crate::repositories::{to_u32, to_u64};
use async_trait::async_trait;
use sqlx::{query, sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument};

const JOB_COLUMNS: &str = r#"
    id, content_id, title, artist, album, album_id, artist_id, duration_ms, image_tag,
    quality, status, progress, bytes_downloaded, total_bytes, added_at, error_message,
    retry_count, parent_playlist_id, position_in_playlist
"#;

/// Download job repository interface
#[async_trait]
pub trait DownloadJobRepository: Send + Sync {
    /// Insert a new job
    ///
    /// # Errors
    /// Fails if another live job already holds the same content id.
    async fn insert(&self, job: &DownloadJob) -> Result<()>;

    async fn find_by_id(&self, id: &DownloadJobId) -> Result<Option<DownloadJob>>;

    /// The Pending, Downloading or Failed job for a content id, if any
    async fn find_live_by_content_id(&self, content_id: &str) -> Result<Option<DownloadJob>>;

    /// Oldest Pending job not owned by a playlist run (FIFO by `added_at`)
    async fn next_pending(&self) -> Result<Option<DownloadJob>>;

    /// Move a job from `from` to `to` if it is still in `from`.
    ///
    /// Moving to Failed records `error_message` and bumps `retry_count`;
    /// moving to Pending clears progress and the error.
    ///
    /// # Returns
    /// - `Ok(true)` if the row changed
    /// - `Ok(false)` if the job is gone or no longer in `from`
    ///
    /// # Errors
    /// `InvalidInput` when the transition is not allowed.
    async fn update_status(
        &self,
        id: &DownloadJobId,
        from: DownloadStatus,
        to: DownloadStatus,
        error_message: Option<&str>,
    ) -> Result<bool>;

    async fn update_progress(
        &self,
        id: &DownloadJobId,
        progress: f64,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    ) -> Result<()>;

    /// Delete a job
    ///
    /// # Returns
    /// `true` if a row was removed
    async fn delete(&self, id: &DownloadJobId) -> Result<bool>;

    /// Delete every job row for a content id
    async fn delete_by_content_id(&self, content_id: &str) -> Result<u64>;

    /// Jobs in one state, FIFO order
    async fn find_by_status(&self, status: DownloadStatus) -> Result<Vec<DownloadJob>>;

    /// All jobs, FIFO order
    async fn find_all(&self) -> Result<Vec<DownloadJob>>;

    /// Delete leftover jobs tagged with a playlist run
    async fn delete_by_playlist(&self, playlist_id: &str) -> Result<u64>;
}

/// SQLite implementation of DownloadJobRepository
pub struct SqliteDownloadJobRepository {
    pool: SqlitePool,
}

impl SqliteDownloadJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> Result<DownloadJob> {
        let quality: String = row.try_get("quality")?;
        let status: String = row.try_get("status")?;
        let total_bytes: Option<i64> = row.try_get("total_bytes")?;
        let position: Option<i64> = row.try_get("position_in_playlist")?;

        Ok(DownloadJob {
            id: DownloadJobId(row.try_get("id")?),
            item: MediaItem {
                content_id: row.try_get("content_id")?,
                title: row.try_get("title")?,
                artist: row.try_get("artist")?,
                album: row.try_get("album")?,
                album_id: row.try_get("album_id")?,
                artist_id: row.try_get("artist_id")?,
                duration_ms: row.try_get("duration_ms")?,
                image_tag: row.try_get("image_tag")?,
            },
            quality: quality.parse::<AudioQuality>()?,
            status: status.parse::<DownloadStatus>()?,
            progress: row.try_get("progress")?,
            bytes_downloaded: to_u64(row.try_get("bytes_downloaded")?),
            total_bytes: total_bytes.map(to_u64),
            added_at: row.try_get("added_at")?,
            error_message: row.try_get("error_message")?,
            retry_count: to_u32(row.try_get("retry_count")?),
            parent_playlist_id: row.try_get("parent_playlist_id")?,
            position_in_playlist: position.map(to_u32),
        })
    }

    async fn fetch_many(&self, sql: &str, status: Option<DownloadStatus>) -> Result<Vec<DownloadJob>> {
        let mut q = query(sql);
        if let Some(status) = status {
            q = q.bind(status.as_str());
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(Self::map_row).collect()
    }
}

#[async_trait]
impl DownloadJobRepository for SqliteDownloadJobRepository {
    #[instrument(skip(self, job), fields(job_id = %job.id, content_id = %job.item.content_id))]
    async fn insert(&self, job: &DownloadJob) -> Result<()> {
        job.item.validate().map_err(|e| LibraryError::InvalidInput {
            field: "MediaItem".to_string(),
            message: e,
        })?;

        query(
            r#"
            INSERT INTO download_jobs (
                id, content_id, title, artist, album, album_id, artist_id, duration_ms,
                image_tag, quality, status, progress, bytes_downloaded, total_bytes,
                added_at, error_message, retry_count, parent_playlist_id, position_in_playlist
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.as_str())
        .bind(&job.item.content_id)
        .bind(&job.item.title)
        .bind(&job.item.artist)
        .bind(&job.item.album)
        .bind(&job.item.album_id)
        .bind(&job.item.artist_id)
        .bind(job.item.duration_ms)
        .bind(&job.item.image_tag)
        .bind(job.quality.as_str())
        .bind(job.status.as_str())
        .bind(job.progress)
        .bind(job.bytes_downloaded as i64)
        .bind(job.total_bytes.map(|b| b as i64))
        .bind(job.added_at)
        .bind(&job.error_message)
        .bind(job.retry_count as i64)
        .bind(&job.parent_playlist_id)
        .bind(job.position_in_playlist.map(|p| p as i64))
        .execute(&self.pool)
        .await?;

        debug!("Inserted download job");
        Ok(())
    }

    async fn find_by_id(&self, id: &DownloadJobId) -> Result<Option<DownloadJob>> {
        let sql = format!("SELECT {} FROM download_jobs WHERE id = ?", JOB_COLUMNS);
        let row = query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn find_live_by_content_id(&self, content_id: &str) -> Result<Option<DownloadJob>> {
        let sql = format!(
            "SELECT {} FROM download_jobs \
             WHERE content_id = ? AND status IN ('pending', 'downloading', 'failed') \
             LIMIT 1",
            JOB_COLUMNS
        );
        let row = query(&sql)
            .bind(content_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn next_pending(&self) -> Result<Option<DownloadJob>> {
        let sql = format!(
            "SELECT {} FROM download_jobs \
             WHERE status = 'pending' AND parent_playlist_id IS NULL \
             ORDER BY added_at ASC, rowid ASC LIMIT 1",
            JOB_COLUMNS
        );
        let row = query(&sql).fetch_optional(&self.pool).await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    #[instrument(skip_all, fields(job_id = %id, from = %from, to = %to))]
    async fn update_status(
        &self,
        id: &DownloadJobId,
        from: DownloadStatus,
        to: DownloadStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        if !from.can_transition_to(to) {
            return Err(LibraryError::InvalidInput {
                field: "status".to_string(),
                message: format!("cannot move download job from {} to {}", from, to),
            });
        }

        let result = match to {
            DownloadStatus::Failed => {
                query(
                    r#"
                    UPDATE download_jobs
                    SET status = ?, error_message = ?, retry_count = retry_count + 1
                    WHERE id = ? AND status = ?
                    "#,
                )
                .bind(to.as_str())
                .bind(error_message)
                .bind(id.as_str())
                .bind(from.as_str())
                .execute(&self.pool)
                .await?
            }
            DownloadStatus::Pending => {
                query(
                    r#"
                    UPDATE download_jobs
                    SET status = ?, error_message = NULL, progress = 0.0,
                        bytes_downloaded = 0, total_bytes = NULL
                    WHERE id = ? AND status = ?
                    "#,
                )
                .bind(to.as_str())
                .bind(id.as_str())
                .bind(from.as_str())
                .execute(&self.pool)
                .await?
            }
            _ => {
                query("UPDATE download_jobs SET status = ? WHERE id = ? AND status = ?")
                    .bind(to.as_str())
                    .bind(id.as_str())
                    .bind(from.as_str())
                    .execute(&self.pool)
                    .await?
            }
        };

        Ok(result.rows_affected() > 0)
    }

    async fn update_progress(
        &self,
        id: &DownloadJobId,
        progress: f64,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    ) -> Result<()> {
        query(
            r#"
            UPDATE download_jobs
            SET progress = ?, bytes_downloaded = ?, total_bytes = ?
            WHERE id = ?
            "#,
        )
        .bind(progress.clamp(0.0, 1.0))
        .bind(bytes_downloaded as i64)
        .bind(total_bytes.map(|b| b as i64))
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: &DownloadJobId) -> Result<bool> {
        let result = query("DELETE FROM download_jobs WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_content_id(&self, content_id: &str) -> Result<u64> {
        let result = query("DELETE FROM download_jobs WHERE content_id = ?")
            .bind(content_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn find_by_status(&self, status: DownloadStatus) -> Result<Vec<DownloadJob>> {
        let sql = format!(
            "SELECT {} FROM download_jobs WHERE status = ? ORDER BY added_at ASC, rowid ASC",
            JOB_COLUMNS
        );
        self.fetch_many(&sql, Some(status)).await
    }

    async fn find_all(&self) -> Result<Vec<DownloadJob>> {
        let sql = format!(
            "SELECT {} FROM download_jobs ORDER BY added_at ASC, rowid ASC",
            JOB_COLUMNS
        );
        self.fetch_many(&sql, None).await
    }

    async fn delete_by_playlist(&self, playlist_id: &str) -> Result<u64> {
        let result = query("DELETE FROM download_jobs WHERE parent_playlist_id = ?")
            .bind(playlist_id)
            .execute(&self.pool)
            .await?;

        debug!(playlist_id = %playlist_id, removed = result.rows_affected(), "Deleted playlist jobs");
        Ok(result.rows_affected())
    }
}
