//! Playlist song link repository trait and implementation

use crate::error::Result;
use crate::models::{LinkCounts, MediaItem, PlaylistSongLink, SongLinkStatus};
use crate::repositories::{to_u32, to_u64};
use async_trait::async_trait;
use sqlx::{query, query_as, sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument};

const LINK_COLUMNS: &str = r#"
    playlist_id, song_id, position, title, artist, album, album_id, artist_id, duration_ms,
    image_tag, status, expected_bytes
"#;

/// Song link repository interface
#[async_trait]
pub trait PlaylistSongRepository: Send + Sync {
    /// Insert links in one transaction
    async fn insert_many(&self, links: &[PlaylistSongLink]) -> Result<()>;

    /// Remove every link of a playlist
    async fn delete_for_playlist(&self, playlist_id: &str) -> Result<u64>;

    /// All links in playlist order
    async fn find_for_playlist(&self, playlist_id: &str) -> Result<Vec<PlaylistSongLink>>;

    /// Pending, Failed and Downloading links in playlist order
    async fn find_remaining(&self, playlist_id: &str) -> Result<Vec<PlaylistSongLink>>;

    /// # Returns
    /// `true` if the link exists
    async fn update_status(
        &self,
        playlist_id: &str,
        song_id: &str,
        status: SongLinkStatus,
    ) -> Result<bool>;

    async fn count_by_status(&self, playlist_id: &str) -> Result<LinkCounts>;

    /// Σ expected bytes of unfinished links across *other* playlists that are
    /// currently Downloading
    async fn outstanding_expected_bytes(&self, excluding_playlist_id: &str) -> Result<u64>;

    /// Mark Pending and Downloading links Cancelled. Completed and Failed
    /// links keep their outcome.
    async fn cancel_remaining(&self, playlist_id: &str) -> Result<u64>;
}

/// SQLite implementation of PlaylistSongRepository
pub struct SqlitePlaylistSongRepository {
    pool: SqlitePool,
}

impl SqlitePlaylistSongRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> Result<PlaylistSongLink> {
        let status: String = row.try_get("status")?;

        Ok(PlaylistSongLink {
            playlist_id: row.try_get("playlist_id")?,
            position: to_u32(row.try_get("position")?),
            item: MediaItem {
                content_id: row.try_get("song_id")?,
                title: row.try_get("title")?,
                artist: row.try_get("artist")?,
                album: row.try_get("album")?,
                album_id: row.try_get("album_id")?,
                artist_id: row.try_get("artist_id")?,
                duration_ms: row.try_get("duration_ms")?,
                image_tag: row.try_get("image_tag")?,
            },
            status: status.parse::<SongLinkStatus>()?,
            expected_bytes: to_u64(row.try_get("expected_bytes")?),
        })
    }
}

#[async_trait]
impl PlaylistSongRepository for SqlitePlaylistSongRepository {
    #[instrument(skip(self, links), fields(count = links.len()))]
    async fn insert_many(&self, links: &[PlaylistSongLink]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for link in links {
            query(
                r#"
                INSERT INTO playlist_song_links (
                    playlist_id, song_id, position, title, artist, album, album_id, artist_id,
                    duration_ms, image_tag, status, expected_bytes
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&link.playlist_id)
            .bind(&link.item.content_id)
            .bind(link.position as i64)
            .bind(&link.item.title)
            .bind(&link.item.artist)
            .bind(&link.item.album)
            .bind(&link.item.album_id)
            .bind(&link.item.artist_id)
            .bind(link.item.duration_ms)
            .bind(&link.item.image_tag)
            .bind(link.status.as_str())
            .bind(link.expected_bytes as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Inserted playlist song links");
        Ok(())
    }

    async fn delete_for_playlist(&self, playlist_id: &str) -> Result<u64> {
        let result = query("DELETE FROM playlist_song_links WHERE playlist_id = ?")
            .bind(playlist_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn find_for_playlist(&self, playlist_id: &str) -> Result<Vec<PlaylistSongLink>> {
        let sql = format!(
            "SELECT {} FROM playlist_song_links WHERE playlist_id = ? ORDER BY position ASC",
            LINK_COLUMNS
        );
        let rows = query(&sql).bind(playlist_id).fetch_all(&self.pool).await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn find_remaining(&self, playlist_id: &str) -> Result<Vec<PlaylistSongLink>> {
        let sql = format!(
            "SELECT {} FROM playlist_song_links \
             WHERE playlist_id = ? AND status IN ('pending', 'failed', 'downloading') \
             ORDER BY position ASC",
            LINK_COLUMNS
        );
        let rows = query(&sql).bind(playlist_id).fetch_all(&self.pool).await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn update_status(
        &self,
        playlist_id: &str,
        song_id: &str,
        status: SongLinkStatus,
    ) -> Result<bool> {
        let result = query(
            "UPDATE playlist_song_links SET status = ? WHERE playlist_id = ? AND song_id = ?",
        )
        .bind(status.as_str())
        .bind(playlist_id)
        .bind(song_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_by_status(&self, playlist_id: &str) -> Result<LinkCounts> {
        let rows: Vec<(String, i64)> = query_as(
            "SELECT status, COUNT(*) FROM playlist_song_links WHERE playlist_id = ? GROUP BY status",
        )
        .bind(playlist_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = LinkCounts::default();
        for (status, count) in rows {
            counts.add(status.parse::<SongLinkStatus>()?, to_u32(count));
        }
        Ok(counts)
    }

    async fn outstanding_expected_bytes(&self, excluding_playlist_id: &str) -> Result<u64> {
        let (total,): (i64,) = query_as(
            r#"
            SELECT COALESCE(SUM(l.expected_bytes), 0)
            FROM playlist_song_links l
            JOIN playlist_downloads p ON p.playlist_id = l.playlist_id
            WHERE p.status = 'downloading'
              AND l.playlist_id != ?
              AND l.status IN ('pending', 'downloading', 'failed')
            "#,
        )
        .bind(excluding_playlist_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(to_u64(total))
    }

    async fn cancel_remaining(&self, playlist_id: &str) -> Result<u64> {
        let result = query(
            r#"
            UPDATE playlist_song_links SET status = 'cancelled'
            WHERE playlist_id = ? AND status IN ('pending', 'downloading')
            "#,
        )
        .bind(playlist_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AudioQuality, PlaylistDownload, PlaylistStatus};
    use crate::repositories::{PlaylistDownloadRepository, SqlitePlaylistDownloadRepository};

    async fn setup() -> (SqlitePlaylistSongRepository, SqlitePlaylistDownloadRepository) {
        let pool = crate::db::create_test_pool().await.unwrap();
        (
            SqlitePlaylistSongRepository::new(pool.clone()),
            SqlitePlaylistDownloadRepository::new(pool),
        )
    }

    fn links(playlist_id: &str, count: u32, expected_bytes: u64) -> Vec<PlaylistSongLink> {
        (0..count)
            .map(|i| PlaylistSongLink {
                playlist_id: playlist_id.to_string(),
                position: i,
                item: MediaItem::new(format!("{}-song-{}", playlist_id, i), "Song", "Artist"),
                status: SongLinkStatus::Pending,
                expected_bytes,
            })
            .collect()
    }

    async fn playlist(repo: &SqlitePlaylistDownloadRepository, id: &str, total: u32) {
        repo.insert(&PlaylistDownload::new(id, id, total, AudioQuality::Original, 1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_insert_and_order() {
        let (songs, playlists) = setup().await;
        playlist(&playlists, "pl", 3).await;
        let mut input = links("pl", 3, 10);
        input.reverse();
        songs.insert_many(&input).await.unwrap();

        let found = songs.find_for_playlist("pl").await.unwrap();
        let positions: Vec<_> = found.iter().map(|l| l.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_remaining_and_counts() {
        let (songs, playlists) = setup().await;
        playlist(&playlists, "pl", 4).await;
        songs.insert_many(&links("pl", 4, 10)).await.unwrap();

        songs.update_status("pl", "pl-song-0", SongLinkStatus::Completed).await.unwrap();
        songs.update_status("pl", "pl-song-1", SongLinkStatus::Failed).await.unwrap();
        songs.update_status("pl", "pl-song-2", SongLinkStatus::Downloading).await.unwrap();

        let remaining: Vec<_> = songs
            .find_remaining("pl")
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.position)
            .collect();
        assert_eq!(remaining, vec![1, 2, 3]);

        let counts = songs.count_by_status("pl").await.unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.downloading, 1);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.total(), 4);
    }

    #[tokio::test]
    async fn test_cancel_remaining_keeps_finished_outcomes() {
        let (songs, playlists) = setup().await;
        playlist(&playlists, "pl", 4).await;
        songs.insert_many(&links("pl", 4, 10)).await.unwrap();
        songs.update_status("pl", "pl-song-0", SongLinkStatus::Completed).await.unwrap();
        songs.update_status("pl", "pl-song-1", SongLinkStatus::Failed).await.unwrap();
        songs.update_status("pl", "pl-song-2", SongLinkStatus::Downloading).await.unwrap();

        assert_eq!(songs.cancel_remaining("pl").await.unwrap(), 2);
        let counts = songs.count_by_status("pl").await.unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.cancelled, 2);
    }

    #[tokio::test]
    async fn test_outstanding_bytes_only_counts_other_active_playlists() {
        let (songs, playlists) = setup().await;
        playlist(&playlists, "a", 2).await;
        playlist(&playlists, "b", 2).await;
        playlist(&playlists, "c", 1).await;
        songs.insert_many(&links("a", 2, 100)).await.unwrap();
        songs.insert_many(&links("b", 2, 1_000)).await.unwrap();
        songs.insert_many(&links("c", 1, 10_000)).await.unwrap();

        songs.update_status("b", "b-song-0", SongLinkStatus::Completed).await.unwrap();
        playlists.update_status("c", PlaylistStatus::Paused, 2).await.unwrap();

        assert_eq!(songs.outstanding_expected_bytes("a").await.unwrap(), 1_000);
        assert_eq!(songs.outstanding_expected_bytes("b").await.unwrap(), 200);
    }

    #[tokio::test]
    async fn test_delete_for_playlist() {
        let (songs, playlists) = setup().await;
        playlist(&playlists, "pl", 2).await;
        songs.insert_many(&links("pl", 2, 1)).await.unwrap();

        assert_eq!(songs.delete_for_playlist("pl").await.unwrap(), 2);
        assert!(songs.find_for_playlist("pl").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_link_requires_playlist_row() {
        let (songs, _) = setup().await;
        assert!(songs.insert_many(&links("orphan", 1, 1)).await.is_err());
    }
}
