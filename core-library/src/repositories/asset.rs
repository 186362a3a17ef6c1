//! Cached asset repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{AssetTotals, AudioQuality, CachedAsset};
use crate::repositories::{to_u32, to_u64};
use async_trait::async_trait;
use sqlx::{query, query_as, sqlite::SqliteRow, Row, SqlitePool};
use std::collections::HashSet;
use tracing::{debug, instrument};

const ASSET_COLUMNS: &str = r#"
    id, title, artist, album, duration_ms, quality, content_path, art_path, downloaded_at,
    content_bytes, art_bytes, last_access_at, bitrate, format, album_id, artist_id
"#;

/// Cached asset repository interface
#[async_trait]
pub trait CachedAssetRepository: Send + Sync {
    /// Insert or replace the asset with the same id
    async fn upsert(&self, asset: &CachedAsset) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<CachedAsset>>;

    async fn exists(&self, id: &str) -> Result<bool>;

    /// All assets, most recently downloaded first
    async fn find_all(&self) -> Result<Vec<CachedAsset>>;

    /// Least recently accessed assets first
    ///
    /// # Arguments
    /// * `limit` - Maximum number of rows examined by one eviction pass
    async fn find_lru(&self, limit: u32) -> Result<Vec<CachedAsset>>;

    /// Record an access at `at` (unix millis)
    ///
    /// # Errors
    /// `NotFound` if the asset does not exist
    async fn touch(&self, id: &str, at: i64) -> Result<()>;

    /// # Returns
    /// `true` if a row was removed
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Count and Σ(content + art bytes)
    async fn stats(&self) -> Result<AssetTotals>;

    /// Every content and art path referenced by a row
    async fn referenced_paths(&self) -> Result<HashSet<String>>;
}

/// SQLite implementation of CachedAssetRepository
pub struct SqliteCachedAssetRepository {
    pool: SqlitePool,
}

impl SqliteCachedAssetRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> Result<CachedAsset> {
        let quality: String = row.try_get("quality")?;
        let bitrate: Option<i64> = row.try_get("bitrate")?;

        Ok(CachedAsset {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            artist: row.try_get("artist")?,
            album: row.try_get("album")?,
            duration_ms: row.try_get("duration_ms")?,
            quality: quality.parse::<AudioQuality>()?,
            content_path: row.try_get("content_path")?,
            art_path: row.try_get("art_path")?,
            downloaded_at: row.try_get("downloaded_at")?,
            content_bytes: to_u64(row.try_get("content_bytes")?),
            art_bytes: to_u64(row.try_get("art_bytes")?),
            last_access_at: row.try_get("last_access_at")?,
            bitrate: bitrate.map(to_u32),
            format: row.try_get("format")?,
            album_id: row.try_get("album_id")?,
            artist_id: row.try_get("artist_id")?,
        })
    }
}

#[async_trait]
impl CachedAssetRepository for SqliteCachedAssetRepository {
    #[instrument(skip(self, asset), fields(asset_id = %asset.id, bytes = asset.total_bytes()))]
    async fn upsert(&self, asset: &CachedAsset) -> Result<()> {
        if asset.id.trim().is_empty() {
            return Err(LibraryError::InvalidInput {
                field: "id".to_string(),
                message: "asset id cannot be empty".to_string(),
            });
        }

        query(
            r#"
            INSERT INTO cached_assets (
                id, title, artist, album, duration_ms, quality, content_path, art_path,
                downloaded_at, content_bytes, art_bytes, last_access_at, bitrate, format,
                album_id, artist_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                artist = excluded.artist,
                album = excluded.album,
                duration_ms = excluded.duration_ms,
                quality = excluded.quality,
                content_path = excluded.content_path,
                art_path = excluded.art_path,
                downloaded_at = excluded.downloaded_at,
                content_bytes = excluded.content_bytes,
                art_bytes = excluded.art_bytes,
                last_access_at = excluded.last_access_at,
                bitrate = excluded.bitrate,
                format = excluded.format,
                album_id = excluded.album_id,
                artist_id = excluded.artist_id
            "#,
        )
        .bind(&asset.id)
        .bind(&asset.title)
        .bind(&asset.artist)
        .bind(&asset.album)
        .bind(asset.duration_ms)
        .bind(asset.quality.as_str())
        .bind(&asset.content_path)
        .bind(&asset.art_path)
        .bind(asset.downloaded_at)
        .bind(asset.content_bytes as i64)
        .bind(asset.art_bytes as i64)
        .bind(asset.last_access_at)
        .bind(asset.bitrate.map(|b| b as i64))
        .bind(&asset.format)
        .bind(&asset.album_id)
        .bind(&asset.artist_id)
        .execute(&self.pool)
        .await?;

        debug!("Stored cached asset");
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<CachedAsset>> {
        let sql = format!("SELECT {} FROM cached_assets WHERE id = ?", ASSET_COLUMNS);
        let row = query(&sql).bind(id).fetch_optional(&self.pool).await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let count: (i64,) = query_as("SELECT COUNT(*) FROM cached_assets WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0 > 0)
    }

    async fn find_all(&self) -> Result<Vec<CachedAsset>> {
        let sql = format!(
            "SELECT {} FROM cached_assets ORDER BY downloaded_at DESC",
            ASSET_COLUMNS
        );
        let rows = query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn find_lru(&self, limit: u32) -> Result<Vec<CachedAsset>> {
        let sql = format!(
            "SELECT {} FROM cached_assets ORDER BY last_access_at ASC, rowid ASC LIMIT ?",
            ASSET_COLUMNS
        );
        let rows = query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn touch(&self, id: &str, at: i64) -> Result<()> {
        let result = query("UPDATE cached_assets SET last_access_at = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::NotFound {
                entity_type: "CachedAsset".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = query("DELETE FROM cached_assets WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn stats(&self) -> Result<AssetTotals> {
        let (count, total): (i64, i64) = query_as(
            "SELECT COUNT(*), COALESCE(SUM(content_bytes + art_bytes), 0) FROM cached_assets",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(AssetTotals {
            count: to_u64(count),
            total_bytes: to_u64(total),
        })
    }

    async fn referenced_paths(&self) -> Result<HashSet<String>> {
        let rows: Vec<(String, Option<String>)> =
            query_as("SELECT content_path, art_path FROM cached_assets")
                .fetch_all(&self.pool)
                .await?;

        let mut paths = HashSet::with_capacity(rows.len() * 2);
        for (content, art) in rows {
            paths.insert(content);
            if let Some(art) = art {
                paths.insert(art);
            }
        }
        Ok(paths)
    }
}
