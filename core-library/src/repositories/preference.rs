//! Download preference repository trait and implementation

use crate::error::Result;
use crate::models::DownloadPreference;
use async_trait::async_trait;
use sqlx::{query, query_as, SqlitePool};
use tracing::debug;

/// Download preference repository interface
#[async_trait]
pub trait DownloadPreferenceRepository: Send + Sync {
    async fn upsert(&self, preference: &DownloadPreference) -> Result<()>;

    /// The preference for a playlist if it has not expired at `now`
    async fn find_live(&self, playlist_id: &str, now: i64) -> Result<Option<DownloadPreference>>;

    /// Delete every preference expired at `now`
    ///
    /// # Returns
    /// Number of rows removed
    async fn purge_expired(&self, now: i64) -> Result<u64>;
}

/// SQLite implementation of DownloadPreferenceRepository
pub struct SqliteDownloadPreferenceRepository {
    pool: SqlitePool,
}

impl SqliteDownloadPreferenceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DownloadPreferenceRepository for SqliteDownloadPreferenceRepository {
    async fn upsert(&self, preference: &DownloadPreference) -> Result<()> {
        query(
            r#"
            INSERT INTO download_preferences (playlist_id, allow_metered_network, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(playlist_id) DO UPDATE SET
                allow_metered_network = excluded.allow_metered_network,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&preference.playlist_id)
        .bind(preference.allow_metered_network)
        .bind(preference.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_live(&self, playlist_id: &str, now: i64) -> Result<Option<DownloadPreference>> {
        let row: Option<(String, bool, i64)> = query_as(
            r#"
            SELECT playlist_id, allow_metered_network, expires_at
            FROM download_preferences
            WHERE playlist_id = ? AND expires_at > ?
            "#,
        )
        .bind(playlist_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(playlist_id, allow_metered_network, expires_at)| DownloadPreference {
            playlist_id,
            allow_metered_network,
            expires_at,
        }))
    }

    async fn purge_expired(&self, now: i64) -> Result<u64> {
        let result = query("DELETE FROM download_preferences WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            debug!(removed = result.rows_affected(), "Purged expired download preferences");
        }
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    fn preference(id: &str, allow: bool, expires_at: i64) -> DownloadPreference {
        DownloadPreference {
            playlist_id: id.to_string(),
            allow_metered_network: allow,
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_live_lookup_respects_expiry() {
        let repo = SqliteDownloadPreferenceRepository::new(create_test_pool().await.unwrap());
        repo.upsert(&preference("pl", true, 1_000)).await.unwrap();

        assert_eq!(
            repo.find_live("pl", 999).await.unwrap(),
            Some(preference("pl", true, 1_000))
        );
        assert!(repo.find_live("pl", 1_000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_overwrites_and_purge() {
        let repo = SqliteDownloadPreferenceRepository::new(create_test_pool().await.unwrap());
        repo.upsert(&preference("a", true, 10)).await.unwrap();
        repo.upsert(&preference("a", false, 50)).await.unwrap();
        repo.upsert(&preference("b", true, 20)).await.unwrap();

        assert_eq!(repo.purge_expired(30).await.unwrap(), 1);
        assert_eq!(
            repo.find_live("a", 30).await.unwrap(),
            Some(preference("a", false, 50))
        );
        assert!(repo.find_live("b", 0).await.unwrap().is_none());
    }
}
