use async_trait::async_trait;
use bridge_desktop::{DesktopBatteryMonitor, SqliteSettingsStore, TokioFileSystem};
use bridge_traits::device::BatteryState;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, HttpStreamResponse};
use bridge_traits::storage::{SecureStore, SettingsStore};
use core_library::db::{create_pool, DatabaseConfig};
use core_library::models::{AudioQuality, DownloadJob, DownloadStatus, MediaItem};
use core_library::repositories::{DownloadJobRepository, SqliteDownloadJobRepository};
use core_offline::PauseCause;
use core_runtime::config::{
    ClientIdentity, CoreConfig, CoreConfigBuilder, ServerConfig, SETTING_MAX_CACHE_BYTES,
};
use core_service::{CoreError, OfflineService};
use mockall::mock;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

mock! {
    Http {}

    #[async_trait]
    impl HttpClient for Http {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        async fn execute_stream(&self, request: HttpRequest) -> BridgeResult<HttpStreamResponse>;
    }
}

mock! {
    Store {}

    #[async_trait]
    impl SecureStore for Store {
        async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()>;
        async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>>;
        async fn delete_secret(&self, key: &str) -> BridgeResult<()>;
    }
}

fn builder(dir: &Path) -> CoreConfigBuilder {
    let mut store = MockStore::new();
    store.expect_get_secret().returning(|_| Ok(None));

    CoreConfig::builder()
        .server(ServerConfig::new(
            "https://media.example.com",
            ClientIdentity::new("Offline Player", "Tests", "device-1", "0.1.0"),
        ))
        .http_client(Arc::new(MockHttp::new()))
        .file_system(Arc::new(TokioFileSystem::with_directories(
            dir.join("cache"),
            dir.join("data"),
        )))
        .secure_store(Arc::new(store))
}

#[tokio::test]
async fn test_starts_with_in_memory_store() {
    let dir = TempDir::new().unwrap();
    let service = OfflineService::new(builder(dir.path()).build().unwrap())
        .await
        .unwrap();

    let stats = service.cache().statistics().await.unwrap();
    assert_eq!(stats.count, 0);
    assert_eq!(stats.max_bytes, 2048 * 1024 * 1024);
    assert!(dir.path().join("data").join("offline").exists());
    assert!(service.queue().subscribe_jobs().borrow().is_empty());

    service.shutdown().await;
}

#[tokio::test]
async fn test_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let mut config = builder(dir.path()).build().unwrap();
    config.event_buffer_size = 0;

    let err = OfflineService::new(config).await.err().unwrap();
    assert!(matches!(err, CoreError::Runtime(_)));
}

#[tokio::test]
async fn test_cache_cap_comes_from_settings() {
    let dir = TempDir::new().unwrap();
    let settings = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
    settings.set_i64(SETTING_MAX_CACHE_BYTES, 4096).await.unwrap();

    let service = OfflineService::new(
        builder(dir.path())
            .settings_store(settings.clone())
            .build()
            .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(service.cache().max_bytes(), 4096);

    let report = service.set_max_cache_bytes(8192).await.unwrap();
    assert!(report.evicted.is_empty());
    assert_eq!(service.cache().max_bytes(), 8192);
    assert_eq!(
        settings.get_i64(SETTING_MAX_CACHE_BYTES).await.unwrap(),
        Some(8192)
    );

    service.shutdown().await;
}

#[tokio::test]
async fn test_non_positive_cap_setting_is_ignored() {
    let dir = TempDir::new().unwrap();
    let settings = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
    settings.set_i64(SETTING_MAX_CACHE_BYTES, 0).await.unwrap();

    let service = OfflineService::new(
        builder(dir.path())
            .max_cache_bytes(1024)
            .settings_store(settings)
            .build()
            .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(service.cache().max_bytes(), 1024);
    service.shutdown().await;
}

#[tokio::test]
async fn test_interrupted_queue_jobs_fail_on_start() {
    let dir = TempDir::new().unwrap();
    let database_path = dir.path().join("offline.db");

    let pool = create_pool(DatabaseConfig::new(&database_path)).await.unwrap();
    let jobs = SqliteDownloadJobRepository::new(pool);
    let mut job = DownloadJob::new(
        MediaItem::new("song-1", "Song", "Artist"),
        AudioQuality::Original,
        1_700_000_000_000,
    );
    job.status = DownloadStatus::Downloading;
    jobs.insert(&job).await.unwrap();

    let service = OfflineService::new(
        builder(dir.path())
            .database_path(&database_path)
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    let stored = jobs.find_by_id(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DownloadStatus::Failed);
    assert_eq!(stored.error_message.as_deref(), Some("Interrupted"));

    service.shutdown().await;
}

#[tokio::test]
async fn test_low_battery_at_start_raises_pause_cause() {
    let dir = TempDir::new().unwrap();
    let battery = Arc::new(DesktopBatteryMonitor::new());
    battery.update(BatteryState::new(5, false));

    let service = OfflineService::new(
        builder(dir.path())
            .battery_monitor(battery.clone())
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    let controller = service.pause_controller().clone();
    tokio::time::timeout(Duration::from_secs(10), async {
        while controller.active_causes().await != vec![PauseCause::Battery] {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    battery.update(BatteryState::new(5, true));
    tokio::time::timeout(Duration::from_secs(10), async {
        while !controller.active_causes().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    tokio::time::timeout(Duration::from_secs(10), service.shutdown())
        .await
        .unwrap();
}
