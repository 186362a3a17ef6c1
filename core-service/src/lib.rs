//! Offline service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, filesystem,
//! secure storage, settings, device monitors) into the offline download
//! core. Desktop apps typically enable the `desktop-shims` feature (which
//! depends on `bridge-desktop`) and call [`bootstrap_desktop`].

pub mod error;

pub use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::storage::SettingsStore;
use core_library::db::{create_pool, DatabaseConfig};
use core_library::repositories::{
    SqliteCachedAssetRepository, SqliteDownloadJobRepository, SqliteDownloadPreferenceRepository,
    SqlitePlaylistDownloadRepository, SqlitePlaylistSongRepository,
};
use core_offline::{
    spawn_battery_monitor, spawn_thermal_monitor, BatteryPolicy, CacheManager, DownloadQueue,
    EvictionReport, HttpDownloader, PauseController, PlaylistOrchestrator, SecureStoreCredentials,
    StorageLayout, TransferContext,
};
use core_runtime::config::{CoreConfig, SETTING_MAX_CACHE_BYTES};
use core_runtime::events::{CoreEvent, EventBus};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
pub use desktop::bootstrap_desktop;

/// Primary façade exposed to host applications.
pub struct OfflineService {
    events: EventBus,
    settings: Option<Arc<dyn SettingsStore>>,
    cache: Arc<CacheManager>,
    queue: DownloadQueue,
    orchestrator: Arc<PlaylistOrchestrator>,
    pause_controller: Arc<PauseController>,
    monitor_shutdown: CancellationToken,
    monitor_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl OfflineService {
    /// Open the metadata store, assemble the download core, pick up work
    /// left over from the last run and start the condition monitors.
    pub async fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let database = match &config.database_path {
            Some(path) => DatabaseConfig::new(path),
            None => DatabaseConfig::in_memory(),
        };
        let pool = create_pool(database).await?;

        let max_cache_bytes = match &config.settings_store {
            Some(settings) => cache_cap_override(settings.as_ref())
                .await
                .unwrap_or(config.limits.max_cache_bytes),
            None => config.limits.max_cache_bytes,
        };

        let layout = StorageLayout::resolve(config.file_system.as_ref()).await?;
        layout.ensure_dirs(config.file_system.as_ref()).await?;

        let jobs = Arc::new(SqliteDownloadJobRepository::new(pool.clone()));
        let assets = Arc::new(SqliteCachedAssetRepository::new(pool.clone()));
        let playlists = Arc::new(SqlitePlaylistDownloadRepository::new(pool.clone()));
        let links = Arc::new(SqlitePlaylistSongRepository::new(pool.clone()));
        let preferences = Arc::new(SqliteDownloadPreferenceRepository::new(pool));

        let events = EventBus::new(config.event_buffer_size);
        let downloader = Arc::new(HttpDownloader::new(
            config.http_client.clone(),
            config.file_system.clone(),
            config.server.clone(),
            layout.clone(),
            &config.limits,
        ));
        let cache = Arc::new(CacheManager::new(
            assets.clone(),
            config.file_system.clone(),
            layout.clone(),
            events.clone(),
            config.clock.clone(),
            max_cache_bytes,
            config.limits.eviction_scan_limit,
        ));
        let ctx = TransferContext::new(
            jobs,
            assets,
            downloader,
            cache.clone(),
            config.file_system.clone(),
            events.clone(),
            config.clock.clone(),
        );
        let credentials = Arc::new(SecureStoreCredentials::new(config.secure_store.clone()));

        let queue = DownloadQueue::new(ctx.clone(), credentials.clone());
        let orchestrator = Arc::new(PlaylistOrchestrator::new(
            ctx,
            playlists.clone(),
            links,
            preferences,
            credentials,
            config.network_monitor.clone(),
            layout,
            config.limits.clone(),
        ));
        let pause_controller = Arc::new(PauseController::new(
            orchestrator.clone(),
            playlists,
            events.clone(),
        ));

        match cache.reconcile_orphans().await {
            Ok(report) if report.files_removed > 0 || report.rows_removed > 0 => {
                info!(files = report.files_removed, rows = report.rows_removed, "Removed stale cache entries")
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Cache reconciliation failed"),
        }
        queue.recover_interrupted().await?;
        orchestrator.recover().await?;

        let monitor_shutdown = CancellationToken::new();
        let mut monitor_tasks = Vec::new();
        if let Some(battery) = &config.battery_monitor {
            monitor_tasks.push(spawn_battery_monitor(
                battery.clone(),
                BatteryPolicy::new(config.limits.battery_threshold_percent),
                pause_controller.clone(),
                monitor_shutdown.clone(),
            ));
        }
        if let Some(thermal) = &config.thermal_monitor {
            monitor_tasks.push(spawn_thermal_monitor(
                thermal.clone(),
                config.settings_store.clone(),
                pause_controller.clone(),
                monitor_shutdown.clone(),
            ));
        }

        info!(
            max_cache_bytes,
            monitors = monitor_tasks.len(),
            "Offline service started"
        );

        Ok(Self {
            events,
            settings: config.settings_store,
            cache,
            queue,
            orchestrator,
            pause_controller,
            monitor_shutdown,
            monitor_tasks: Mutex::new(monitor_tasks),
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    pub fn queue(&self) -> &DownloadQueue {
        &self.queue
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn playlists(&self) -> &Arc<PlaylistOrchestrator> {
        &self.orchestrator
    }

    pub fn pause_controller(&self) -> &Arc<PauseController> {
        &self.pause_controller
    }

    /// Change the cache cap, persist it when a settings store is present,
    /// and evict down to it
    pub async fn set_max_cache_bytes(&self, max_bytes: u64) -> Result<EvictionReport> {
        if let Some(settings) = &self.settings {
            let value = i64::try_from(max_bytes).unwrap_or(i64::MAX);
            if let Err(e) = settings.set_i64(SETTING_MAX_CACHE_BYTES, value).await {
                warn!(error = %e, "Failed to persist cache cap");
            }
        }
        self.cache.set_max_bytes(max_bytes);
        Ok(self.cache.evict_if_needed().await?)
    }

    /// Stop the monitors and every playlist run. Playlist rows stay
    /// resumable for the next start.
    pub async fn shutdown(&self) {
        self.monitor_shutdown.cancel();
        let tasks = std::mem::take(&mut *self.monitor_tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Monitor task ended abnormally");
            }
        }
        self.orchestrator.shutdown().await;
        info!("Offline service stopped");
    }
}

/// Positive cache cap stored in settings
async fn cache_cap_override(settings: &dyn SettingsStore) -> Option<u64> {
    match settings.get_i64(SETTING_MAX_CACHE_BYTES).await {
        Ok(Some(value)) if value > 0 => Some(value as u64),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "Failed to read cache cap setting");
            None
        }
    }
}

#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
mod desktop {
    use super::*;
    use bridge_desktop::{
        DesktopBatteryMonitor, DesktopNetworkMonitor, DesktopThermalMonitor, KeyringSecureStore,
        ReqwestHttpClient, SqliteSettingsStore, TokioFileSystem,
    };
    use core_runtime::config::ServerConfig;
    use std::path::PathBuf;

    const DATABASE_FILE: &str = "offline.db";

    /// Convenience bootstrapper for desktop hosts.
    ///
    /// Everything lives under `data_dir`: the SQLite store, the settings and
    /// the offline content. The access token is read from the OS keyring.
    ///
    /// ```no_run
    /// # async fn example() -> core_service::Result<()> {
    /// use core_runtime::config::{ClientIdentity, ServerConfig};
    ///
    /// let server = ServerConfig::new(
    ///     "https://media.example.com",
    ///     ClientIdentity::new("Offline Player", "Desktop", "device-1", "1.0.0"),
    /// );
    /// let service = core_service::bootstrap_desktop("/tmp/offline", server).await?;
    /// let _events = service.subscribe_events();
    /// # Ok(())
    /// # }
    /// ```
    pub async fn bootstrap_desktop(data_dir: impl Into<PathBuf>, server: ServerConfig) -> Result<OfflineService> {
        let data_dir = data_dir.into();
        let database_path = data_dir.join(DATABASE_FILE);

        let file_system = TokioFileSystem::with_directories(data_dir.join("cache"), data_dir.clone());
        let http_client = ReqwestHttpClient::new()
            .map_err(|e| CoreError::InitializationFailed(format!("HTTP client: {}", e)))?;

        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| CoreError::InitializationFailed(format!("{}: {}", data_dir.display(), e)))?;
        let settings_pool = create_pool(DatabaseConfig::new(&database_path)).await?;
        let settings = SqliteSettingsStore::new(settings_pool)
            .await
            .map_err(|e| CoreError::InitializationFailed(format!("settings store: {}", e)))?;

        let config = CoreConfig::builder()
            .database_path(database_path)
            .server(server)
            .http_client(Arc::new(http_client))
            .file_system(Arc::new(file_system))
            .secure_store(Arc::new(KeyringSecureStore::new()))
            .settings_store(Arc::new(settings))
            .network_monitor(Arc::new(DesktopNetworkMonitor::new()))
            .battery_monitor(Arc::new(DesktopBatteryMonitor::new()))
            .thermal_monitor(Arc::new(DesktopThermalMonitor::new()))
            .build()?;

        OfflineService::new(config).await
    }
}
