//! Shared fixtures for the offline integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::network::NetworkMonitor;
use bridge_traits::storage::{FileMetadata, FileSystemAccess};
use bridge_traits::time::Clock;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use core_library::db::create_test_pool;
use core_library::models::AudioQuality;
use core_library::repositories::{
    SqliteCachedAssetRepository, SqliteDownloadJobRepository, SqliteDownloadPreferenceRepository,
    SqlitePlaylistDownloadRepository, SqlitePlaylistSongRepository,
};
use core_offline::{
    CacheManager, CredentialProvider, DownloadQueue, DownloadedArt, DownloadedAsset, Downloader,
    OfflineError, PlaylistOrchestrator, ProgressObserver, ServerCredentials, StorageLayout,
    TransferContext,
};
use core_runtime::config::DownloadLimits;
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus, PlaylistEvent};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;

pub const MB: u64 = 1024 * 1024;

/// Limits with no pacing and millisecond backoff
pub fn fast_limits() -> DownloadLimits {
    DownloadLimits {
        max_cache_bytes: 10_000 * MB,
        storage_buffer_bytes: 500 * MB,
        inter_song_delay: Duration::ZERO,
        retry_initial_backoff: Duration::from_millis(5),
        retry_max_backoff: Duration::from_millis(20),
        max_phase_attempts: 3,
        ..DownloadLimits::default()
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Every reading is one millisecond after the previous one
pub struct StepClock {
    next: AtomicI64,
}

impl StepClock {
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(1_700_000_000_000),
        }
    }
}

impl Clock for StepClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.next.fetch_add(1, Ordering::SeqCst);
        Utc.timestamp_millis_opt(millis).unwrap()
    }
}

// ---------------------------------------------------------------------------
// File system with a controllable free-space probe
// ---------------------------------------------------------------------------

pub struct SpaceFs {
    inner: TokioFileSystem,
    available: AtomicU64,
}

impl SpaceFs {
    pub fn new(root: &Path) -> Self {
        Self {
            inner: TokioFileSystem::with_directories(root.join("cache"), root.join("data")),
            available: AtomicU64::new(1_000_000 * MB),
        }
    }

    pub fn set_available(&self, bytes: u64) {
        self.available.store(bytes, Ordering::SeqCst);
    }
}

#[async_trait]
impl FileSystemAccess for SpaceFs {
    async fn get_cache_directory(&self) -> BridgeResult<PathBuf> {
        self.inner.get_cache_directory().await
    }

    async fn get_data_directory(&self) -> BridgeResult<PathBuf> {
        self.inner.get_data_directory().await
    }

    async fn exists(&self, path: &Path) -> BridgeResult<bool> {
        self.inner.exists(path).await
    }

    async fn metadata(&self, path: &Path) -> BridgeResult<FileMetadata> {
        self.inner.metadata(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> BridgeResult<()> {
        self.inner.create_dir_all(path).await
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> BridgeResult<()> {
        self.inner.write_file(path, data).await
    }

    async fn delete_file(&self, path: &Path) -> BridgeResult<()> {
        self.inner.delete_file(path).await
    }

    async fn list_directory(&self, path: &Path) -> BridgeResult<Vec<PathBuf>> {
        self.inner.list_directory(path).await
    }

    async fn open_write_stream(
        &self,
        path: &Path,
    ) -> BridgeResult<Box<dyn tokio::io::AsyncWrite + Send + Unpin>> {
        self.inner.open_write_stream(path).await
    }

    async fn available_space(&self, _path: &Path) -> BridgeResult<u64> {
        Ok(self.available.load(Ordering::SeqCst))
    }
}

// ---------------------------------------------------------------------------
// Downloader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Succeed, reporting this many content bytes
    Succeed(u64),
    Fail,
    Panic,
}

/// Writes a tiny placeholder file and reports the configured size.
///
/// With a gate installed every transfer waits for a permit, or for its
/// cancel token.
pub struct FakeDownloader {
    fs: Arc<SpaceFs>,
    layout: StorageLayout,
    behaviours: Mutex<HashMap<String, Behaviour>>,
    default_bytes: u64,
    gate: Mutex<Option<Arc<Semaphore>>>,
    attempts: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
}

impl FakeDownloader {
    pub fn new(fs: Arc<SpaceFs>, layout: StorageLayout) -> Self {
        Self {
            fs,
            layout,
            behaviours: Mutex::new(HashMap::new()),
            default_bytes: MB,
            gate: Mutex::new(None),
            attempts: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, content_id: &str, behaviour: Behaviour) {
        self.behaviours
            .lock()
            .unwrap()
            .insert(content_id.to_string(), behaviour);
    }

    /// Hold transfers until permits are added
    pub fn close_gate(&self, permits: usize) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(permits));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    fn behaviour(&self, content_id: &str) -> Behaviour {
        self.behaviours
            .lock()
            .unwrap()
            .get(content_id)
            .copied()
            .unwrap_or(Behaviour::Succeed(self.default_bytes))
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download_asset(
        &self,
        content_id: &str,
        _quality: AudioQuality,
        _credentials: &ServerCredentials,
        progress: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> core_offline::Result<DownloadedAsset> {
        self.attempts.lock().unwrap().push(content_id.to_string());
        let path = self.layout.content_path(content_id, "mp3");

        // A held transfer leaves a partial file on disk, like a real stream
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.fs.write_file(&path, Bytes::from_static(b"partial")).await.unwrap();
            let opened = tokio::select! {
                _ = cancel.cancelled() => false,
                permit = gate.acquire() => {
                    permit.unwrap().forget();
                    true
                }
            };
            if !opened || cancel.is_cancelled() {
                let _ = self.fs.delete_file(&path).await;
                return Err(OfflineError::Cancelled);
            }
        }
        if cancel.is_cancelled() {
            return Err(OfflineError::Cancelled);
        }

        let bytes = match self.behaviour(content_id) {
            Behaviour::Succeed(bytes) => bytes,
            Behaviour::Fail => {
                let _ = self.fs.delete_file(&path).await;
                return Err(OfflineError::NonSuccessStatus { status: 503 });
            }
            Behaviour::Panic => panic!("transfer blew up for {}", content_id),
        };

        self.fs
            .write_file(&path, Bytes::from(content_id.to_string()))
            .await
            .map_err(|e| OfflineError::Storage(e.to_string()))?;
        progress.on_progress(1.0, bytes, Some(bytes)).await;

        self.completed.lock().unwrap().push(content_id.to_string());
        Ok(DownloadedAsset {
            path,
            bytes,
            format: "mp3".to_string(),
        })
    }

    async fn download_art(
        &self,
        _content_id: &str,
        _image_tag: Option<&str>,
        _credentials: &ServerCredentials,
    ) -> Option<DownloadedArt> {
        None
    }
}

pub struct FakeCredentials;

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn credentials(&self) -> core_offline::Result<ServerCredentials> {
        Ok(ServerCredentials::new("test-token"))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub dir: TempDir,
    pub fs: Arc<SpaceFs>,
    pub layout: StorageLayout,
    pub events: EventBus,
    pub downloader: Arc<FakeDownloader>,
    pub jobs: Arc<SqliteDownloadJobRepository>,
    pub assets: Arc<SqliteCachedAssetRepository>,
    pub playlists: Arc<SqlitePlaylistDownloadRepository>,
    pub links: Arc<SqlitePlaylistSongRepository>,
    pub preferences: Arc<SqliteDownloadPreferenceRepository>,
    pub cache: Arc<CacheManager>,
    pub queue: DownloadQueue,
    pub orchestrator: Arc<PlaylistOrchestrator>,
}

impl Harness {
    pub async fn new(limits: DownloadLimits) -> Self {
        Self::with_network(limits, None).await
    }

    pub async fn with_network(
        limits: DownloadLimits,
        network_monitor: Option<Arc<dyn NetworkMonitor>>,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let fs = Arc::new(SpaceFs::new(dir.path()));
        let layout = StorageLayout::new(dir.path().join("offline"));
        layout.ensure_dirs(fs.as_ref()).await.unwrap();

        let pool = create_test_pool().await.unwrap();
        let jobs = Arc::new(SqliteDownloadJobRepository::new(pool.clone()));
        let assets = Arc::new(SqliteCachedAssetRepository::new(pool.clone()));
        let playlists = Arc::new(SqlitePlaylistDownloadRepository::new(pool.clone()));
        let links = Arc::new(SqlitePlaylistSongRepository::new(pool.clone()));
        let preferences = Arc::new(SqliteDownloadPreferenceRepository::new(pool));

        let events = EventBus::new(4096);
        let clock: Arc<dyn Clock> = Arc::new(StepClock::new());
        let downloader = Arc::new(FakeDownloader::new(fs.clone(), layout.clone()));

        let cache = Arc::new(CacheManager::new(
            assets.clone(),
            fs.clone(),
            layout.clone(),
            events.clone(),
            clock.clone(),
            limits.max_cache_bytes,
            limits.eviction_scan_limit,
        ));
        let ctx = TransferContext::new(
            jobs.clone(),
            assets.clone(),
            downloader.clone(),
            cache.clone(),
            fs.clone(),
            events.clone(),
            clock,
        );
        let credentials: Arc<dyn CredentialProvider> = Arc::new(FakeCredentials);
        let queue = DownloadQueue::new(ctx.clone(), credentials.clone());
        let orchestrator = Arc::new(PlaylistOrchestrator::new(
            ctx,
            playlists.clone(),
            links.clone(),
            preferences.clone(),
            credentials,
            network_monitor,
            layout.clone(),
            limits,
        ));

        Self {
            dir,
            fs,
            layout,
            events,
            downloader,
            jobs,
            assets,
            playlists,
            links,
            preferences,
            cache,
            queue,
            orchestrator,
        }
    }
}

// ---------------------------------------------------------------------------
// Event helpers
// ---------------------------------------------------------------------------

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("timed out")
}

/// Wait until `count` download completions have been published
pub async fn wait_for_completions(rx: &mut broadcast::Receiver<CoreEvent>, count: usize) {
    let mut seen = 0;
    within(async {
        while seen < count {
            if let Ok(CoreEvent::Download(DownloadEvent::Completed { .. })) = rx.recv().await {
                seen += 1;
            }
        }
    })
    .await
}

/// Wait until `playlist_id` has entered its download phase
pub async fn wait_for_download_phase(rx: &mut broadcast::Receiver<CoreEvent>, playlist_id: &str) {
    within(async {
        loop {
            if let Ok(CoreEvent::Playlist(PlaylistEvent::PhaseChanged { playlist_id: id, phase })) =
                rx.recv().await
            {
                if id == playlist_id && phase == "download" {
                    return;
                }
            }
        }
    })
    .await
}

pub fn drain_events(rx: &mut broadcast::Receiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
