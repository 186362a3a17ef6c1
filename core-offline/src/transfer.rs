//! Shared job execution used by the queue and playlist runs

use crate::cache::CacheManager;
use crate::credentials::ServerCredentials;
use crate::downloader::{build_cached_asset, Downloader};
use crate::error::Result;
use crate::layout::remove_if_present;
use crate::progress::JobProgressReporter;
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::Clock;
use core_library::models::{CachedAsset, DownloadJob};
use core_library::repositories::{CachedAssetRepository, DownloadJobRepository};
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Everything needed to turn a Downloading job into a cached asset
#[derive(Clone)]
pub struct TransferContext {
    pub(crate) jobs: Arc<dyn DownloadJobRepository>,
    pub(crate) assets: Arc<dyn CachedAssetRepository>,
    pub(crate) downloader: Arc<dyn Downloader>,
    pub(crate) cache: Arc<CacheManager>,
    pub(crate) fs: Arc<dyn FileSystemAccess>,
    pub(crate) events: EventBus,
    pub(crate) clock: Arc<dyn Clock>,
}

impl TransferContext {
    pub fn new(
        jobs: Arc<dyn DownloadJobRepository>,
        assets: Arc<dyn CachedAssetRepository>,
        downloader: Arc<dyn Downloader>,
        cache: Arc<CacheManager>,
        fs: Arc<dyn FileSystemAccess>,
        events: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            jobs,
            assets,
            downloader,
            cache,
            fs,
            events,
            clock,
        }
    }

    pub fn now(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    /// Content, then best-effort art
    pub(crate) async fn fetch(
        &self,
        job: &DownloadJob,
        credentials: &ServerCredentials,
        cancel: &CancellationToken,
    ) -> Result<CachedAsset> {
        let reporter = JobProgressReporter::new(
            self.jobs.clone(),
            self.events.clone(),
            job.id.clone(),
            job.content_id(),
        );

        let content = self
            .downloader
            .download_asset(job.content_id(), job.quality, credentials, &reporter, cancel)
            .await?;
        let art = self
            .downloader
            .download_art(job.content_id(), job.item.image_tag.as_deref(), credentials)
            .await;

        Ok(build_cached_asset(
            &job.item,
            job.quality,
            &content,
            art.as_ref(),
            self.now(),
        ))
    }

    /// Persist the asset, drop the job row, then run an eviction pass
    pub(crate) async fn commit(&self, job: &DownloadJob, asset: &CachedAsset) -> Result<()> {
        self.assets.upsert(asset).await?;
        self.jobs.delete(&job.id).await?;

        info!(
            job_id = %job.id,
            content_id = %job.content_id(),
            bytes = asset.total_bytes(),
            "Download completed"
        );
        self.events
            .emit(CoreEvent::Download(DownloadEvent::Completed {
                job_id: job.id.to_string(),
                content_id: job.content_id().to_string(),
                bytes: asset.total_bytes(),
            }))
            .ok();

        if let Err(e) = self.cache.evict_if_needed().await {
            error!(error = %e, "Eviction pass failed");
        }
        Ok(())
    }

    /// Remove the files of a download that will not be committed
    pub(crate) async fn discard(&self, asset: &CachedAsset) {
        let paths = std::iter::once(asset.content_path.as_str()).chain(asset.art_path.as_deref());
        for path in paths {
            if let Err(e) = remove_if_present(self.fs.as_ref(), Path::new(path)).await {
                warn!(path = %path, error = %e, "Failed to discard downloaded file");
            }
        }
    }
}
