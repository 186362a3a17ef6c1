//! LRU cache manager

use crate::cache::stats::{CacheStatistics, EvictionReport, OrphanReport};
use crate::error::{OfflineError, Result};
use crate::layout::{path_to_string, remove_if_present, sanitize_file_stem, StorageLayout};
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::Clock;
use core_library::models::CachedAsset;
use core_library::repositories::CachedAssetRepository;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use core_runtime::logging::strip_path;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Enforces the cache cap over [`CachedAsset`] rows and their files.
pub struct CacheManager {
    assets: Arc<dyn CachedAssetRepository>,
    fs: Arc<dyn FileSystemAccess>,
    layout: StorageLayout,
    events: EventBus,
    clock: Arc<dyn Clock>,
    max_bytes: AtomicU64,
    scan_limit: u32,
    /// Serialises eviction passes, bulk deletes and transfer registration
    pass_lock: Mutex<()>,
    in_flight: Arc<StdMutex<HashMap<String, usize>>>,
}

/// Registration of a running transfer.
///
/// While it is alive, orphan reconciliation leaves the content and art files
/// of that content id alone, so hold it from before the first byte is
/// written until the asset row is committed or the files are discarded.
#[must_use = "the transfer is unregistered when the guard is dropped"]
pub struct TransferGuard {
    stem: String,
    in_flight: Arc<StdMutex<HashMap<String, usize>>>,
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(holders) = in_flight.get_mut(&self.stem) {
            *holders -= 1;
            if *holders == 0 {
                in_flight.remove(&self.stem);
            }
        }
    }
}

impl CacheManager {
    pub fn new(
        assets: Arc<dyn CachedAssetRepository>,
        fs: Arc<dyn FileSystemAccess>,
        layout: StorageLayout,
        events: EventBus,
        clock: Arc<dyn Clock>,
        max_bytes: u64,
        scan_limit: u32,
    ) -> Self {
        Self {
            assets,
            fs,
            layout,
            events,
            clock,
            max_bytes: AtomicU64::new(max_bytes),
            scan_limit: scan_limit.max(1),
            pass_lock: Mutex::new(()),
            in_flight: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes.load(Ordering::Acquire)
    }

    /// Change the cap; takes effect on the next pass
    pub fn set_max_bytes(&self, max_bytes: u64) {
        info!(max_bytes, "Cache cap changed");
        self.max_bytes.store(max_bytes, Ordering::Release);
    }

    /// Register a transfer for `content_id`.
    ///
    /// Waits for a running pass to finish, so a reconciliation never sees a
    /// transfer start halfway through.
    pub async fn begin_transfer(&self, content_id: &str) -> TransferGuard {
        let _pass = self.pass_lock.lock().await;
        let stem = sanitize_file_stem(content_id);
        *self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(stem.clone())
            .or_insert(0) += 1;

        TransferGuard {
            stem,
            in_flight: self.in_flight.clone(),
        }
    }

    fn transfers_in_flight(&self) -> HashSet<String> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub async fn statistics(&self) -> Result<CacheStatistics> {
        let totals = self.assets.stats().await?;
        Ok(CacheStatistics::new(
            totals.count,
            totals.total_bytes,
            self.max_bytes(),
        ))
    }

    pub async fn is_cached(&self, asset_id: &str) -> Result<bool> {
        Ok(self.assets.exists(asset_id).await?)
    }

    pub async fn list_assets(&self) -> Result<Vec<CachedAsset>> {
        Ok(self.assets.find_all().await?)
    }

    /// Record a playback access
    pub async fn touch(&self, asset_id: &str) -> Result<()> {
        self.assets
            .touch(asset_id, self.clock.unix_timestamp_millis())
            .await?;
        Ok(())
    }

    /// One bounded least-recently-used eviction pass.
    ///
    /// Examines up to `scan_limit` assets and stops as soon as the freed
    /// bytes cover the excess. Whatever is left over waits for the next pass.
    #[instrument(skip(self))]
    pub async fn evict_if_needed(&self) -> Result<EvictionReport> {
        let _pass = self.pass_lock.lock().await;

        let stats = self.statistics().await?;
        if !stats.is_over_cap() {
            return Ok(EvictionReport::default());
        }

        let excess = stats.excess_bytes();
        debug!(
            total_bytes = stats.total_bytes,
            max_bytes = stats.max_bytes,
            excess,
            "Cache over cap"
        );

        let mut report = EvictionReport::default();
        for asset in self.assets.find_lru(self.scan_limit).await? {
            report.examined += 1;
            if let Err(e) = self.remove_asset(&asset).await {
                error!(asset_id = %asset.id, error = %e, "Failed to evict asset");
                continue;
            }

            report.freed_bytes += asset.total_bytes();
            report.evicted.push(asset.id);
            if report.freed_bytes >= excess {
                break;
            }
        }
        report.still_over_cap = report.freed_bytes < excess;

        if report.still_over_cap {
            warn!(
                examined = report.examined,
                freed_bytes = report.freed_bytes,
                excess,
                "Eviction pass ended over cap"
            );
        } else {
            info!(
                evicted = report.evicted.len(),
                freed_bytes = report.freed_bytes,
                "Eviction pass complete"
            );
        }

        if !report.evicted.is_empty() || report.still_over_cap {
            self.events
                .emit(CoreEvent::Cache(CacheEvent::Evicted {
                    asset_ids: report.evicted.clone(),
                    freed_bytes: report.freed_bytes,
                    still_over_cap: report.still_over_cap,
                }))
                .ok();
        }

        Ok(report)
    }

    /// Delete one asset by id
    ///
    /// # Returns
    /// `false` if no such asset exists
    #[instrument(skip(self))]
    pub async fn delete_asset(&self, asset_id: &str) -> Result<bool> {
        match self.assets.find_by_id(asset_id).await? {
            Some(asset) => {
                self.remove_asset(&asset).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete every asset one at a time
    ///
    /// Not atomic: an interruption leaves a partially cleared cache that a
    /// later call finishes.
    #[instrument(skip(self))]
    pub async fn clear_cache(&self) -> Result<u32> {
        let _pass = self.pass_lock.lock().await;

        let mut removed = 0;
        for asset in self.assets.find_all().await? {
            match self.remove_asset(&asset).await {
                Ok(()) => removed += 1,
                Err(e) => error!(asset_id = %asset.id, error = %e, "Failed to clear asset"),
            }
        }

        info!(removed, "Cleared offline cache");
        self.events
            .emit(CoreEvent::Cache(CacheEvent::Cleared { removed }))
            .ok();
        Ok(removed)
    }

    /// Bring disk and metadata back in agreement.
    ///
    /// Rows whose content file is gone are deleted first, then any file in the
    /// content or art directory that no remaining row references. Files of a
    /// transfer registered with [`begin_transfer`](Self::begin_transfer) are
    /// kept.
    #[instrument(skip(self))]
    pub async fn reconcile_orphans(&self) -> Result<OrphanReport> {
        let _pass = self.pass_lock.lock().await;
        let mut report = OrphanReport::default();

        for asset in self.assets.find_all().await? {
            let present = self
                .fs
                .exists(Path::new(&asset.content_path))
                .await
                .map_err(|e| OfflineError::Storage(e.to_string()))?;
            if !present {
                debug!(asset_id = %asset.id, "Content file missing, dropping row");
                self.remove_asset(&asset).await?;
                report.rows_removed += 1;
            }
        }

        let referenced = self.assets.referenced_paths().await?;
        let in_flight = self.transfers_in_flight();
        for dir in [self.layout.content_dir(), self.layout.art_dir()] {
            let exists = self
                .fs
                .exists(&dir)
                .await
                .map_err(|e| OfflineError::Storage(e.to_string()))?;
            if !exists {
                continue;
            }

            let entries = self
                .fs
                .list_directory(&dir)
                .await
                .map_err(|e| OfflineError::Storage(format!("{}: {}", dir.display(), e)))?;

            for path in entries {
                if referenced.contains(&path_to_string(&path)) {
                    continue;
                }
                let stem = path.file_stem().and_then(|stem| stem.to_str());
                if matches!(stem, Some(stem) if in_flight.contains(stem)) {
                    let file = path_to_string(&path);
                    debug!(file = %strip_path(&file), "Transfer in flight, keeping file");
                    continue;
                }
                match remove_if_present(self.fs.as_ref(), &path).await {
                    Ok(true) => report.files_removed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        let file = path_to_string(&path);
                        warn!(file = %strip_path(&file), error = %e, "Failed to remove orphan")
                    }
                }
            }
        }

        if report.files_removed > 0 || report.rows_removed > 0 {
            info!(
                files = report.files_removed,
                rows = report.rows_removed,
                "Removed orphaned cache entries"
            );
            self.events
                .emit(CoreEvent::Cache(CacheEvent::OrphansRemoved {
                    files: report.files_removed,
                    rows: report.rows_removed,
                }))
                .ok();
        }

        Ok(report)
    }

    /// Remove files (best effort), then the row
    async fn remove_asset(&self, asset: &CachedAsset) -> Result<()> {
        let paths = std::iter::once(asset.content_path.as_str()).chain(asset.art_path.as_deref());
        for path in paths {
            if let Err(e) = remove_if_present(self.fs.as_ref(), Path::new(path)).await {
                warn!(asset_id = %asset.id, file = %strip_path(path), error = %e, "Failed to delete cached file");
            }
        }

        self.assets.delete(&asset.id).await?;
        debug!(asset_id = %asset.id, bytes = asset.total_bytes(), "Removed cached asset");
        Ok(())
    }
}
