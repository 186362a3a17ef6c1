//! Throttled job progress persistence

use crate::downloader::ProgressObserver;
use async_trait::async_trait;
use core_library::models::DownloadJobId;
use core_library::repositories::DownloadJobRepository;
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Bytes between two persisted updates when the whole percent does not move
const PERSIST_EVERY_BYTES: u64 = 1024 * 1024;

#[derive(Default)]
struct Mark {
    percent: Option<u8>,
    bytes: u64,
}

/// Writes job progress to the store and the event bus
///
/// Chunks arrive every few kilobytes; only a change of whole percent or a
/// megabyte of new data is persisted.
pub struct JobProgressReporter {
    jobs: Arc<dyn DownloadJobRepository>,
    events: EventBus,
    job_id: DownloadJobId,
    content_id: String,
    mark: Mutex<Mark>,
}

impl JobProgressReporter {
    pub fn new(
        jobs: Arc<dyn DownloadJobRepository>,
        events: EventBus,
        job_id: DownloadJobId,
        content_id: impl Into<String>,
    ) -> Self {
        Self {
            jobs,
            events,
            job_id,
            content_id: content_id.into(),
            mark: Mutex::new(Mark::default()),
        }
    }

    fn should_publish(&self, percent: u8, bytes: u64) -> bool {
        let Ok(mut mark) = self.mark.lock() else {
            return false;
        };

        let moved = mark.percent != Some(percent)
            || bytes.saturating_sub(mark.bytes) >= PERSIST_EVERY_BYTES;
        if moved {
            mark.percent = Some(percent);
            mark.bytes = bytes;
        }
        moved
    }
}

#[async_trait]
impl ProgressObserver for JobProgressReporter {
    async fn on_progress(&self, fraction: f64, bytes_downloaded: u64, total_bytes: Option<u64>) {
        let percent = (fraction.clamp(0.0, 1.0) * 100.0).floor() as u8;
        if !self.should_publish(percent, bytes_downloaded) {
            return;
        }

        if let Err(e) = self
            .jobs
            .update_progress(&self.job_id, fraction, bytes_downloaded, total_bytes)
            .await
        {
            warn!(job_id = %self.job_id, error = %e, "Failed to persist progress");
        }

        self.events
            .emit(CoreEvent::Download(DownloadEvent::Progress {
                job_id: self.job_id.to_string(),
                content_id: self.content_id.clone(),
                percent,
                bytes_downloaded,
                total_bytes,
            }))
            .ok();
    }
}
