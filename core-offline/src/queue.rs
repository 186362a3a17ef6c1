//! # Download Queue Manager
//!
//! Serial FIFO processing of single-asset download jobs.
//!
//! ## Workflow
//!
//! 1. `enqueue` dedups against the cache and live jobs, inserts a Pending row
//! 2. A single spawned worker pops the oldest Pending job, marks it
//!    Downloading and runs the transfer
//! 3. Success stores the asset, deletes the job and triggers an eviction pass;
//!    any failure marks the job Failed. Either way the worker moves on.
//! 4. Failed jobs wait for an explicit `retry`
//!
//! Jobs tagged with a playlist are driven by the playlist orchestrator and
//! never picked up here.

use crate::credentials::CredentialProvider;
use crate::error::{OfflineError, Result};
use crate::transfer::TransferContext;
use core_library::models::{AudioQuality, CachedAsset, DownloadJob, DownloadJobId, DownloadStatus, MediaItem};
use core_runtime::events::{CoreEvent, DownloadEvent};
use futures::stream::{self, BoxStream, StreamExt};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Result of [`DownloadQueue::enqueue`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued(DownloadJobId),
    /// A live job (Pending, Downloading or Failed) already exists
    AlreadyQueued(DownloadJobId),
    AlreadyCached,
}

struct InFlight {
    content_id: String,
    cancel: CancellationToken,
}

struct QueueInner {
    ctx: TransferContext,
    credentials: Arc<dyn CredentialProvider>,
    /// Guards the dedup check and insert of `enqueue`
    enqueue_lock: Mutex<()>,
    draining: AtomicBool,
    busy: watch::Sender<bool>,
    snapshot: watch::Sender<Vec<DownloadJob>>,
    in_flight: std::sync::Mutex<Option<InFlight>>,
}

/// Handle to the download queue; clones share one worker
#[derive(Clone)]
pub struct DownloadQueue {
    inner: Arc<QueueInner>,
}

enum DrainStep {
    Processed,
    Empty,
}

impl DownloadQueue {
    pub fn new(ctx: TransferContext, credentials: Arc<dyn CredentialProvider>) -> Self {
        let (busy, _) = watch::channel(false);
        let (snapshot, _) = watch::channel(Vec::new());

        Self {
            inner: Arc::new(QueueInner {
                ctx,
                credentials,
                enqueue_lock: Mutex::new(()),
                draining: AtomicBool::new(false),
                busy,
                snapshot,
                in_flight: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Queue `item` unless it is already cached or queued
    #[instrument(skip(self, item), fields(content_id = %item.content_id))]
    pub async fn enqueue(&self, item: MediaItem, quality: AudioQuality) -> Result<EnqueueOutcome> {
        item.validate().map_err(|message| OfflineError::InvalidInput {
            field: "item".to_string(),
            message,
        })?;

        let job = {
            let _guard = self.inner.enqueue_lock.lock().await;

            if self.inner.ctx.assets.exists(&item.content_id).await? {
                debug!("Already cached");
                return Ok(EnqueueOutcome::AlreadyCached);
            }
            if let Some(existing) = self
                .inner
                .ctx
                .jobs
                .find_live_by_content_id(&item.content_id)
                .await?
            {
                debug!(job_id = %existing.id, status = %existing.status, "Already queued");
                return Ok(EnqueueOutcome::AlreadyQueued(existing.id));
            }

            let job = DownloadJob::new(item, quality, self.inner.ctx.now());
            self.inner.ctx.jobs.insert(&job).await?;
            job
        };

        info!(job_id = %job.id, "Download queued");
        self.emit(DownloadEvent::Queued {
            job_id: job.id.to_string(),
            content_id: job.content_id().to_string(),
        });
        self.refresh_snapshot().await?;
        self.trigger();

        Ok(EnqueueOutcome::Queued(job.id))
    }

    /// Cancel the live job for a content id.
    ///
    /// Pending and Downloading jobs pass through Cancelled before the row is
    /// removed; a Failed job is simply removed. An in-flight transfer stops at
    /// its next chunk boundary.
    ///
    /// # Returns
    /// `false` when there is no live job, or it belongs to a playlist run
    #[instrument(skip(self))]
    pub async fn cancel(&self, content_id: &str) -> Result<bool> {
        let Some(job) = self.inner.ctx.jobs.find_live_by_content_id(content_id).await? else {
            return Ok(false);
        };
        if job.parent_playlist_id.is_some() {
            debug!(job_id = %job.id, "Job is owned by a playlist run");
            return Ok(false);
        }

        if matches!(job.status, DownloadStatus::Pending | DownloadStatus::Downloading) {
            let moved = self
                .inner
                .ctx
                .jobs
                .update_status(&job.id, job.status, DownloadStatus::Cancelled, None)
                .await?;
            if !moved {
                debug!(job_id = %job.id, "Job changed state while cancelling");
            }
        }

        self.trip_in_flight(content_id);
        self.inner.ctx.jobs.delete(&job.id).await?;

        info!(job_id = %job.id, "Download cancelled");
        self.emit(DownloadEvent::Cancelled {
            job_id: job.id.to_string(),
            content_id: content_id.to_string(),
        });
        self.refresh_snapshot().await?;
        Ok(true)
    }

    /// Put a Failed job back in line
    ///
    /// # Errors
    /// - `NotFound` if the job does not exist
    /// - `InvalidStateTransition` unless the job is Failed
    #[instrument(skip(self))]
    pub async fn retry(&self, job_id: &DownloadJobId) -> Result<()> {
        let job = self
            .inner
            .ctx
            .jobs
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| OfflineError::not_found("DownloadJob", job_id.as_str()))?;

        let reset = job.status == DownloadStatus::Failed
            && self
                .inner
                .ctx
                .jobs
                .update_status(job_id, DownloadStatus::Failed, DownloadStatus::Pending, None)
                .await?;
        if !reset {
            return Err(OfflineError::InvalidStateTransition {
                from: job.status.to_string(),
                to: DownloadStatus::Pending.to_string(),
            });
        }

        info!(retry_count = job.retry_count, "Retrying download");
        self.emit(DownloadEvent::Retried {
            job_id: job_id.to_string(),
            content_id: job.content_id().to_string(),
        });
        self.refresh_snapshot().await?;
        self.trigger();
        Ok(())
    }

    /// Fail queue jobs left Downloading by a previous process, then resume
    /// draining whatever is Pending
    ///
    /// # Returns
    /// Number of jobs marked Failed
    #[instrument(skip(self))]
    pub async fn recover_interrupted(&self) -> Result<u32> {
        let mut recovered = 0;
        for job in self
            .inner
            .ctx
            .jobs
            .find_by_status(DownloadStatus::Downloading)
            .await?
        {
            if job.parent_playlist_id.is_some() {
                continue;
            }
            if self
                .inner
                .ctx
                .jobs
                .update_status(
                    &job.id,
                    DownloadStatus::Downloading,
                    DownloadStatus::Failed,
                    Some("Interrupted"),
                )
                .await?
            {
                recovered += 1;
            }
        }

        if recovered > 0 {
            warn!(recovered, "Marked interrupted downloads as failed");
        }
        self.refresh_snapshot().await?;
        self.trigger();
        Ok(recovered)
    }

    /// Whether the worker is running
    pub fn is_busy(&self) -> bool {
        *self.inner.busy.borrow()
    }

    /// Resolves once the worker has drained the queue
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.busy.subscribe();
        rx.wait_for(|busy| !*busy).await.ok();
    }

    /// Snapshot of every job, republished after each change
    pub fn subscribe_jobs(&self) -> watch::Receiver<Vec<DownloadJob>> {
        self.inner.snapshot.subscribe()
    }

    /// Jobs in one state, emitted on every change of that subset
    pub fn jobs_with_status(&self, status: DownloadStatus) -> BoxStream<'static, Vec<DownloadJob>> {
        distinct_snapshots(self.subscribe_jobs(), move |jobs| {
            jobs.iter().filter(|job| job.status == status).cloned().collect()
        })
    }

    /// Status of the job for `content_id`, `None` when no job row exists
    pub fn status_of(&self, content_id: &str) -> BoxStream<'static, Option<DownloadStatus>> {
        let content_id = content_id.to_string();
        distinct_snapshots(self.subscribe_jobs(), move |jobs| {
            jobs.iter()
                .find(|job| job.content_id() == content_id)
                .map(|job| job.status)
        })
    }

    /// Re-read all jobs into the observable snapshot
    pub async fn refresh_snapshot(&self) -> Result<()> {
        let jobs = self.inner.ctx.jobs.find_all().await?;
        self.inner.snapshot.send_replace(jobs);
        Ok(())
    }

    /// Start the worker unless it is already running
    fn trigger(&self) {
        if self
            .inner
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.inner.busy.send_replace(true);
            let queue = self.clone();
            tokio::spawn(async move { queue.drain().await });
        }
    }

    async fn drain(&self) {
        debug!("Queue worker started");
        loop {
            let healthy = loop {
                match self.process_next().await {
                    Ok(DrainStep::Processed) => continue,
                    Ok(DrainStep::Empty) => break true,
                    Err(e) => {
                        error!(error = %e, "Queue worker stopped on store error");
                        break false;
                    }
                }
            };

            self.inner.draining.store(false, Ordering::Release);

            // An enqueue between the last poll and the flag release saw a busy
            // worker and did not spawn one.
            let more = healthy
                && matches!(self.inner.ctx.jobs.next_pending().await, Ok(Some(_)))
                && self
                    .inner
                    .draining
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok();
            if !more {
                break;
            }
        }

        let draining = &self.inner.draining;
        self.inner
            .busy
            .send_modify(|busy| *busy = draining.load(Ordering::Acquire));
        debug!("Queue worker idle");
    }

    async fn process_next(&self) -> Result<DrainStep> {
        let ctx = &self.inner.ctx;
        let Some(job) = ctx.jobs.next_pending().await? else {
            return Ok(DrainStep::Empty);
        };

        if !ctx
            .jobs
            .update_status(&job.id, DownloadStatus::Pending, DownloadStatus::Downloading, None)
            .await?
        {
            return Ok(DrainStep::Processed);
        }

        info!(job_id = %job.id, content_id = %job.content_id(), "Download started");
        self.emit(DownloadEvent::Started {
            job_id: job.id.to_string(),
            content_id: job.content_id().to_string(),
        });
        self.refresh_snapshot().await?;

        let _files = ctx.cache.begin_transfer(job.content_id()).await;
        let cancel = CancellationToken::new();
        self.set_in_flight(Some(InFlight {
            content_id: job.content_id().to_string(),
            cancel: cancel.clone(),
        }));

        let outcome = AssertUnwindSafe(self.run_job(&job, &cancel))
            .catch_unwind()
            .await;
        self.set_in_flight(None);

        match outcome {
            Ok(Ok(asset)) => self.finish(&job, &asset, &cancel).await?,
            Ok(Err(OfflineError::Cancelled)) => {
                debug!(job_id = %job.id, "Transfer stopped after cancel");
            }
            Ok(Err(e)) => self.fail(&job, &e.to_string()).await?,
            Err(panic) => {
                let fault = OfflineError::UnhandledFault(panic_message(panic.as_ref()));
                self.fail(&job, &fault.to_string()).await?;
            }
        }

        self.refresh_snapshot().await?;
        Ok(DrainStep::Processed)
    }

    async fn run_job(&self, job: &DownloadJob, cancel: &CancellationToken) -> Result<CachedAsset> {
        let credentials = self.inner.credentials.credentials().await?;
        self.inner.ctx.fetch(job, &credentials, cancel).await
    }

    async fn finish(&self, job: &DownloadJob, asset: &CachedAsset, cancel: &CancellationToken) -> Result<()> {
        let ctx = &self.inner.ctx;
        let still_wanted = !cancel.is_cancelled() && ctx.jobs.find_by_id(&job.id).await?.is_some();
        if !still_wanted {
            debug!(job_id = %job.id, "Job cancelled during transfer, discarding");
            ctx.discard(asset).await;
            return Ok(());
        }

        ctx.commit(job, asset).await
    }

    async fn fail(&self, job: &DownloadJob, message: &str) -> Result<()> {
        let moved = self
            .inner
            .ctx
            .jobs
            .update_status(&job.id, DownloadStatus::Downloading, DownloadStatus::Failed, Some(message))
            .await?;
        if !moved {
            return Ok(());
        }

        warn!(job_id = %job.id, content_id = %job.content_id(), error = %message, "Download failed");
        self.emit(DownloadEvent::Failed {
            job_id: job.id.to_string(),
            content_id: job.content_id().to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    fn set_in_flight(&self, value: Option<InFlight>) {
        if let Ok(mut slot) = self.inner.in_flight.lock() {
            *slot = value;
        }
    }

    fn trip_in_flight(&self, content_id: &str) {
        if let Ok(slot) = self.inner.in_flight.lock() {
            if let Some(in_flight) = slot.as_ref().filter(|f| f.content_id == content_id) {
                in_flight.cancel.cancel();
            }
        }
    }

    fn emit(&self, event: DownloadEvent) {
        self.inner.ctx.events.emit(CoreEvent::Download(event)).ok();
    }
}

/// Stream of `project(snapshot)`, skipping values equal to the previous one
fn distinct_snapshots<T, F>(
    rx: watch::Receiver<Vec<DownloadJob>>,
    project: F,
) -> BoxStream<'static, T>
where
    T: Clone + PartialEq + Send + 'static,
    F: Fn(&[DownloadJob]) -> T + Send + Sync + 'static,
{
    stream::unfold(
        (rx, None::<T>, true, project),
        |(mut rx, last, mut first, project)| async move {
            loop {
                if !first && rx.changed().await.is_err() {
                    return None;
                }
                first = false;

                let current = project(rx.borrow_and_update().as_slice());
                if last.as_ref() != Some(&current) {
                    return Some((current.clone(), (rx, Some(current), false, project)));
                }
            }
        },
    )
    .boxed()
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic during transfer".to_string()
    }
}
