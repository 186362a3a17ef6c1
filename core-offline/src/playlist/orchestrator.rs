//! Playlist run scheduling and the Validate / Download / Rollup phases

use super::{Backoff, PlaylistRequest, RunHandle, RunOutcome};
use crate::credentials::{CredentialProvider, ServerCredentials};
use crate::error::{OfflineError, Result};
use crate::layout::StorageLayout;
use crate::queue::panic_message;
use crate::transfer::TransferContext;
use bridge_traits::network::NetworkMonitor;
use core_library::models::{
    DownloadJob, DownloadPreference, DownloadStatus, PlaylistDownload, PlaylistPhase, PlaylistSongLink,
    PlaylistStatus, SongLinkStatus,
};
use core_library::repositories::{
    DownloadPreferenceRepository, PlaylistDownloadRepository, PlaylistSongRepository,
};
use core_runtime::config::DownloadLimits;
use core_runtime::events::{CoreEvent, DownloadEvent, PlaylistEvent};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Why a run was asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Paused,
    Cancelled,
    /// A newer `start` for the same playlist
    Replaced,
    Shutdown,
}

impl StopReason {
    fn outcome(self) -> RunOutcome {
        match self {
            StopReason::Paused | StopReason::Shutdown => RunOutcome::Paused,
            StopReason::Cancelled | StopReason::Replaced => RunOutcome::Cancelled,
        }
    }
}

/// Cooperative stop flag of one run; the first reason set wins
#[derive(Clone)]
struct RunControl {
    token: CancellationToken,
    reason: Arc<OnceLock<StopReason>>,
}

impl RunControl {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(OnceLock::new()),
        }
    }

    fn stop(&self, reason: StopReason) {
        self.reason.set(reason).ok();
        self.token.cancel();
    }

    fn stopped(&self) -> Option<StopReason> {
        if self.token.is_cancelled() {
            Some(self.reason.get().copied().unwrap_or(StopReason::Cancelled))
        } else {
            None
        }
    }

    /// Stop reason of a cancelled run
    fn reason(&self) -> StopReason {
        self.reason.get().copied().unwrap_or(StopReason::Cancelled)
    }
}

/// Tracks an active run
struct ActiveRun {
    run_id: u64,
    control: RunControl,
    outcome: watch::Receiver<Option<RunOutcome>>,
}

enum Entry {
    Validate(PlaylistRequest),
    Download,
}

enum PhaseExit {
    Finished,
    Stopped(StopReason),
}

enum PassOutcome {
    Done,
    Stopped,
    RetryLater(String),
}

enum SongOutcome {
    Completed,
    Failed,
    /// A job outside this run owns the song
    Deferred,
    Stopped,
}

/// Drives playlist downloads through Validate, Download and Rollup
pub struct PlaylistOrchestrator {
    ctx: TransferContext,
    playlists: Arc<dyn PlaylistDownloadRepository>,
    links: Arc<dyn PlaylistSongRepository>,
    preferences: Arc<dyn DownloadPreferenceRepository>,
    credentials: Arc<dyn CredentialProvider>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    layout: StorageLayout,
    limits: DownloadLimits,
    backoff: Backoff,
    active_runs: Arc<Mutex<HashMap<String, ActiveRun>>>,
    next_run_id: Arc<AtomicU64>,
}

impl PlaylistOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: TransferContext,
        playlists: Arc<dyn PlaylistDownloadRepository>,
        links: Arc<dyn PlaylistSongRepository>,
        preferences: Arc<dyn DownloadPreferenceRepository>,
        credentials: Arc<dyn CredentialProvider>,
        network_monitor: Option<Arc<dyn NetworkMonitor>>,
        layout: StorageLayout,
        limits: DownloadLimits,
    ) -> Self {
        let backoff = Backoff::new(limits.retry_initial_backoff, limits.retry_max_backoff);
        Self {
            ctx,
            playlists,
            links,
            preferences,
            credentials,
            network_monitor,
            layout,
            limits,
            backoff,
            active_runs: Arc::new(Mutex::new(HashMap::new())),
            next_run_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Start a fresh run, replacing any run for the same playlist
    ///
    /// The returned handle resolves to `ValidationFailed` when storage is
    /// insufficient; in that case nothing is persisted.
    ///
    /// # Errors
    /// `InvalidInput` for an empty or malformed request
    #[instrument(skip(self, request), fields(playlist_id = %request.playlist_id, songs = request.songs.len()))]
    pub async fn start(&self, request: PlaylistRequest) -> Result<RunHandle> {
        request.validate()?;
        let playlist_id = request.playlist_id.clone();
        info!("Starting playlist download");
        Ok(self.launch(&playlist_id, Entry::Validate(request), true).await)
    }

    /// Stop the run and mark the playlist Paused. Song links are untouched.
    ///
    /// # Returns
    /// `true` if the playlist is Paused afterwards
    ///
    /// # Errors
    /// `NotFound` if no run and no playlist row exist
    #[instrument(skip(self))]
    pub async fn pause(&self, playlist_id: &str) -> Result<bool> {
        let stopped = self.stop_run(playlist_id, StopReason::Paused).await.is_some();

        let Some(playlist) = self.playlists.find_by_id(playlist_id).await? else {
            return if stopped {
                Ok(false)
            } else {
                Err(OfflineError::not_found("PlaylistDownload", playlist_id))
            };
        };

        match playlist.status {
            status if status.is_terminal() => Ok(false),
            PlaylistStatus::Paused => Ok(true),
            _ => {
                self.playlists
                    .update_status(playlist_id, PlaylistStatus::Paused, self.ctx.now())
                    .await?;
                info!("Playlist download paused");
                self.emit(PlaylistEvent::Paused {
                    playlist_id: playlist_id.to_string(),
                });
                Ok(true)
            }
        }
    }

    /// Re-enter Phase D with the links that still need work
    ///
    /// Returns the existing handle when a run is already active.
    ///
    /// # Errors
    /// - `NotFound` if the playlist does not exist
    /// - `InvalidStateTransition` if it already reached a final status
    #[instrument(skip(self))]
    pub async fn resume(&self, playlist_id: &str) -> Result<RunHandle> {
        if let Some(handle) = self.running_handle(playlist_id).await {
            return Ok(handle);
        }

        let playlist = self
            .playlists
            .find_by_id(playlist_id)
            .await?
            .ok_or_else(|| OfflineError::not_found("PlaylistDownload", playlist_id))?;
        if playlist.status.is_terminal() {
            return Err(OfflineError::InvalidStateTransition {
                from: playlist.status.to_string(),
                to: PlaylistStatus::Downloading.to_string(),
            });
        }

        let now = self.ctx.now();
        self.playlists
            .update_status(playlist_id, PlaylistStatus::Downloading, now)
            .await?;
        self.playlists
            .set_phase(playlist_id, PlaylistPhase::Download, 0, now)
            .await?;
        for link in self.links.find_remaining(playlist_id).await? {
            if link.status == SongLinkStatus::Downloading {
                self.links
                    .update_status(playlist_id, link.song_id(), SongLinkStatus::Pending)
                    .await?;
            }
        }

        info!("Playlist download resumed");
        self.emit(PlaylistEvent::Resumed {
            playlist_id: playlist_id.to_string(),
        });
        Ok(self.launch(playlist_id, Entry::Download, false).await)
    }

    /// Stop the run, cancel the remaining songs and roll up
    ///
    /// A playlist that already reached a final status is left alone.
    ///
    /// # Errors
    /// `NotFound` if no run and no playlist row exist
    #[instrument(skip(self))]
    pub async fn cancel(&self, playlist_id: &str) -> Result<()> {
        let stopped = self.stop_run(playlist_id, StopReason::Cancelled).await.is_some();

        let Some(playlist) = self.playlists.find_by_id(playlist_id).await? else {
            return if stopped {
                Ok(())
            } else {
                Err(OfflineError::not_found("PlaylistDownload", playlist_id))
            };
        };
        if playlist.status.is_terminal() {
            debug!(status = %playlist.status, "Playlist already finished");
            return Ok(());
        }

        let cancelled = self.links.cancel_remaining(playlist_id).await?;
        self.rollup(playlist_id).await?;

        info!(cancelled, "Playlist download cancelled");
        self.emit(PlaylistEvent::Cancelled {
            playlist_id: playlist_id.to_string(),
        });
        Ok(())
    }

    pub async fn is_running(&self, playlist_id: &str) -> bool {
        self.active_runs.lock().await.contains_key(playlist_id)
    }

    pub async fn status(&self, playlist_id: &str) -> Result<Option<PlaylistDownload>> {
        Ok(self.playlists.find_by_id(playlist_id).await?)
    }

    pub async fn songs(&self, playlist_id: &str) -> Result<Vec<PlaylistSongLink>> {
        Ok(self.links.find_for_playlist(playlist_id).await?)
    }

    /// Let `playlist_id` download on metered networks for `ttl`
    #[instrument(skip(self))]
    pub async fn allow_metered_network(&self, playlist_id: &str, ttl: Duration) -> Result<()> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        self.preferences
            .upsert(&DownloadPreference {
                playlist_id: playlist_id.to_string(),
                allow_metered_network: true,
                expires_at: self.ctx.now().saturating_add(ttl_ms),
            })
            .await?;
        Ok(())
    }

    /// Resume runs interrupted by a previous process
    ///
    /// # Returns
    /// Ids of the playlists resumed
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<Vec<String>> {
        let mut resumed = Vec::new();
        for playlist in self.playlists.find_by_status(PlaylistStatus::Downloading).await? {
            if playlist.phase == PlaylistPhase::Done {
                continue;
            }
            match self.resume(&playlist.playlist_id).await {
                Ok(_) => resumed.push(playlist.playlist_id),
                Err(e) => {
                    error!(playlist_id = %playlist.playlist_id, error = %e, "Failed to recover playlist")
                }
            }
        }
        if !resumed.is_empty() {
            info!(count = resumed.len(), "Recovered interrupted playlist downloads");
        }
        Ok(resumed)
    }

    /// Stop every run, leaving rows resumable by `recover`
    pub async fn shutdown(&self) {
        let runs: Vec<(RunControl, RunHandle)> = {
            let runs = self.active_runs.lock().await;
            runs.values()
                .map(|run| (run.control.clone(), RunHandle::new(run.outcome.clone())))
                .collect()
        };
        for (control, _) in &runs {
            control.stop(StopReason::Shutdown);
        }
        for (_, handle) in runs {
            handle.finished().await;
        }
        debug!("Playlist runs stopped");
    }

    // ------------------------------------------------------------------
    // Run scheduling
    // ------------------------------------------------------------------

    fn clone_for_task(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            playlists: self.playlists.clone(),
            links: self.links.clone(),
            preferences: self.preferences.clone(),
            credentials: self.credentials.clone(),
            network_monitor: self.network_monitor.clone(),
            layout: self.layout.clone(),
            limits: self.limits.clone(),
            backoff: self.backoff,
            active_runs: self.active_runs.clone(),
            next_run_id: self.next_run_id.clone(),
        }
    }

    async fn running_handle(&self, playlist_id: &str) -> Option<RunHandle> {
        let runs = self.active_runs.lock().await;
        runs.get(playlist_id)
            .map(|run| RunHandle::new(run.outcome.clone()))
    }

    /// Register and spawn a run. With `replace`, an active run is stopped and
    /// awaited first; otherwise its handle is returned.
    async fn launch(&self, playlist_id: &str, entry: Entry, replace: bool) -> RunHandle {
        loop {
            let (control, handle) = {
                let mut runs = self.active_runs.lock().await;
                match runs.get(playlist_id) {
                    Some(run) if !replace => return RunHandle::new(run.outcome.clone()),
                    Some(run) => (run.control.clone(), RunHandle::new(run.outcome.clone())),
                    None => {
                        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
                        let control = RunControl::new();
                        let (tx, rx) = watch::channel(None);
                        runs.insert(
                            playlist_id.to_string(),
                            ActiveRun {
                                run_id,
                                control: control.clone(),
                                outcome: rx.clone(),
                            },
                        );

                        let orchestrator = self.clone_for_task();
                        let playlist_id = playlist_id.to_string();
                        tokio::spawn(async move {
                            orchestrator.run(playlist_id, run_id, control, entry, tx).await;
                        });
                        return RunHandle::new(rx);
                    }
                }
            };

            debug!(playlist_id, "Replacing active run");
            control.stop(StopReason::Replaced);
            handle.finished().await;
        }
    }

    /// Stop the active run, if any, and wait for it to end
    async fn stop_run(&self, playlist_id: &str, reason: StopReason) -> Option<RunOutcome> {
        let (control, handle) = {
            let runs = self.active_runs.lock().await;
            let run = runs.get(playlist_id)?;
            (run.control.clone(), RunHandle::new(run.outcome.clone()))
        };
        control.stop(reason);
        Some(handle.finished().await)
    }

    async fn run(
        self,
        playlist_id: String,
        run_id: u64,
        control: RunControl,
        entry: Entry,
        outcome_tx: watch::Sender<Option<RunOutcome>>,
    ) {
        let result = AssertUnwindSafe(self.execute(&playlist_id, &control, entry))
            .catch_unwind()
            .await;
        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(playlist_id = %playlist_id, error = %e, "Playlist run failed");
                RunOutcome::Failed(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(playlist_id = %playlist_id, error = %message, "Playlist run panicked");
                RunOutcome::Failed(message)
            }
        };

        {
            let mut runs = self.active_runs.lock().await;
            if runs.get(&playlist_id).map(|run| run.run_id) == Some(run_id) {
                runs.remove(&playlist_id);
            }
        }
        debug!(playlist_id = %playlist_id, outcome = ?outcome, "Playlist run ended");
        outcome_tx.send_replace(Some(outcome));
    }

    async fn execute(&self, playlist_id: &str, control: &RunControl, entry: Entry) -> Result<RunOutcome> {
        if let Entry::Validate(request) = entry {
            if let Some(outcome) = self.validate(&request, control).await? {
                return Ok(outcome);
            }
        }

        match self.download_all(playlist_id, control).await? {
            PhaseExit::Stopped(reason) => Ok(reason.outcome()),
            PhaseExit::Finished => Ok(RunOutcome::Completed(self.rollup(playlist_id).await?)),
        }
    }

    // ------------------------------------------------------------------
    // Phase V
    // ------------------------------------------------------------------

    /// Admission check, then persist the playlist and its links.
    /// `Some` ends the run.
    async fn validate(&self, request: &PlaylistRequest, control: &RunControl) -> Result<Option<RunOutcome>> {
        let playlist_id = request.playlist_id.as_str();
        self.emit_phase(playlist_id, PlaylistPhase::Validate);

        let reserved = self.links.outstanding_expected_bytes(playlist_id).await?;
        let required = request
            .required_bytes()
            .saturating_add(self.limits.storage_buffer_bytes)
            .saturating_add(reserved);

        let probe = async {
            self.layout.ensure_dirs(self.ctx.fs.as_ref()).await?;
            self.ctx
                .fs
                .available_space(self.layout.root())
                .await
                .map_err(|e| OfflineError::Storage(e.to_string()))
        };
        let available = match probe.await {
            Ok(available) => available,
            Err(e) => {
                warn!(playlist_id, error = %e, "Could not determine free space");
                return Ok(Some(RunOutcome::ValidationFailed(e.to_string())));
            }
        };

        if available <= required {
            let e = OfflineError::StorageInsufficient { required, available };
            warn!(playlist_id, required, available, reserved, "Playlist rejected");
            self.emit(PlaylistEvent::ValidationFailed {
                playlist_id: playlist_id.to_string(),
                required_bytes: required,
                available_bytes: available,
            });
            return Ok(Some(RunOutcome::ValidationFailed(e.to_string())));
        }
        if let Some(reason) = control.stopped() {
            return Ok(Some(reason.outcome()));
        }

        let now = self.ctx.now();
        let mut playlist = PlaylistDownload::new(
            playlist_id,
            request.name.clone(),
            request.songs.len() as u32,
            request.quality,
            now,
        );
        playlist.cover_url = request.cover_url.clone();
        self.playlists.insert(&playlist).await?;

        self.ctx.jobs.delete_by_playlist(playlist_id).await?;
        self.links.delete_for_playlist(playlist_id).await?;
        let links: Vec<PlaylistSongLink> = request
            .songs
            .iter()
            .enumerate()
            .map(|(position, song)| PlaylistSongLink {
                playlist_id: playlist_id.to_string(),
                position: position as u32,
                item: song.item.clone(),
                status: SongLinkStatus::Pending,
                expected_bytes: song.expected_bytes,
            })
            .collect();
        self.links.insert_many(&links).await?;
        self.playlists
            .set_phase(playlist_id, PlaylistPhase::Download, 0, now)
            .await?;

        debug!(playlist_id, songs = links.len(), available, required, "Playlist admitted");
        Ok(None)
    }

    // ------------------------------------------------------------------
    // Phase D
    // ------------------------------------------------------------------

    async fn download_all(&self, playlist_id: &str, control: &RunControl) -> Result<PhaseExit> {
        let mut attempt = self
            .playlists
            .find_by_id(playlist_id)
            .await?
            .map(|playlist| playlist.attempt)
            .unwrap_or(0);

        loop {
            if let Some(reason) = control.stopped() {
                return Ok(PhaseExit::Stopped(reason));
            }

            attempt += 1;
            self.playlists
                .set_phase(playlist_id, PlaylistPhase::Download, attempt, self.ctx.now())
                .await?;
            self.emit_phase(playlist_id, PlaylistPhase::Download);

            let pass = AssertUnwindSafe(self.download_pass(playlist_id, control))
                .catch_unwind()
                .await;
            let reason = match pass {
                Ok(Ok(PassOutcome::Done)) => return Ok(PhaseExit::Finished),
                Ok(Ok(PassOutcome::Stopped)) => return Ok(PhaseExit::Stopped(control.reason())),
                Ok(Ok(PassOutcome::RetryLater(reason))) => reason,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => OfflineError::UnhandledFault(panic_message(panic.as_ref())).to_string(),
            };

            if attempt >= self.limits.max_phase_attempts {
                warn!(playlist_id, attempt, reason = %reason, "Retries exhausted, rolling up");
                return Ok(PhaseExit::Finished);
            }

            let delay = self.backoff.delay(attempt);
            info!(playlist_id, attempt, delay_ms = delay.as_millis() as u64, reason = %reason, "Retrying playlist later");
            self.emit(PlaylistEvent::RetryScheduled {
                playlist_id: playlist_id.to_string(),
                attempt,
                delay_ms: delay.as_millis() as u64,
                reason,
            });

            tokio::select! {
                _ = control.token.cancelled() => return Ok(PhaseExit::Stopped(control.reason())),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn download_pass(&self, playlist_id: &str, control: &RunControl) -> Result<PassOutcome> {
        let now = self.ctx.now();
        if let Err(e) = self.preferences.purge_expired(now).await {
            warn!(error = %e, "Failed to purge expired preferences");
        }

        if let Some(monitor) = &self.network_monitor {
            if monitor.is_metered().await {
                let allowed = self
                    .preferences
                    .find_live(playlist_id, now)
                    .await?
                    .is_some_and(|preference| preference.allow_metered_network);
                if !allowed {
                    return Ok(PassOutcome::RetryLater("metered network".to_string()));
                }
            }
        }

        let credentials = match self.credentials.credentials().await {
            Ok(credentials) => credentials,
            Err(e) => return Ok(PassOutcome::RetryLater(e.to_string())),
        };

        let playlist = self
            .playlists
            .find_by_id(playlist_id)
            .await?
            .ok_or_else(|| OfflineError::not_found("PlaylistDownload", playlist_id))?;
        let total = playlist.total_songs.max(1);

        let mut deferred = 0u32;
        for (i, link) in self.links.find_remaining(playlist_id).await?.iter().enumerate() {
            if control.stopped().is_some() {
                return Ok(PassOutcome::Stopped);
            }
            if i > 0 && !self.limits.inter_song_delay.is_zero() {
                tokio::select! {
                    _ = control.token.cancelled() => return Ok(PassOutcome::Stopped),
                    _ = tokio::time::sleep(self.limits.inter_song_delay) => {}
                }
            }

            self.emit(PlaylistEvent::SongProgress {
                playlist_id: playlist_id.to_string(),
                index: link.position,
                total: playlist.total_songs,
                percent: (link.position.min(total) * 100 / total) as u8,
            });

            match self.download_song(&playlist, link, &credentials, control).await? {
                SongOutcome::Completed | SongOutcome::Failed => {}
                SongOutcome::Deferred => deferred += 1,
                SongOutcome::Stopped => return Ok(PassOutcome::Stopped),
            }

            let counts = self.links.count_by_status(playlist_id).await?;
            self.playlists
                .update_counts(playlist_id, counts.completed, counts.failed, self.ctx.now())
                .await?;
        }

        if deferred > 0 {
            Ok(PassOutcome::RetryLater(format!("{} songs queued elsewhere", deferred)))
        } else {
            Ok(PassOutcome::Done)
        }
    }

    async fn download_song(
        &self,
        playlist: &PlaylistDownload,
        link: &PlaylistSongLink,
        credentials: &ServerCredentials,
        control: &RunControl,
    ) -> Result<SongOutcome> {
        let playlist_id = playlist.playlist_id.as_str();
        let song_id = link.song_id();

        if self.ctx.assets.exists(song_id).await? {
            debug!(playlist_id, song_id, "Song already cached");
            self.links
                .update_status(playlist_id, song_id, SongLinkStatus::Completed)
                .await?;
            return Ok(SongOutcome::Completed);
        }

        if let Some(existing) = self.ctx.jobs.find_live_by_content_id(song_id).await? {
            if existing.parent_playlist_id.as_deref() != Some(playlist_id) {
                debug!(playlist_id, song_id, job_id = %existing.id, "Song owned by another job");
                return Ok(SongOutcome::Deferred);
            }
            self.ctx.jobs.delete(&existing.id).await?;
        }

        let job = DownloadJob::new(link.item.clone(), playlist.quality, self.ctx.now())
            .for_playlist(playlist_id, link.position);
        self.ctx.jobs.insert(&job).await?;
        self.ctx
            .jobs
            .update_status(&job.id, DownloadStatus::Pending, DownloadStatus::Downloading, None)
            .await?;
        self.links
            .update_status(playlist_id, song_id, SongLinkStatus::Downloading)
            .await?;
        self.ctx
            .events
            .emit(CoreEvent::Download(DownloadEvent::Started {
                job_id: job.id.to_string(),
                content_id: song_id.to_string(),
            }))
            .ok();

        let _files = self.ctx.cache.begin_transfer(song_id).await;
        match self.ctx.fetch(&job, credentials, &control.token).await {
            Ok(asset) => {
                self.ctx.commit(&job, &asset).await?;
                self.links
                    .update_status(playlist_id, song_id, SongLinkStatus::Completed)
                    .await?;
                Ok(SongOutcome::Completed)
            }
            Err(OfflineError::Cancelled) => {
                self.ctx.jobs.delete(&job.id).await?;
                self.links
                    .update_status(playlist_id, song_id, SongLinkStatus::Pending)
                    .await?;
                Ok(SongOutcome::Stopped)
            }
            Err(e) if e.is_transfer_failure() => {
                let message = e.to_string();
                warn!(playlist_id, song_id, error = %message, "Playlist song failed");
                self.ctx
                    .jobs
                    .update_status(
                        &job.id,
                        DownloadStatus::Downloading,
                        DownloadStatus::Failed,
                        Some(&message),
                    )
                    .await?;
                self.links
                    .update_status(playlist_id, song_id, SongLinkStatus::Failed)
                    .await?;
                self.ctx
                    .events
                    .emit(CoreEvent::Download(DownloadEvent::Failed {
                        job_id: job.id.to_string(),
                        content_id: song_id.to_string(),
                        message,
                    }))
                    .ok();
                Ok(SongOutcome::Failed)
            }
            Err(e) => {
                self.ctx.jobs.delete(&job.id).await.ok();
                self.links
                    .update_status(playlist_id, song_id, SongLinkStatus::Pending)
                    .await
                    .ok();
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Phase R
    // ------------------------------------------------------------------

    async fn rollup(&self, playlist_id: &str) -> Result<PlaylistStatus> {
        let attempt = self
            .playlists
            .find_by_id(playlist_id)
            .await?
            .map(|playlist| playlist.attempt)
            .unwrap_or(0);
        let now = self.ctx.now();
        self.playlists
            .set_phase(playlist_id, PlaylistPhase::Rollup, attempt, now)
            .await?;
        self.emit_phase(playlist_id, PlaylistPhase::Rollup);

        let counts = self.links.count_by_status(playlist_id).await?;
        let total = counts.total();
        let status = PlaylistStatus::from_counts(counts.completed, counts.failed, total);

        self.playlists
            .update_counts(playlist_id, counts.completed, counts.failed, now)
            .await?;
        self.playlists.update_status(playlist_id, status, now).await?;
        let leftover = self.ctx.jobs.delete_by_playlist(playlist_id).await?;
        self.playlists
            .set_phase(playlist_id, PlaylistPhase::Done, attempt, now)
            .await?;

        info!(
            playlist_id,
            status = %status,
            downloaded = counts.completed,
            failed = counts.failed,
            total,
            leftover,
            "Playlist download finished"
        );
        self.emit(PlaylistEvent::Completed {
            playlist_id: playlist_id.to_string(),
            status: status.to_string(),
            downloaded: counts.completed,
            failed: counts.failed,
            total,
        });
        Ok(status)
    }

    fn emit_phase(&self, playlist_id: &str, phase: PlaylistPhase) {
        self.emit(PlaylistEvent::PhaseChanged {
            playlist_id: playlist_id.to_string(),
            phase: phase.to_string(),
        });
    }

    fn emit(&self, event: PlaylistEvent) {
        self.ctx.events.emit(CoreEvent::Playlist(event)).ok();
    }
}
