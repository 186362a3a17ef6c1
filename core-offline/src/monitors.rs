//! # Device Condition Monitors
//!
//! Battery and thermal observers pause playlist runs while the device is
//! struggling and resume them once every cause has cleared.
//!
//! Each cause is tracked separately: a playlist paused by a low battery stays
//! paused while the device is also overheating. Only playlists paused by the
//! controller itself are resumed; a user pause is never undone.

use crate::error::Result;
use crate::playlist::PlaylistOrchestrator;
use bridge_traits::device::{BatteryMonitor, BatteryState, ThermalMonitor, ThermalSeverity};
use bridge_traits::storage::SettingsStore;
use core_library::models::PlaylistStatus;
use core_library::repositories::PlaylistDownloadRepository;
use core_runtime::config::SETTING_OVERHEAT_PROTECTION;
use core_runtime::events::{CoreEvent, DeviceEvent, EventBus};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PauseCause {
    Battery,
    Thermal,
}

impl PauseCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            PauseCause::Battery => "battery",
            PauseCause::Thermal => "thermal",
        }
    }
}

impl fmt::Display for PauseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pause below `threshold_percent` unless charging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryPolicy {
    pub threshold_percent: u8,
}

impl BatteryPolicy {
    pub fn new(threshold_percent: u8) -> Self {
        Self { threshold_percent }
    }

    pub fn should_pause(&self, state: &BatteryState) -> bool {
        state.percent < self.threshold_percent && !state.charging
    }
}

/// Pause at `Moderate` or hotter while overheat protection is enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThermalPolicy;

impl ThermalPolicy {
    pub fn should_pause(&self, severity: ThermalSeverity, protection_enabled: bool) -> bool {
        protection_enabled && severity >= ThermalSeverity::Moderate
    }
}

#[derive(Default)]
struct PauseState {
    causes: HashSet<PauseCause>,
    paused_by_us: BTreeSet<String>,
}

/// Applies condition changes to playlist runs
pub struct PauseController {
    orchestrator: Arc<PlaylistOrchestrator>,
    playlists: Arc<dyn PlaylistDownloadRepository>,
    events: EventBus,
    state: Mutex<PauseState>,
}

impl PauseController {
    pub fn new(
        orchestrator: Arc<PlaylistOrchestrator>,
        playlists: Arc<dyn PlaylistDownloadRepository>,
        events: EventBus,
    ) -> Self {
        Self {
            orchestrator,
            playlists,
            events,
            state: Mutex::new(PauseState::default()),
        }
    }

    pub async fn active_causes(&self) -> Vec<PauseCause> {
        let state = self.state.lock().await;
        let mut causes: Vec<PauseCause> = state.causes.iter().copied().collect();
        causes.sort_by_key(|cause| cause.as_str());
        causes
    }

    pub async fn update(&self, cause: PauseCause, should_pause: bool) -> Result<()> {
        if should_pause {
            self.raise(cause).await?;
        } else {
            self.clear(cause).await?;
        }
        Ok(())
    }

    /// Record `cause` and pause every Downloading playlist
    ///
    /// # Returns
    /// Playlists paused by this call
    pub async fn raise(&self, cause: PauseCause) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        if !state.causes.insert(cause) {
            return Ok(Vec::new());
        }

        let mut paused = Vec::new();
        for playlist in self.playlists.find_by_status(PlaylistStatus::Downloading).await? {
            match self.orchestrator.pause(&playlist.playlist_id).await {
                Ok(true) => {
                    state.paused_by_us.insert(playlist.playlist_id.clone());
                    paused.push(playlist.playlist_id);
                }
                Ok(false) => {}
                Err(e) => warn!(playlist_id = %playlist.playlist_id, error = %e, "Failed to pause playlist"),
            }
        }

        info!(cause = %cause, paused = paused.len(), "Download pause cause raised");
        self.events
            .emit(CoreEvent::Device(DeviceEvent::PauseCauseRaised {
                cause: cause.to_string(),
                paused_playlists: paused.clone(),
            }))
            .ok();
        Ok(paused)
    }

    /// Drop `cause`; once no cause remains, resume the playlists this
    /// controller paused that are still Paused
    ///
    /// # Returns
    /// Playlists resumed by this call
    pub async fn clear(&self, cause: PauseCause) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        if !state.causes.remove(&cause) {
            return Ok(Vec::new());
        }

        let mut resumed = Vec::new();
        if state.causes.is_empty() {
            for playlist_id in std::mem::take(&mut state.paused_by_us) {
                let still_paused = self
                    .playlists
                    .find_by_id(&playlist_id)
                    .await?
                    .is_some_and(|playlist| playlist.status == PlaylistStatus::Paused);
                if !still_paused {
                    debug!(playlist_id = %playlist_id, "Playlist no longer paused, skipping");
                    continue;
                }
                match self.orchestrator.resume(&playlist_id).await {
                    Ok(_) => resumed.push(playlist_id),
                    Err(e) => warn!(playlist_id = %playlist_id, error = %e, "Failed to resume playlist"),
                }
            }
        } else {
            debug!(cause = %cause, remaining = state.causes.len(), "Other pause causes still active");
        }

        info!(cause = %cause, resumed = resumed.len(), "Download pause cause cleared");
        self.events
            .emit(CoreEvent::Device(DeviceEvent::PauseCauseCleared {
                cause: cause.to_string(),
                resumed_playlists: resumed.clone(),
            }))
            .ok();
        Ok(resumed)
    }
}

/// Feed battery updates into `controller` until `shutdown` fires
pub fn spawn_battery_monitor(
    monitor: Arc<dyn BatteryMonitor>,
    policy: BatteryPolicy,
    controller: Arc<PauseController>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut updates = match monitor.subscribe().await {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "Battery monitor unavailable");
                return;
            }
        };

        let apply = |state: BatteryState| {
            let controller = controller.clone();
            async move {
                if let Err(e) = controller
                    .update(PauseCause::Battery, policy.should_pause(&state))
                    .await
                {
                    warn!(error = %e, "Failed to apply battery state");
                }
            }
        };

        if let Ok(state) = monitor.current_state().await {
            apply(state).await;
        }
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = updates.next() => match next {
                    Some(state) => {
                        debug!(percent = state.percent, charging = state.charging, "Battery update");
                        apply(state).await;
                    }
                    None => break,
                },
            }
        }
        debug!("Battery monitor stopped");
    })
}

/// Feed thermal updates into `controller` until `shutdown` fires.
///
/// Overheat protection is read from settings on every update and counts as
/// enabled when unset or when no settings store is available.
pub fn spawn_thermal_monitor(
    monitor: Arc<dyn ThermalMonitor>,
    settings: Option<Arc<dyn SettingsStore>>,
    controller: Arc<PauseController>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut updates = match monitor.subscribe().await {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "Thermal monitor unavailable");
                return;
            }
        };

        let apply = |severity: ThermalSeverity| {
            let controller = controller.clone();
            let settings = settings.clone();
            async move {
                let enabled = match &settings {
                    Some(settings) => settings
                        .get_bool(SETTING_OVERHEAT_PROTECTION)
                        .await
                        .ok()
                        .flatten()
                        .unwrap_or(true),
                    None => true,
                };
                if let Err(e) = controller
                    .update(PauseCause::Thermal, ThermalPolicy.should_pause(severity, enabled))
                    .await
                {
                    warn!(error = %e, "Failed to apply thermal state");
                }
            }
        };

        if let Ok(severity) = monitor.current_severity().await {
            apply(severity).await;
        }
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = updates.next() => match next {
                    Some(severity) => {
                        debug!(severity = severity.as_str(), "Thermal update");
                        apply(severity).await;
                    }
                    None => break,
                },
            }
        }
        debug!("Thermal monitor stopped");
    })
}
