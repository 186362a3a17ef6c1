mod common;

use bridge_desktop::{DesktopBatteryMonitor, DesktopThermalMonitor, SqliteSettingsStore};
use bridge_traits::device::{BatteryState, ThermalSeverity};
use bridge_traits::storage::SettingsStore;
use common::{fast_limits, wait_for_download_phase, within, Harness, MB};
use core_library::models::{AudioQuality, MediaItem, PlaylistStatus};
use core_library::repositories::PlaylistDownloadRepository;
use core_offline::{
    spawn_battery_monitor, spawn_thermal_monitor, BatteryPolicy, PauseCause, PauseController,
    PlaylistRequest, RunOutcome,
};
use core_runtime::config::SETTING_OVERHEAT_PROTECTION;
use core_runtime::events::{CoreEvent, DeviceEvent};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

fn request(playlist_id: &str) -> PlaylistRequest {
    PlaylistRequest::new(playlist_id, "Mix", AudioQuality::Original)
        .with_song(MediaItem::new(format!("{}-1", playlist_id), "One", "Artist"), MB)
        .with_song(MediaItem::new(format!("{}-2", playlist_id), "Two", "Artist"), MB)
}

fn controller(h: &Harness) -> Arc<PauseController> {
    Arc::new(PauseController::new(
        h.orchestrator.clone(),
        h.playlists.clone(),
        h.events.clone(),
    ))
}

async fn status(h: &Harness, playlist_id: &str) -> PlaylistStatus {
    h.playlists.find_by_id(playlist_id).await.unwrap().unwrap().status
}

async fn wait_for_device_event(rx: &mut broadcast::Receiver<CoreEvent>) -> DeviceEvent {
    within(async {
        loop {
            if let Ok(CoreEvent::Device(event)) = rx.recv().await {
                return event;
            }
        }
    })
    .await
}

#[tokio::test]
async fn test_resume_waits_for_every_cause() {
    let h = Harness::new(fast_limits()).await;
    let gate = h.downloader.close_gate(0);
    let controller = controller(&h);
    let mut rx = h.events.subscribe();

    let handle = h.orchestrator.start(request("pl")).await.unwrap();
    wait_for_download_phase(&mut rx, "pl").await;

    assert_eq!(controller.raise(PauseCause::Battery).await.unwrap(), vec!["pl"]);
    assert_eq!(within(handle.finished()).await, RunOutcome::Paused);
    assert_eq!(status(&h, "pl").await, PlaylistStatus::Paused);

    // Raising an active cause again is a no-op
    assert!(controller.raise(PauseCause::Battery).await.unwrap().is_empty());
    assert!(controller.raise(PauseCause::Thermal).await.unwrap().is_empty());

    assert!(controller.clear(PauseCause::Battery).await.unwrap().is_empty());
    assert_eq!(status(&h, "pl").await, PlaylistStatus::Paused);
    assert_eq!(controller.active_causes().await, vec![PauseCause::Thermal]);

    assert_eq!(controller.clear(PauseCause::Thermal).await.unwrap(), vec!["pl"]);
    let resumed = h.orchestrator.resume("pl").await.unwrap();
    gate.add_permits(10);
    assert_eq!(within(resumed.finished()).await, RunOutcome::Completed(PlaylistStatus::Full));
}

#[tokio::test]
async fn test_user_pause_is_not_undone() {
    let h = Harness::new(fast_limits()).await;
    let _gate = h.downloader.close_gate(0);
    let controller = controller(&h);
    let mut rx = h.events.subscribe();

    h.orchestrator.start(request("mine")).await.unwrap();
    wait_for_download_phase(&mut rx, "mine").await;
    assert!(h.orchestrator.pause("mine").await.unwrap());

    assert!(controller.raise(PauseCause::Battery).await.unwrap().is_empty());
    assert!(controller.clear(PauseCause::Battery).await.unwrap().is_empty());
    assert_eq!(status(&h, "mine").await, PlaylistStatus::Paused);
    assert!(!h.orchestrator.is_running("mine").await);
}

#[tokio::test]
async fn test_battery_monitor_drives_controller() {
    let h = Harness::new(fast_limits()).await;
    let _gate = h.downloader.close_gate(0);
    let controller = controller(&h);
    let mut rx = h.events.subscribe();

    h.orchestrator.start(request("pl")).await.unwrap();
    wait_for_download_phase(&mut rx, "pl").await;

    let battery = Arc::new(DesktopBatteryMonitor::new());
    let shutdown = CancellationToken::new();
    let task = spawn_battery_monitor(battery.clone(), BatteryPolicy::new(15), controller.clone(), shutdown.clone());

    battery.update(BatteryState::new(10, false));
    match wait_for_device_event(&mut rx).await {
        DeviceEvent::PauseCauseRaised { cause, paused_playlists } => {
            assert_eq!(cause, "battery");
            assert_eq!(paused_playlists, vec!["pl"]);
        }
        other => panic!("unexpected event {:?}", other),
    }

    battery.update(BatteryState::new(10, true));
    match wait_for_device_event(&mut rx).await {
        DeviceEvent::PauseCauseCleared { resumed_playlists, .. } => {
            assert_eq!(resumed_playlists, vec!["pl"]);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(h.orchestrator.is_running("pl").await);

    shutdown.cancel();
    within(task).await.unwrap();
    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_thermal_monitor_respects_setting() {
    let h = Harness::new(fast_limits()).await;
    let controller = controller(&h);
    let settings = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
    settings.set_bool(SETTING_OVERHEAT_PROTECTION, false).await.unwrap();
    let mut rx = h.events.subscribe();

    let thermal = Arc::new(DesktopThermalMonitor::new());
    let shutdown = CancellationToken::new();
    let task = spawn_thermal_monitor(
        thermal.clone(),
        Some(settings.clone() as Arc<dyn SettingsStore>),
        controller.clone(),
        shutdown.clone(),
    );

    thermal.update(ThermalSeverity::Severe);
    settings.set_bool(SETTING_OVERHEAT_PROTECTION, true).await.unwrap();
    thermal.update(ThermalSeverity::Critical);

    match wait_for_device_event(&mut rx).await {
        DeviceEvent::PauseCauseRaised { cause, .. } => assert_eq!(cause, "thermal"),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(controller.active_causes().await, vec![PauseCause::Thermal]);

    shutdown.cancel();
    within(task).await.unwrap();
}
