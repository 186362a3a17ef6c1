mod common;

use bridge_desktop::DesktopNetworkMonitor;
use bridge_traits::network::{NetworkInfo, NetworkMonitor};
use common::{fast_limits, wait_for_completions, wait_for_download_phase, within, Behaviour, Harness, MB};
use core_library::models::{
    AudioQuality, DownloadStatus, MediaItem, PlaylistDownload, PlaylistPhase, PlaylistSongLink,
    PlaylistStatus, SongLinkStatus,
};
use core_library::repositories::{
    CachedAssetRepository, DownloadJobRepository, PlaylistDownloadRepository, PlaylistSongRepository,
};
use core_offline::{OfflineError, PlaylistRequest, RunOutcome};
use core_runtime::events::{CoreEvent, PlaylistEvent};
use std::sync::Arc;
use std::time::Duration;

fn request(playlist_id: &str, songs: &[&str]) -> PlaylistRequest {
    songs.iter().fold(
        PlaylistRequest::new(playlist_id, "Road Trip", AudioQuality::High),
        |request, id| request.with_song(MediaItem::new(*id, format!("Song {}", id), "Artist"), 10 * MB),
    )
}

async fn playlist(h: &Harness, playlist_id: &str) -> PlaylistDownload {
    h.playlists.find_by_id(playlist_id).await.unwrap().unwrap()
}

async fn link_statuses(h: &Harness, playlist_id: &str) -> Vec<SongLinkStatus> {
    h.links
        .find_for_playlist(playlist_id)
        .await
        .unwrap()
        .into_iter()
        .map(|link| link.status)
        .collect()
}

#[tokio::test]
async fn test_full_run() {
    let h = Harness::new(fast_limits()).await;
    let mut rx = h.events.subscribe();

    let handle = h.orchestrator.start(request("pl", &["a", "b", "c"])).await.unwrap();
    assert_eq!(within(handle.finished()).await, RunOutcome::Completed(PlaylistStatus::Full));

    let row = playlist(&h, "pl").await;
    assert_eq!(row.status, PlaylistStatus::Full);
    assert_eq!(row.phase, PlaylistPhase::Done);
    assert_eq!((row.downloaded_count, row.failed_count, row.total_songs), (3, 0, 3));
    assert_eq!(row.quality, AudioQuality::High);
    assert_eq!(link_statuses(&h, "pl").await, vec![SongLinkStatus::Completed; 3]);
    assert!(h.jobs.find_all().await.unwrap().is_empty());
    assert_eq!(h.downloader.completed(), vec!["a", "b", "c"]);
    assert!(!h.orchestrator.is_running("pl").await);

    let events = common::drain_events(&mut rx);
    let progress: Vec<(u32, u8)> = events
        .iter()
        .filter_map(|e| match e {
            CoreEvent::Playlist(PlaylistEvent::SongProgress { index, percent, .. }) => Some((*index, *percent)),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![(0, 0), (1, 33), (2, 66)]);
    assert!(events.iter().any(|e| matches!(
        e,
        CoreEvent::Playlist(PlaylistEvent::Completed { status, downloaded: 3, failed: 0, total: 3, .. })
            if status == "full"
    )));
}

#[tokio::test]
async fn test_partial_and_cancelled_rollups() {
    let h = Harness::new(fast_limits()).await;
    h.downloader.set("b", Behaviour::Fail);

    let handle = h.orchestrator.start(request("mixed", &["a", "b"])).await.unwrap();
    assert_eq!(within(handle.finished()).await, RunOutcome::Completed(PlaylistStatus::Partial));
    let row = playlist(&h, "mixed").await;
    assert_eq!((row.downloaded_count, row.failed_count), (1, 1));
    assert_eq!(
        link_statuses(&h, "mixed").await,
        vec![SongLinkStatus::Completed, SongLinkStatus::Failed]
    );
    assert!(h.jobs.find_all().await.unwrap().is_empty());

    h.downloader.set("x", Behaviour::Fail);
    let handle = h.orchestrator.start(request("broken", &["x"])).await.unwrap();
    assert_eq!(within(handle.finished()).await, RunOutcome::Completed(PlaylistStatus::Cancelled));
}

#[tokio::test]
async fn test_validation_boundary() {
    let h = Harness::new(fast_limits()).await;
    let mut rx = h.events.subscribe();
    let needed = 2 * 10 * MB + 500 * MB;

    h.fs.set_available(needed);
    let handle = h.orchestrator.start(request("pl", &["a", "b"])).await.unwrap();
    let outcome = within(handle.finished()).await;
    assert!(matches!(outcome, RunOutcome::ValidationFailed(_)));
    assert!(h.playlists.find_by_id("pl").await.unwrap().is_none());
    assert!(h.links.find_for_playlist("pl").await.unwrap().is_empty());
    assert!(common::drain_events(&mut rx).iter().any(|e| matches!(
        e,
        CoreEvent::Playlist(PlaylistEvent::ValidationFailed { required_bytes, available_bytes, .. })
            if *required_bytes == needed && *available_bytes == needed
    )));

    h.fs.set_available(needed + 1);
    let handle = h.orchestrator.start(request("pl", &["a", "b"])).await.unwrap();
    assert_eq!(within(handle.finished()).await, RunOutcome::Completed(PlaylistStatus::Full));
}

#[tokio::test]
async fn test_validation_reserves_other_active_playlists() {
    let h = Harness::new(fast_limits()).await;
    let gate = h.downloader.close_gate(0);
    let mut rx = h.events.subscribe();

    let other = h.orchestrator.start(request("other", &["x", "y"])).await.unwrap();
    wait_for_download_phase(&mut rx, "other").await;

    // Enough for "pl" alone, not for "pl" plus the 20 MB "other" still owes
    h.fs.set_available(10 * MB + 500 * MB + 1);
    let handle = h.orchestrator.start(request("pl", &["a"])).await.unwrap();
    assert!(matches!(within(handle.finished()).await, RunOutcome::ValidationFailed(_)));

    gate.add_permits(10);
    assert_eq!(within(other.finished()).await, RunOutcome::Completed(PlaylistStatus::Full));
}

#[tokio::test]
async fn test_invalid_request_is_rejected() {
    let h = Harness::new(fast_limits()).await;
    let result = h.orchestrator.start(request("pl", &[])).await;
    assert!(matches!(result, Err(OfflineError::InvalidInput { .. })));
}

#[tokio::test]
async fn test_pause_then_resume_downloads_only_the_rest() {
    let h = Harness::new(fast_limits()).await;
    let gate = h.downloader.close_gate(2);
    let mut rx = h.events.subscribe();

    let handle = h
        .orchestrator
        .start(request("pl", &["s1", "s2", "s3", "s4", "s5"]))
        .await
        .unwrap();
    wait_for_completions(&mut rx, 2).await;

    assert!(h.orchestrator.pause("pl").await.unwrap());
    assert_eq!(within(handle.finished()).await, RunOutcome::Paused);
    assert!(!h.orchestrator.is_running("pl").await);

    let row = playlist(&h, "pl").await;
    assert_eq!(row.status, PlaylistStatus::Paused);
    let counts = h.links.count_by_status("pl").await.unwrap();
    assert_eq!((counts.completed, counts.pending), (2, 3));
    assert_eq!(h.downloader.completed(), vec!["s1", "s2"]);
    assert!(h.jobs.find_by_status(DownloadStatus::Downloading).await.unwrap().is_empty());

    gate.add_permits(100);
    let resumed = h.orchestrator.resume("pl").await.unwrap();
    assert_eq!(within(resumed.finished()).await, RunOutcome::Completed(PlaylistStatus::Full));
    assert_eq!(h.downloader.completed(), vec!["s1", "s2", "s3", "s4", "s5"]);
}

#[tokio::test]
async fn test_resume_errors_and_running_handle() {
    let h = Harness::new(fast_limits()).await;
    assert!(matches!(
        h.orchestrator.resume("missing").await,
        Err(OfflineError::NotFound { .. })
    ));

    let handle = h.orchestrator.start(request("done", &["a"])).await.unwrap();
    within(handle.finished()).await;
    assert!(matches!(
        h.orchestrator.resume("done").await,
        Err(OfflineError::InvalidStateTransition { .. })
    ));

    let gate = h.downloader.close_gate(0);
    let mut rx = h.events.subscribe();
    let first = h.orchestrator.start(request("live", &["b"])).await.unwrap();
    wait_for_download_phase(&mut rx, "live").await;
    assert!(h.orchestrator.is_running("live").await);
    let second = h.orchestrator.resume("live").await.unwrap();

    gate.add_permits(1);
    assert_eq!(within(first.finished()).await, within(second.finished()).await);
}

#[tokio::test]
async fn test_cancel_rolls_up_and_clears_jobs() {
    let h = Harness::new(fast_limits()).await;
    let _gate = h.downloader.close_gate(1);
    let mut rx = h.events.subscribe();

    let handle = h.orchestrator.start(request("pl", &["a", "b", "c"])).await.unwrap();
    wait_for_completions(&mut rx, 1).await;

    h.orchestrator.cancel("pl").await.unwrap();
    assert_eq!(within(handle.finished()).await, RunOutcome::Cancelled);

    let row = playlist(&h, "pl").await;
    assert_eq!(row.status, PlaylistStatus::Cancelled);
    assert_eq!(row.phase, PlaylistPhase::Done);
    let counts = h.links.count_by_status("pl").await.unwrap();
    assert_eq!((counts.completed, counts.cancelled), (1, 2));
    assert!(h.jobs.find_all().await.unwrap().is_empty());
    assert!(common::drain_events(&mut rx)
        .iter()
        .any(|e| matches!(e, CoreEvent::Playlist(PlaylistEvent::Cancelled { .. }))));

    // Finished playlists are left alone
    h.orchestrator.cancel("pl").await.unwrap();
    assert!(!h.orchestrator.pause("pl").await.unwrap());
    assert!(matches!(
        h.orchestrator.cancel("missing").await,
        Err(OfflineError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_cancel_keeps_recorded_failures() {
    let h = Harness::new(fast_limits()).await;
    let _gate = h.downloader.close_gate(2);
    h.downloader.set("b", Behaviour::Fail);

    let handle = h.orchestrator.start(request("pl", &["a", "b", "c"])).await.unwrap();
    let in_flight = vec![
        SongLinkStatus::Completed,
        SongLinkStatus::Failed,
        SongLinkStatus::Downloading,
    ];
    within(async {
        while link_statuses(&h, "pl").await != in_flight {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    h.orchestrator.cancel("pl").await.unwrap();
    assert_eq!(within(handle.finished()).await, RunOutcome::Cancelled);

    assert_eq!(
        link_statuses(&h, "pl").await,
        vec![
            SongLinkStatus::Completed,
            SongLinkStatus::Failed,
            SongLinkStatus::Cancelled
        ]
    );
    let row = playlist(&h, "pl").await;
    assert_eq!(row.status, PlaylistStatus::Partial);
    assert_eq!((row.downloaded_count, row.failed_count), (1, 1));
}

#[tokio::test]
async fn test_start_replaces_running_pipeline() {
    let h = Harness::new(fast_limits()).await;
    let gate = h.downloader.close_gate(0);
    let mut rx = h.events.subscribe();

    let first = h.orchestrator.start(request("pl", &["old"])).await.unwrap();
    wait_for_download_phase(&mut rx, "pl").await;

    let second = h.orchestrator.start(request("pl", &["b", "c"])).await.unwrap();
    assert_eq!(within(first.finished()).await, RunOutcome::Cancelled);

    gate.add_permits(10);
    assert_eq!(within(second.finished()).await, RunOutcome::Completed(PlaylistStatus::Full));
    let songs: Vec<String> = h
        .links
        .find_for_playlist("pl")
        .await
        .unwrap()
        .iter()
        .map(|link| link.song_id().to_string())
        .collect();
    assert_eq!(songs, vec!["b", "c"]);
    assert!(!h.assets.exists("old").await.unwrap());
}

#[tokio::test]
async fn test_cached_songs_are_skipped() {
    let h = Harness::new(fast_limits()).await;
    h.queue
        .enqueue(MediaItem::new("a", "Song a", "Artist"), AudioQuality::Original)
        .await
        .unwrap();
    within(h.queue.wait_idle()).await;

    let handle = h.orchestrator.start(request("pl", &["a", "b"])).await.unwrap();
    assert_eq!(within(handle.finished()).await, RunOutcome::Completed(PlaylistStatus::Full));
    assert_eq!(h.downloader.completed(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_faults_retry_with_backoff_until_exhausted() {
    let h = Harness::new(fast_limits()).await;
    h.downloader.set("boom", Behaviour::Panic);
    let mut rx = h.events.subscribe();

    let handle = h.orchestrator.start(request("pl", &["boom"])).await.unwrap();
    assert_eq!(within(handle.finished()).await, RunOutcome::Completed(PlaylistStatus::Cancelled));

    let retries: Vec<(u32, u64)> = common::drain_events(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            CoreEvent::Playlist(PlaylistEvent::RetryScheduled { attempt, delay_ms, .. }) => Some((attempt, delay_ms)),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![(1, 5), (2, 10)]);
    assert_eq!(h.downloader.attempts(), vec!["boom"; 3]);
    assert_eq!(playlist(&h, "pl").await.attempt, 3);
    assert!(h.jobs.find_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_metered_network_needs_permission() {
    let network = Arc::new(DesktopNetworkMonitor::new());
    network.update(NetworkInfo {
        is_metered: true,
        ..NetworkInfo::unmetered()
    });
    let monitor: Arc<dyn NetworkMonitor> = network.clone();
    let h = Harness::with_network(fast_limits(), Some(monitor)).await;

    let handle = h.orchestrator.start(request("blocked", &["a"])).await.unwrap();
    assert_eq!(within(handle.finished()).await, RunOutcome::Completed(PlaylistStatus::Cancelled));
    assert!(h.downloader.attempts().is_empty());

    h.orchestrator
        .allow_metered_network("allowed", Duration::from_secs(60))
        .await
        .unwrap();
    let handle = h.orchestrator.start(request("allowed", &["b"])).await.unwrap();
    assert_eq!(within(handle.finished()).await, RunOutcome::Completed(PlaylistStatus::Full));
    assert_eq!(h.downloader.completed(), vec!["b"]);
}

#[tokio::test]
async fn test_recover_resumes_interrupted_runs() {
    let h = Harness::new(fast_limits()).await;

    let mut interrupted = PlaylistDownload::new("pl", "Mix", 2, AudioQuality::Original, 1);
    interrupted.phase = PlaylistPhase::Download;
    h.playlists.insert(&interrupted).await.unwrap();
    let links: Vec<PlaylistSongLink> = ["a", "b"]
        .iter()
        .enumerate()
        .map(|(position, id)| PlaylistSongLink {
            playlist_id: "pl".to_string(),
            position: position as u32,
            item: MediaItem::new(*id, "Song", "Artist"),
            status: if position == 0 {
                SongLinkStatus::Downloading
            } else {
                SongLinkStatus::Pending
            },
            expected_bytes: MB,
        })
        .collect();
    h.links.insert_many(&links).await.unwrap();

    let mut finished = PlaylistDownload::new("old", "Done", 0, AudioQuality::Original, 1);
    finished.phase = PlaylistPhase::Done;
    h.playlists.insert(&finished).await.unwrap();

    let gate = h.downloader.close_gate(0);
    assert_eq!(h.orchestrator.recover().await.unwrap(), vec!["pl".to_string()]);
    let handle = h.orchestrator.resume("pl").await.unwrap();

    gate.add_permits(10);
    assert_eq!(within(handle.finished()).await, RunOutcome::Completed(PlaylistStatus::Full));
    assert_eq!(link_statuses(&h, "pl").await, vec![SongLinkStatus::Completed; 2]);
}

#[tokio::test]
async fn test_shutdown_leaves_run_resumable() {
    let h = Harness::new(fast_limits()).await;
    let _gate = h.downloader.close_gate(0);
    let mut rx = h.events.subscribe();

    let handle = h.orchestrator.start(request("pl", &["a"])).await.unwrap();
    wait_for_download_phase(&mut rx, "pl").await;

    within(h.orchestrator.shutdown()).await;
    assert_eq!(handle.outcome(), Some(RunOutcome::Paused));
    let row = playlist(&h, "pl").await;
    assert_eq!(row.status, PlaylistStatus::Downloading);
    assert_ne!(row.phase, PlaylistPhase::Done);
}
