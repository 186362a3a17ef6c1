//! # Playlist Download Pipeline
//!
//! Bulk downloads run as an explicit three-phase state machine whose phase
//! pointer is persisted on the `playlist_downloads` row:
//!
//! ```text
//!   start ──> Validate ──> Download ──> Rollup ──> Done
//!               │            │   ▲
//!               │            └───┘ retry later (backoff)
//!               └──> ValidationFailed (nothing persisted)
//!
//!   pause  : stop the run, status Paused, links untouched
//!   resume : re-enter Download with the remaining links
//!   cancel : stop the run, cancel remaining links, Rollup
//! ```
//!
//! At most one run per playlist id exists at any time; `start` replaces a
//! running one.

pub mod backoff;
pub mod orchestrator;

pub use backoff::Backoff;
pub use orchestrator::PlaylistOrchestrator;

use crate::error::{OfflineError, Result};
use core_library::models::{AudioQuality, MediaItem, PlaylistStatus};
use std::collections::HashSet;
use tokio::sync::watch;

/// One song of a bulk download with its expected size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistSong {
    pub item: MediaItem,
    pub expected_bytes: u64,
}

/// Input of [`PlaylistOrchestrator::start`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistRequest {
    pub playlist_id: String,
    pub name: String,
    pub songs: Vec<PlaylistSong>,
    pub quality: AudioQuality,
    pub cover_url: Option<String>,
}

impl PlaylistRequest {
    pub fn new(playlist_id: impl Into<String>, name: impl Into<String>, quality: AudioQuality) -> Self {
        Self {
            playlist_id: playlist_id.into(),
            name: name.into(),
            songs: Vec::new(),
            quality,
            cover_url: None,
        }
    }

    pub fn with_song(mut self, item: MediaItem, expected_bytes: u64) -> Self {
        self.songs.push(PlaylistSong {
            item,
            expected_bytes,
        });
        self
    }

    pub fn with_cover_url(mut self, url: impl Into<String>) -> Self {
        self.cover_url = Some(url.into());
        self
    }

    /// Σ expected bytes of every song
    pub fn required_bytes(&self) -> u64 {
        self.songs
            .iter()
            .fold(0u64, |sum, song| sum.saturating_add(song.expected_bytes))
    }

    pub fn validate(&self) -> Result<()> {
        if self.playlist_id.trim().is_empty() {
            return Err(invalid("playlist_id", "playlist id cannot be empty"));
        }
        if self.songs.is_empty() {
            return Err(invalid("songs", "playlist has no songs"));
        }

        let mut seen = HashSet::new();
        for song in &self.songs {
            song.item
                .validate()
                .map_err(|message| invalid("songs", &message))?;
            if !seen.insert(song.item.content_id.as_str()) {
                return Err(invalid(
                    "songs",
                    &format!("duplicate song {}", song.item.content_id),
                ));
            }
        }
        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> OfflineError {
    OfflineError::InvalidInput {
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Rollup finished with a terminal status
    Completed(PlaylistStatus),
    /// Stopped by `pause` or shutdown; resumable
    Paused,
    /// Stopped by `cancel` or replaced by a newer `start`
    Cancelled,
    ValidationFailed(String),
    /// The run could not make progress on its own bookkeeping
    Failed(String),
}

/// Observer of a spawned run; clones observe the same run
#[derive(Debug, Clone)]
pub struct RunHandle {
    outcome: watch::Receiver<Option<RunOutcome>>,
}

impl RunHandle {
    pub(crate) fn new(outcome: watch::Receiver<Option<RunOutcome>>) -> Self {
        Self { outcome }
    }

    /// Outcome if the run already ended
    pub fn outcome(&self) -> Option<RunOutcome> {
        self.outcome.borrow().clone()
    }

    /// Wait for the run to end
    pub async fn finished(&self) -> RunOutcome {
        let mut rx = self.outcome.clone();
        let result = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        };
        result.unwrap_or_else(|| RunOutcome::Failed("run ended without an outcome".to_string()))
    }
}
