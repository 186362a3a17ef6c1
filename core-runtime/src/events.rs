//! # Event Bus System
//!
//! Provides an event-driven architecture for the offline core using `tokio::sync::broadcast`.
//! Presentation layers subscribe here to render download state without polling
//! the metadata store.
//!
//! ## Overview
//!
//! - **Event Types**: Strongly-typed enum hierarchies per component
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ```text
//! ┌──────────────┐    emit     ┌───────────┐
//! │ Queue Manager├────────────>│           │    subscribe    ┌────────────┐
//! └──────────────┘             │ EventBus  ├────────────────>│     UI     │
//! ┌──────────────┐    emit     │ (broadcast│                 └────────────┘
//! │ Orchestrator ├────────────>│  channel) │    subscribe    ┌────────────┐
//! └──────────────┘             │           ├────────────────>│ Telemetry  │
//! ┌──────────────┐    emit     │           │                 └────────────┘
//! │ Cache / Mon. ├────────────>│           │
//! └──────────────┘             └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
//!
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Download(DownloadEvent::Queued {
//!         job_id: "job-1".to_string(),
//!         content_id: "song-1".to_string(),
//!     }))
//!     .ok();
//!
//! assert!(subscriber.try_recv().is_ok());
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//! - **`RecvError::Closed`**: All senders dropped.
//!
//! Emitters ignore `SendError` (no subscribers) with `.ok()`.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, SendError};

pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Single-asset queue events
    Download(DownloadEvent),
    /// Playlist pipeline events
    Playlist(PlaylistEvent),
    /// Cache accounting events
    Cache(CacheEvent),
    /// Battery / thermal pause events
    Device(DeviceEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Download(e) => e.description(),
            CoreEvent::Playlist(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
            CoreEvent::Device(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Download(DownloadEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Playlist(PlaylistEvent::ValidationFailed { .. }) => EventSeverity::Error,
            CoreEvent::Playlist(PlaylistEvent::RetryScheduled { .. }) => EventSeverity::Warning,
            CoreEvent::Device(DeviceEvent::PauseCauseRaised { .. }) => EventSeverity::Warning,
            CoreEvent::Download(DownloadEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Playlist(PlaylistEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Cache(CacheEvent::Evicted { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Download Events
// ============================================================================

/// Events emitted by the single-asset download queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    /// A job row was created.
    Queued { job_id: String, content_id: String },
    /// The worker picked the job up.
    Started { job_id: String, content_id: String },
    /// Transfer progress.
    Progress {
        job_id: String,
        content_id: String,
        /// Whole percent, 0..=100
        percent: u8,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    },
    /// Asset is now cached; the job row is gone.
    Completed {
        job_id: String,
        content_id: String,
        bytes: u64,
    },
    /// Transfer failed; the job stays in Failed until retried.
    Failed {
        job_id: String,
        content_id: String,
        message: String,
    },
    Cancelled { job_id: String, content_id: String },
    /// A failed job was reset to Pending.
    Retried { job_id: String, content_id: String },
}

impl DownloadEvent {
    fn description(&self) -> &str {
        match self {
            DownloadEvent::Queued { .. } => "Download queued",
            DownloadEvent::Started { .. } => "Download started",
            DownloadEvent::Progress { .. } => "Download progress",
            DownloadEvent::Completed { .. } => "Download completed",
            DownloadEvent::Failed { .. } => "Download failed",
            DownloadEvent::Cancelled { .. } => "Download cancelled",
            DownloadEvent::Retried { .. } => "Download retried",
        }
    }
}

// ============================================================================
// Playlist Events
// ============================================================================

/// Events emitted by the playlist pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaylistEvent {
    /// Phase V rejected the request; nothing was persisted.
    ValidationFailed {
        playlist_id: String,
        required_bytes: u64,
        available_bytes: u64,
    },
    PhaseChanged { playlist_id: String, phase: String },
    /// Emitted before each song in Phase D.
    SongProgress {
        playlist_id: String,
        /// Zero-based position of the song being fetched.
        index: u32,
        total: u32,
        percent: u8,
    },
    Paused { playlist_id: String },
    Resumed { playlist_id: String },
    /// Phase D yielded and will be retried after `delay_ms`.
    RetryScheduled {
        playlist_id: String,
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    /// Phase R persisted a final status.
    Completed {
        playlist_id: String,
        status: String,
        downloaded: u32,
        failed: u32,
        total: u32,
    },
    Cancelled { playlist_id: String },
}

impl PlaylistEvent {
    fn description(&self) -> &str {
        match self {
            PlaylistEvent::ValidationFailed { .. } => "Not enough storage for playlist",
            PlaylistEvent::PhaseChanged { .. } => "Playlist phase changed",
            PlaylistEvent::SongProgress { .. } => "Playlist song progress",
            PlaylistEvent::Paused { .. } => "Playlist download paused",
            PlaylistEvent::Resumed { .. } => "Playlist download resumed",
            PlaylistEvent::RetryScheduled { .. } => "Playlist download will retry",
            PlaylistEvent::Completed { .. } => "Playlist download finished",
            PlaylistEvent::Cancelled { .. } => "Playlist download cancelled",
        }
    }
}

// ============================================================================
// Cache Events
// ============================================================================

/// Events emitted by the cache manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// An eviction pass removed assets.
    Evicted {
        asset_ids: Vec<String>,
        freed_bytes: u64,
        still_over_cap: bool,
    },
    Cleared { removed: u32 },
    OrphansRemoved { files: u32, rows: u32 },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::Evicted { .. } => "Cached assets evicted",
            CacheEvent::Cleared { .. } => "Offline cache cleared",
            CacheEvent::OrphansRemoved { .. } => "Orphaned cache files removed",
        }
    }
}

// ============================================================================
// Device Events
// ============================================================================

/// Events emitted by the battery / thermal pause controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DeviceEvent {
    PauseCauseRaised {
        cause: String,
        paused_playlists: Vec<String>,
    },
    PauseCauseCleared {
        cause: String,
        resumed_playlists: Vec<String>,
    },
}

impl DeviceEvent {
    fn description(&self) -> &str {
        match self {
            DeviceEvent::PauseCauseRaised { .. } => "Downloads paused by device condition",
            DeviceEvent::PauseCauseCleared { .. } => "Device condition cleared",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for broadcasting events to multiple subscribers.
///
/// Cloning is cheap: all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified per-subscriber buffer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let playlist_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Playlist(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive a matching event without blocking.
    ///
    /// Returns `None` if no events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matches(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
