//! # Offline Downloads
//!
//! Background download orchestration and the bounded offline cache.
//!
//! ## Overview
//!
//! - [`downloader`] streams one song (and its cover art) from the media
//!   server to disk with cooperative cancellation
//! - [`queue`] runs single-song jobs one at a time in FIFO order
//! - [`cache`] keeps the cached songs under a byte cap with LRU eviction
//! - [`playlist`] drives bulk downloads through Validate, Download and Rollup
//! - [`monitors`] pauses playlist runs on low battery or overheating
//!
//! All state lives in the `core-library` metadata store so that queued work
//! survives a restart.

pub mod cache;
pub mod credentials;
pub mod downloader;
pub mod error;
pub mod layout;
pub mod monitors;
pub mod playlist;
pub mod progress;
pub mod queue;
pub mod transfer;

pub use cache::{CacheManager, CacheStatistics, EvictionReport, OrphanReport, TransferGuard};
pub use credentials::{CredentialProvider, SecureStoreCredentials, ServerCredentials};
pub use downloader::{DownloadedArt, DownloadedAsset, Downloader, HttpDownloader, ProgressObserver};
pub use error::{OfflineError, Result};
pub use layout::StorageLayout;
pub use monitors::{
    spawn_battery_monitor, spawn_thermal_monitor, BatteryPolicy, PauseCause, PauseController,
    ThermalPolicy,
};
pub use playlist::{
    Backoff, PlaylistOrchestrator, PlaylistRequest, PlaylistSong, RunHandle, RunOutcome,
};
pub use queue::{DownloadQueue, EnqueueOutcome};
pub use transfer::TransferContext;
