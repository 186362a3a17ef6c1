//! # Offline Cache Module
//!
//! Keeps the bytes held by cached assets under a configurable cap.
//!
//! ## Overview
//!
//! - Σ(content + art bytes) is read from the metadata store, never from disk
//! - Eviction is reactive: the queue and playlist runs call
//!   [`CacheManager::evict_if_needed`] after every completed download
//! - One pass examines at most `eviction_scan_limit` assets in ascending
//!   `last_access_at` order and stops once the excess is freed
//! - Orphan reconciliation removes files no row references and rows whose
//!   content file disappeared
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │     CacheManager                       │
//! │  - evict_if_needed()                   │
//! │  - delete_asset() / clear_cache()      │
//! │  - reconcile_orphans()                 │
//! └────────┬───────────────────────────────┘
//!          │
//!          ├──> CachedAssetRepository (DB)
//!          ├──> FileSystemAccess (Storage)
//!          └──> EventBus (CacheEvent)
//! ```

pub mod manager;
pub mod stats;

pub use manager::{CacheManager, TransferGuard};
pub use stats::{CacheStatistics, EvictionReport, OrphanReport};
