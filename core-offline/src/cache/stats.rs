//! Cache statistics and pass reports

use serde::{Deserialize, Serialize};

/// Aggregate view of the offline cache against its cap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStatistics {
    /// Number of cached assets
    pub count: u64,

    /// Σ(content + art bytes)
    pub total_bytes: u64,

    /// Configured cap
    pub max_bytes: u64,

    /// `total_bytes / max_bytes * 100`, may exceed 100 between passes
    pub used_percent: f64,

    /// Bytes left under the cap, zero when over
    pub available_bytes: u64,
}

impl CacheStatistics {
    pub fn new(count: u64, total_bytes: u64, max_bytes: u64) -> Self {
        let used_percent = if max_bytes == 0 {
            0.0
        } else {
            (total_bytes as f64 / max_bytes as f64) * 100.0
        };

        Self {
            count,
            total_bytes,
            max_bytes,
            used_percent,
            available_bytes: max_bytes.saturating_sub(total_bytes),
        }
    }

    pub fn is_over_cap(&self) -> bool {
        self.total_bytes > self.max_bytes
    }

    /// Bytes an eviction pass must free
    pub fn excess_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.max_bytes)
    }
}

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionReport {
    /// Candidates looked at in this pass
    pub examined: u32,
    /// Evicted asset ids, least recently used first
    pub evicted: Vec<String>,
    pub freed_bytes: u64,
    /// The scan limit ran out before the excess was freed
    pub still_over_cap: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanReport {
    /// Files on disk no row referenced
    pub files_removed: u32,
    /// Rows whose content file was gone
    pub rows_removed: u32,
}
