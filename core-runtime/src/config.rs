//! # Core Configuration Module
//!
//! Provides configuration for the offline download core.
//!
//! ## Overview
//!
//! A builder assembles a `CoreConfig` holding the injected bridges, the media
//! server endpoint, and the download limits. `build()` fails fast when a
//! required bridge is missing or a limit is nonsensical.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - Media and artwork transfers
//! - `FileSystemAccess` - Content/art directories and free-space probing
//! - `SecureStore` - Server access token
//!
//! ## Optional Dependencies
//!
//! - `SettingsStore` - Runtime overrides (cache cap, overheating protection)
//! - `NetworkMonitor` - Metered-network gating for playlist downloads
//! - `BatteryMonitor` / `ThermalMonitor` - Automatic pause/resume
//! - `Clock` - Defaults to `SystemClock`
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{ClientIdentity, CoreConfig, ServerConfig};
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/data/offline.db")
//!     .server(ServerConfig::new(
//!         "https://media.example.com",
//!         ClientIdentity::new("Offline Player", "Pixel 8", "device-123", "1.4.0"),
//!     ))
//!     .http_client(Arc::new(MyHttpClient))
//!     .file_system(Arc::new(MyFileSystem))
//!     .secure_store(Arc::new(MySecureStore))
//!     .max_cache_bytes(4 * 1024 * 1024 * 1024)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{
    device::{BatteryMonitor, ThermalMonitor},
    http::HttpClient,
    network::NetworkMonitor,
    storage::{FileSystemAccess, SecureStore, SettingsStore},
    time::{Clock, SystemClock},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Settings key overriding [`DownloadLimits::max_cache_bytes`] at runtime.
pub const SETTING_MAX_CACHE_BYTES: &str = "offline.max_cache_bytes";
/// Settings key for the user's overheating-protection toggle.
pub const SETTING_OVERHEAT_PROTECTION: &str = "offline.overheat_protection";

/// Identity the client presents to the media server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub client: String,
    pub device: String,
    pub device_id: String,
    pub version: String,
}

impl ClientIdentity {
    pub fn new(
        client: impl Into<String>,
        device: impl Into<String>,
        device_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            client: client.into(),
            device: device.into(),
            device_id: device_id.into(),
            version: version.into(),
        }
    }

    /// Value of the structured client-identity header.
    pub fn authorization_header(&self) -> String {
        format!(
            "MediaBrowser Client=\"{}\", Device=\"{}\", DeviceId=\"{}\", Version=\"{}\"",
            self.client, self.device, self.device_id, self.version
        )
    }
}

/// Remote media server endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Base URL without trailing slash, e.g. `https://media.example.com`
    pub base_url: String,
    pub identity: ClientIdentity,
}

impl ServerConfig {
    pub fn new(base_url: impl Into<String>, identity: ClientIdentity) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, identity }
    }
}

/// Tunable limits for transfers, caching and retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadLimits {
    /// Cap on Σ(content + art bytes) of cached assets
    pub max_cache_bytes: u64,
    /// Free space that must remain after a playlist's expected bytes
    pub storage_buffer_bytes: u64,
    /// Rows examined per eviction pass
    pub eviction_scan_limit: u32,
    /// Pause between songs in a playlist run
    pub inter_song_delay: Duration,
    /// Transfer chunk size
    pub chunk_size: usize,
    pub connect_timeout: Duration,
    /// Per-chunk read/write budget for audio transfers
    pub content_timeout: Duration,
    /// Whole-request budget for artwork
    pub image_timeout: Duration,
    /// Pause playlist runs below this charge when not charging
    pub battery_threshold_percent: u8,
    pub retry_initial_backoff: Duration,
    pub retry_max_backoff: Duration,
    /// Phase D passes before rolling up regardless of leftovers
    pub max_phase_attempts: u32,
}

impl Default for DownloadLimits {
    fn default() -> Self {
        Self {
            max_cache_bytes: 2048 * MIB,
            storage_buffer_bytes: 500 * MIB,
            eviction_scan_limit: 100,
            inter_song_delay: Duration::from_millis(500),
            chunk_size: 8 * 1024,
            connect_timeout: Duration::from_secs(30),
            content_timeout: Duration::from_secs(60),
            image_timeout: Duration::from_secs(5),
            battery_threshold_percent: 15,
            retry_initial_backoff: Duration::from_secs(10),
            retry_max_backoff: Duration::from_secs(300),
            max_phase_attempts: 5,
        }
    }
}

impl DownloadLimits {
    pub fn validate(&self) -> Result<()> {
        if self.max_cache_bytes == 0 {
            return Err(Error::Config("max_cache_bytes must be greater than 0".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be greater than 0".to_string()));
        }
        if self.eviction_scan_limit == 0 {
            return Err(Error::Config(
                "eviction_scan_limit must be greater than 0".to_string(),
            ));
        }
        if self.battery_threshold_percent > 100 {
            return Err(Error::Config(format!(
                "battery_threshold_percent must be at most 100, got {}",
                self.battery_threshold_percent
            )));
        }
        if self.retry_max_backoff < self.retry_initial_backoff {
            return Err(Error::Config(
                "retry_max_backoff must not be shorter than retry_initial_backoff".to_string(),
            ));
        }
        if self.max_phase_attempts == 0 {
            return Err(Error::Config(
                "max_phase_attempts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Core configuration
#[derive(Clone)]
pub struct CoreConfig {
    /// SQLite file; `None` keeps the metadata store in memory
    pub database_path: Option<PathBuf>,
    pub server: ServerConfig,
    pub limits: DownloadLimits,
    pub event_buffer_size: usize,

    pub http_client: Arc<dyn HttpClient>,
    pub file_system: Arc<dyn FileSystemAccess>,
    pub secure_store: Arc<dyn SecureStore>,
    pub settings_store: Option<Arc<dyn SettingsStore>>,
    pub network_monitor: Option<Arc<dyn NetworkMonitor>>,
    pub battery_monitor: Option<Arc<dyn BatteryMonitor>>,
    pub thermal_monitor: Option<Arc<dyn ThermalMonitor>>,
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("server", &self.server.base_url)
            .field("limits", &self.limits)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("settings_store", &self.settings_store.is_some())
            .field("network_monitor", &self.network_monitor.is_some())
            .field("battery_monitor", &self.battery_monitor.is_some())
            .field("thermal_monitor", &self.thermal_monitor.is_some())
            .finish_non_exhaustive()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.base_url.is_empty() {
            return Err(Error::Config(
                "Server base URL is required. Use .server() to set it.".to_string(),
            ));
        }
        if !self.server.base_url.starts_with("http://") && !self.server.base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "Server base URL must be http(s): {}",
                self.server.base_url
            )));
        }
        if self.event_buffer_size == 0 {
            return Err(Error::Config("event_buffer_size must be greater than 0".to_string()));
        }
        self.limits.validate()
    }
}

/// Builder for [`CoreConfig`]
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    server: Option<ServerConfig>,
    limits: DownloadLimits,
    event_buffer_size: Option<usize>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    battery_monitor: Option<Arc<dyn BatteryMonitor>>,
    thermal_monitor: Option<Arc<dyn ThermalMonitor>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CoreConfigBuilder {
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn server(mut self, server: ServerConfig) -> Self {
        self.server = Some(server);
        self
    }

    /// Replace every limit at once
    pub fn limits(mut self, limits: DownloadLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn max_cache_bytes(mut self, bytes: u64) -> Self {
        self.limits.max_cache_bytes = bytes;
        self
    }

    pub fn inter_song_delay(mut self, delay: Duration) -> Self {
        self.limits.inter_song_delay = delay;
        self
    }

    pub fn battery_threshold_percent(mut self, percent: u8) -> Self {
        self.limits.battery_threshold_percent = percent;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn battery_monitor(mut self, monitor: Arc<dyn BatteryMonitor>) -> Self {
        self.battery_monitor = Some(monitor);
        self
    }

    pub fn thermal_monitor(mut self, monitor: Arc<dyn ThermalMonitor>) -> Self {
        self.thermal_monitor = Some(monitor);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// - `Error::CapabilityMissing` if a required bridge was not injected
    /// - `Error::Config` if the server or a limit is invalid
    pub fn build(self) -> Result<CoreConfig> {
        let server = self.server.ok_or_else(|| {
            Error::Config("Server configuration is required. Use .server() to set it.".to_string())
        })?;

        let http_client = self.http_client.ok_or_else(|| Error::CapabilityMissing {
            capability: "HttpClient".to_string(),
            message: "No HTTP client implementation provided. \
                      Desktop: use bridge_desktop::ReqwestHttpClient. \
                      Mobile: inject the platform-native adapter."
                .to_string(),
        })?;

        let file_system = self.file_system.ok_or_else(|| Error::CapabilityMissing {
            capability: "FileSystemAccess".to_string(),
            message: "No file system implementation provided. \
                      Desktop: use bridge_desktop::TokioFileSystem."
                .to_string(),
        })?;

        let secure_store = self.secure_store.ok_or_else(|| Error::CapabilityMissing {
            capability: "SecureStore".to_string(),
            message: "SecureStore implementation is required to read the server access token. \
                      Desktop: enable the secure-store feature of bridge-desktop."
                .to_string(),
        })?;

        let config = CoreConfig {
            database_path: self.database_path,
            server,
            limits: self.limits,
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            http_client,
            file_system,
            secure_store,
            settings_store: self.settings_store,
            network_monitor: self.network_monitor,
            battery_monitor: self.battery_monitor,
            thermal_monitor: self.thermal_monitor,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;
        Ok(config)
    }
}
