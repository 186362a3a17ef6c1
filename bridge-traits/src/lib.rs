//! # Host Bridge Traits
//!
//! Platform abstraction traits that each host platform implements for the
//! offline download core.
//!
//! ## Overview
//!
//! This crate defines the contract between the core and platform-specific
//! implementations. Each trait represents a capability that the core requires
//! but that must be implemented differently per platform (desktop, iOS,
//! Android).
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Buffered and streamed HTTP GETs
//! - [`FileSystemAccess`](storage::FileSystemAccess) - File I/O and free-space probing
//!
//! ### Security & Storage
//! - [`SecureStore`](storage::SecureStore) - Credential persistence (Keychain/Keystore)
//! - [`SettingsStore`](storage::SettingsStore) - Key-value preferences storage
//!
//! ### Device Conditions
//! - [`NetworkMonitor`](network::NetworkMonitor) - Connectivity and metered network detection
//! - [`BatteryMonitor`](device::BatteryMonitor) - Charge level and power source
//! - [`ThermalMonitor`](device::ThermalMonitor) - Thermal throttling severity
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should convert platform-specific errors to `BridgeError`
//! and include context such as file paths or URLs.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single adapter can be shared
//! across the queue worker, playlist runs and condition monitors.

pub mod device;
pub mod error;
pub mod http;
pub mod network;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use device::{BatteryMonitor, BatteryState, ConditionStream, ThermalMonitor, ThermalSeverity};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, HttpStreamResponse};
pub use network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType};
pub use storage::{FileMetadata, FileSystemAccess, SecureStore, SettingsStore};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock};
