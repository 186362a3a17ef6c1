//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest` (30s connect timeout)
//! - `FileSystemAccess` using `tokio::fs`, with `statvfs` free-space probing
//! - `SecureStore` using the `keyring` crate
//! - `SettingsStore` using a SQLite key-value table
//! - `NetworkMonitor`, `BatteryMonitor`, `ThermalMonitor` backed by `watch`
//!   channels that the host shell feeds
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, TokioFileSystem};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let http_client = ReqwestHttpClient::new()?;
//!     let fs = TokioFileSystem::new();
//!     // Hand both to CoreConfigBuilder
//!     Ok(())
//! }
//! ```

mod device;
mod filesystem;
mod http;
mod network;
mod settings;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use device::{DesktopBatteryMonitor, DesktopThermalMonitor, WatchConditionStream};
pub use filesystem::TokioFileSystem;
pub use http::{ReqwestHttpClient, DEFAULT_CONNECT_TIMEOUT};
pub use network::DesktopNetworkMonitor;
pub use settings::SqliteSettingsStore;

#[cfg(feature = "secure-store")]
pub use secure_store::KeyringSecureStore;
