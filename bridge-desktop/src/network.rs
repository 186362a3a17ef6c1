//! Network Monitoring Implementation

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkType},
};
use tokio::sync::watch;
use tracing::debug;

/// Desktop network monitor implementation
///
/// Wired and WiFi desktop links are treated as unmetered. Hosts that know
/// better (tethering detection, OS cost hints) can publish through `update`.
pub struct DesktopNetworkMonitor {
    tx: watch::Sender<NetworkInfo>,
}

impl DesktopNetworkMonitor {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(NetworkInfo {
            network_type: Some(NetworkType::Other),
            ..NetworkInfo::unmetered()
        });
        Self { tx }
    }

    pub fn update(&self, info: NetworkInfo) {
        debug!(status = ?info.status, metered = info.is_metered, "Network info updated");
        self.tx.send_replace(info);
    }
}

impl Default for DesktopNetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

struct WatchNetworkStream {
    rx: watch::Receiver<NetworkInfo>,
}

#[async_trait]
impl NetworkChangeStream for WatchNetworkStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

#[async_trait]
impl NetworkMonitor for DesktopNetworkMonitor {
    async fn get_network_info(&self) -> Result<NetworkInfo> {
        Ok(self.tx.borrow().clone())
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>> {
        Ok(Box::new(WatchNetworkStream {
            rx: self.tx.subscribe(),
        }))
    }
}
