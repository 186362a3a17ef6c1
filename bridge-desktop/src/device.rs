//! Device Condition Monitors
//!
//! Desktop machines rarely expose battery or thermal data through a portable
//! API, so these monitors hold the latest state in a `watch` channel. The
//! host shell (tray app, power daemon listener) pushes updates with
//! `update`, and every subscriber sees them.

use async_trait::async_trait;
use bridge_traits::{
    device::{BatteryMonitor, BatteryState, ConditionStream, ThermalMonitor, ThermalSeverity},
    error::Result,
};
use tokio::sync::watch;
use tracing::debug;

/// Condition stream backed by a `watch` receiver
pub struct WatchConditionStream<T> {
    rx: watch::Receiver<T>,
}

impl<T> WatchConditionStream<T> {
    pub fn new(rx: watch::Receiver<T>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl<T> ConditionStream<T> for WatchConditionStream<T>
where
    T: Clone + Send + Sync,
{
    async fn next(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// Battery monitor for desktop hosts
///
/// Starts out plugged in, which never triggers a pause.
pub struct DesktopBatteryMonitor {
    tx: watch::Sender<BatteryState>,
}

impl DesktopBatteryMonitor {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(BatteryState::plugged_in());
        Self { tx }
    }

    /// Publish a new battery reading
    pub fn update(&self, state: BatteryState) {
        debug!(percent = state.percent, charging = state.charging, "Battery state updated");
        self.tx.send_replace(state);
    }
}

impl Default for DesktopBatteryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BatteryMonitor for DesktopBatteryMonitor {
    async fn current_state(&self) -> Result<BatteryState> {
        Ok(*self.tx.borrow())
    }

    async fn subscribe(&self) -> Result<Box<dyn ConditionStream<BatteryState>>> {
        Ok(Box::new(WatchConditionStream::new(self.tx.subscribe())))
    }
}

/// Thermal monitor for desktop hosts
pub struct DesktopThermalMonitor {
    tx: watch::Sender<ThermalSeverity>,
}

impl DesktopThermalMonitor {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ThermalSeverity::None);
        Self { tx }
    }

    /// Publish a new thermal reading
    pub fn update(&self, severity: ThermalSeverity) {
        debug!(severity = severity.as_str(), "Thermal state updated");
        self.tx.send_replace(severity);
    }
}

impl Default for DesktopThermalMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ThermalMonitor for DesktopThermalMonitor {
    async fn current_severity(&self) -> Result<ThermalSeverity> {
        Ok(*self.tx.borrow())
    }

    async fn subscribe(&self) -> Result<Box<dyn ConditionStream<ThermalSeverity>>> {
        Ok(Box::new(WatchConditionStream::new(self.tx.subscribe())))
    }
}
