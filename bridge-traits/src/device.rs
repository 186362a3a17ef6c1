//! Device Condition Abstractions
//!
//! Battery and thermal observers. Hosts push platform broadcasts (battery
//! intents, thermal status listeners, power-source notifications) through
//! these traits; the core only sees typed state updates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Snapshot of the device battery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryState {
    /// Charge level, 0..=100
    pub percent: u8,
    /// Whether the device is connected to external power
    pub charging: bool,
}

impl BatteryState {
    pub fn new(percent: u8, charging: bool) -> Self {
        Self {
            percent: percent.min(100),
            charging,
        }
    }

    /// Mains-powered device with a full battery
    pub fn plugged_in() -> Self {
        Self::new(100, true)
    }
}

/// Thermal pressure reported by the platform
///
/// Ordered from coolest to hottest so policies can compare with `>=`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum ThermalSeverity {
    #[default]
    None,
    Light,
    Moderate,
    Severe,
    Critical,
    Emergency,
    Shutdown,
}

impl ThermalSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Light => "light",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Stream of condition updates
#[async_trait]
pub trait ConditionStream<T: Send>: Send {
    /// Next state update, `None` once the source is gone
    async fn next(&mut self) -> Option<T>;
}

/// Battery observer
///
/// # Platform Support
///
/// - **Android**: `ACTION_BATTERY_CHANGED` sticky broadcast
/// - **iOS**: `UIDevice.batteryLevel` notifications
/// - **Desktop**: power supply APIs, or always plugged in
#[async_trait]
pub trait BatteryMonitor: Send + Sync {
    /// Current battery state
    async fn current_state(&self) -> Result<BatteryState>;

    /// Subscribe to battery changes
    async fn subscribe(&self) -> Result<Box<dyn ConditionStream<BatteryState>>>;
}

/// Thermal observer
#[async_trait]
pub trait ThermalMonitor: Send + Sync {
    /// Current thermal severity
    async fn current_severity(&self) -> Result<ThermalSeverity>;

    /// Subscribe to thermal changes
    async fn subscribe(&self) -> Result<Box<dyn ConditionStream<ThermalSeverity>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_battery_percent_is_clamped() {
        let state = BatteryState::new(140, false);
        assert_eq!(state.percent, 100);
        assert!(!state.charging);
    }

    #[test]
    fn test_thermal_ordering() {
        assert!(ThermalSeverity::Severe >= ThermalSeverity::Moderate);
        assert!(ThermalSeverity::Light < ThermalSeverity::Moderate);
        assert_eq!(ThermalSeverity::default(), ThermalSeverity::None);
        assert_eq!(ThermalSeverity::Critical.as_str(), "critical");
    }
}
