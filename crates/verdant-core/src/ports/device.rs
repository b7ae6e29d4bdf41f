//! Device condition probe port
//!
//! Reports the network quality and battery state the scheduler uses to
//! adjust execution-window scores.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Coarse network quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkQuality {
    Fast,
    #[default]
    Medium,
    Slow,
}

impl std::fmt::Display for NetworkQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkQuality::Fast => write!(f, "fast"),
            NetworkQuality::Medium => write!(f, "medium"),
            NetworkQuality::Slow => write!(f, "slow"),
        }
    }
}

/// Battery level and charging state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryStatus {
    /// Charge level in `0.0..=1.0`
    pub level: f64,
    pub charging: bool,
}

/// Snapshot of device conditions
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceConditions {
    pub network: NetworkQuality,
    /// `None` on devices without a battery
    pub battery: Option<BatteryStatus>,
}

/// Probes the host for current device conditions
#[async_trait]
pub trait IDeviceProbe: Send + Sync {
    async fn probe(&self) -> anyhow::Result<DeviceConditions>;
}
