//! Device condition probes

use std::sync::Mutex;

use async_trait::async_trait;

use verdant_core::ports::{DeviceConditions, IDeviceProbe};

/// Probe reporting whatever conditions were last set
///
/// Used where the platform exposes no network or battery information, and
/// by hosts that push conditions in from elsewhere.
#[derive(Debug, Default)]
pub struct StaticDeviceProbe {
    conditions: Mutex<DeviceConditions>,
}

impl StaticDeviceProbe {
    pub fn new(conditions: DeviceConditions) -> Self {
        Self {
            conditions: Mutex::new(conditions),
        }
    }

    /// Replaces the reported conditions
    pub fn set(&self, conditions: DeviceConditions) {
        *self.conditions.lock().unwrap() = conditions;
    }
}

#[async_trait]
impl IDeviceProbe for StaticDeviceProbe {
    async fn probe(&self) -> anyhow::Result<DeviceConditions> {
        Ok(*self.conditions.lock().unwrap())
    }
}
