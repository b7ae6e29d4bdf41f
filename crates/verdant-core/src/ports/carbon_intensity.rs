//! Carbon intensity provider port
//!
//! Providers return the current grid carbon intensity in gCO2/kWh. Any
//! provider may be missing or failing; callers must fall back to a
//! simulation rather than surface the error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single intensity reading from a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntensityReading {
    /// Grams CO2-equivalent per kWh
    pub intensity: f64,
    /// Name of the provider that measured it
    pub provider: String,
}

/// Source of measured grid carbon intensity
#[async_trait]
pub trait ICarbonIntensityProvider: Send + Sync {
    /// Short provider name used to tag readings
    fn name(&self) -> &str;

    /// Fetches the current intensity
    async fn current_intensity(&self) -> anyhow::Result<IntensityReading>;
}
