//! Carbon intensity data
//!
//! [`HttpIntensityProvider`] queries one HTTP endpoint returning
//! `{"intensity": <gCO2/kWh>}`. [`CarbonDataService`] tries its providers in
//! order (grid operator first, then third-party services) and falls back to
//! the deterministic time-of-day model when none answers. Fetching a forecast
//! therefore never fails; the slots' [`DataSource`](crate::DataSource) tells
//! callers what they got.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use verdant_core::config::{CarbonConfig, ProviderEndpoint};
use verdant_core::ports::{ICarbonIntensityProvider, IntensityReading};

use crate::forecast::CarbonForecast;
use crate::SchedulerError;

/// Response body expected from intensity endpoints
#[derive(Debug, Deserialize)]
struct IntensityResponse {
    intensity: f64,
}

// ============================================================================
// HttpIntensityProvider
// ============================================================================

/// Intensity provider backed by a single HTTP endpoint
pub struct HttpIntensityProvider {
    client: Client,
    name: String,
    url: String,
    api_key: Option<String>,
    region: String,
}

impl HttpIntensityProvider {
    /// Creates a provider for `endpoint`, querying `region`
    ///
    /// # Errors
    /// Returns `SchedulerError::Http` if the HTTP client cannot be built
    pub fn new(
        endpoint: &ProviderEndpoint,
        region: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SchedulerError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            name: endpoint.name.clone(),
            url: endpoint.url.clone(),
            api_key: endpoint.api_key.clone(),
            region: region.into(),
        })
    }

    async fn fetch(&self) -> Result<IntensityReading, SchedulerError> {
        let mut request = self
            .client
            .get(&self.url)
            .query(&[("region", self.region.as_str())]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let body: IntensityResponse = request.send().await?.error_for_status()?.json().await?;

        if !body.intensity.is_finite() || body.intensity < 0.0 {
            return Err(SchedulerError::InvalidReading {
                provider: self.name.clone(),
                value: body.intensity,
            });
        }

        Ok(IntensityReading {
            intensity: body.intensity,
            provider: self.name.clone(),
        })
    }
}

impl std::fmt::Debug for HttpIntensityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIntensityProvider")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ICarbonIntensityProvider for HttpIntensityProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn current_intensity(&self) -> anyhow::Result<IntensityReading> {
        Ok(self.fetch().await?)
    }
}

// ============================================================================
// CarbonDataService
// ============================================================================

/// Ordered chain of intensity providers with a simulated fallback
#[derive(Clone, Default)]
pub struct CarbonDataService {
    providers: Vec<Arc<dyn ICarbonIntensityProvider>>,
}

impl CarbonDataService {
    pub fn new(providers: Vec<Arc<dyn ICarbonIntensityProvider>>) -> Self {
        Self { providers }
    }

    /// Builds the chain from configuration: grid API first, then services
    ///
    /// Endpoints whose client cannot be built are logged and skipped.
    pub fn from_config(config: &CarbonConfig) -> Self {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let providers = config
            .grid_api
            .iter()
            .chain(config.services.iter())
            .filter_map(|endpoint| {
                match HttpIntensityProvider::new(endpoint, config.region.clone(), timeout) {
                    Ok(p) => Some(Arc::new(p) as Arc<dyn ICarbonIntensityProvider>),
                    Err(e) => {
                        warn!(provider = %endpoint.name, error = %e, "Skipping carbon provider");
                        None
                    }
                }
            })
            .collect();
        Self::new(providers)
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Returns a 24h forecast starting at `now`
    ///
    /// The first provider that answers anchors the forecast; if every
    /// provider fails (or none is configured) the forecast is simulated.
    pub async fn fetch_forecast(&self, now: DateTime<Utc>) -> CarbonForecast {
        for provider in &self.providers {
            match provider.current_intensity().await {
                Ok(reading) => {
                    info!(
                        provider = %reading.provider,
                        intensity = reading.intensity,
                        "Carbon intensity measured"
                    );
                    return CarbonForecast::anchored(now, &reading);
                }
                Err(e) => {
                    warn!(provider = %provider.name(), error = %e, "Carbon provider failed");
                }
            }
        }

        debug!("No carbon measurement available, using simulated forecast");
        CarbonForecast::simulated(now)
    }
}

impl std::fmt::Debug for CarbonDataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("CarbonDataService")
            .field("providers", &names)
            .finish()
    }
}
