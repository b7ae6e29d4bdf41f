//! Carbon intensity forecasts
//!
//! A [`CarbonForecast`] is an ordered sequence of hourly slots covering the
//! next 24 hours. Every slot carries a [`DataSource`] so simulated values are
//! never mistaken for measured ones downstream.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use verdant_core::ports::IntensityReading;

/// Hours covered by a forecast
pub const FORECAST_HOURS: u32 = 24;

/// Upper bound (exclusive) of the `low` category, gCO2/kWh
pub const LOW_INTENSITY_THRESHOLD: f64 = 200.0;

/// Upper bound (exclusive) of the `medium` category, gCO2/kWh
pub const MEDIUM_INTENSITY_THRESHOLD: f64 = 400.0;

/// Typical grid intensity by hour of day (gCO2/kWh): low overnight, a
/// midday solar dip, and morning and evening demand peaks.
const HOURLY_PROFILE: [f64; 24] = [
    180.0, 165.0, 155.0, 150.0, 150.0, 160.0, 210.0, 300.0, 380.0, 420.0, 360.0, 290.0, 240.0,
    220.0, 230.0, 270.0, 340.0, 420.0, 460.0, 450.0, 400.0, 330.0, 260.0, 210.0,
];

/// Coarse intensity class used by the scorer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntensityCategory {
    Low,
    Medium,
    High,
}

impl IntensityCategory {
    pub fn from_intensity(intensity: f64) -> Self {
        if intensity < LOW_INTENSITY_THRESHOLD {
            IntensityCategory::Low
        } else if intensity < MEDIUM_INTENSITY_THRESHOLD {
            IntensityCategory::Medium
        } else {
            IntensityCategory::High
        }
    }
}

impl std::fmt::Display for IntensityCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntensityCategory::Low => write!(f, "low"),
            IntensityCategory::Medium => write!(f, "medium"),
            IntensityCategory::High => write!(f, "high"),
        }
    }
}

/// Where an intensity value came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataSource {
    /// Reported by a real provider
    Measured { provider: String },
    /// Produced by the time-of-day model
    Simulated,
}

impl DataSource {
    pub fn is_measured(&self) -> bool {
        matches!(self, DataSource::Measured { .. })
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSource::Measured { provider } => write!(f, "measured:{provider}"),
            DataSource::Simulated => write!(f, "simulated"),
        }
    }
}

/// One hourly forecast slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSlot {
    /// Hours after the forecast's generation time
    pub hour_offset: u32,
    /// gCO2/kWh
    pub intensity: f64,
    pub category: IntensityCategory,
    pub source: DataSource,
}

impl ForecastSlot {
    pub fn new(hour_offset: u32, intensity: f64, source: DataSource) -> Self {
        Self {
            hour_offset,
            intensity,
            category: IntensityCategory::from_intensity(intensity),
            source,
        }
    }
}

/// Hourly intensity forecast anchored at `generated_at`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonForecast {
    pub generated_at: DateTime<Utc>,
    pub slots: Vec<ForecastSlot>,
}

impl CarbonForecast {
    /// Builds a forecast, ordering slots by hour offset
    pub fn new(generated_at: DateTime<Utc>, mut slots: Vec<ForecastSlot>) -> Self {
        slots.sort_by_key(|s| s.hour_offset);
        Self {
            generated_at,
            slots,
        }
    }

    /// Deterministic forecast from the time-of-day profile
    pub fn simulated(now: DateTime<Utc>) -> Self {
        let slots = (0..FORECAST_HOURS)
            .map(|offset| {
                let hour = (now.hour() + offset) % 24;
                ForecastSlot::new(offset, simulated_intensity(hour), DataSource::Simulated)
            })
            .collect();
        Self::new(now, slots)
    }

    /// Forecast anchored on a measured reading
    ///
    /// The first slot is the measurement itself. Later slots follow the
    /// time-of-day profile scaled by how far the measurement sits from the
    /// profile's current value; they remain tagged `Simulated`.
    pub fn anchored(now: DateTime<Utc>, reading: &IntensityReading) -> Self {
        let baseline = simulated_intensity(now.hour());
        let ratio = if baseline > 0.0 {
            reading.intensity / baseline
        } else {
            1.0
        };

        let mut slots = vec![ForecastSlot::new(
            0,
            reading.intensity,
            DataSource::Measured {
                provider: reading.provider.clone(),
            },
        )];
        slots.extend((1..FORECAST_HOURS).map(|offset| {
            let hour = (now.hour() + offset) % 24;
            ForecastSlot::new(
                offset,
                simulated_intensity(hour) * ratio,
                DataSource::Simulated,
            )
        }));
        Self::new(now, slots)
    }

    /// Start time of a slot
    pub fn slot_start(&self, slot: &ForecastSlot) -> DateTime<Utc> {
        self.generated_at + Duration::hours(i64::from(slot.hour_offset))
    }

    /// The slot covering `now`: the latest slot that has already started
    pub fn slot_covering(&self, now: DateTime<Utc>) -> Option<&ForecastSlot> {
        self.slots
            .iter()
            .take_while(|slot| self.slot_start(slot) <= now)
            .last()
    }

    /// True if any slot was measured rather than simulated
    pub fn has_measurements(&self) -> bool {
        self.slots.iter().any(|s| s.source.is_measured())
    }
}

/// Time-of-day model intensity for an hour in `0..24`
pub fn simulated_intensity(hour_of_day: u32) -> f64 {
    HOURLY_PROFILE[(hour_of_day % 24) as usize]
}
