//! Execution window scoring
//!
//! Pure functions: given a task, a forecast and device conditions, decide
//! when the task should run. Higher scores are better.
//!
//! ```text
//! score = 100
//!       + intensity bonus   (low +50, medium +20, high -30)
//!       - 5 × hours of delay
//!       + network bonus     (fast +10, medium +5, slow -20)      if network-aware
//!       + battery bonus     (charging +15, <20% -25, <50% -10)   if battery-aware
//! ```

use chrono::{DateTime, Timelike, Utc};
use tracing::trace;

use verdant_core::config::SchedulerConfig;
use verdant_core::ports::{DeviceConditions, NetworkQuality};

use crate::forecast::{simulated_intensity, CarbonForecast, IntensityCategory};
use crate::task::Task;

const BASE_SCORE: f64 = 100.0;
const DELAY_PENALTY_PER_HOUR: f64 = 5.0;

fn intensity_bonus(category: IntensityCategory) -> f64 {
    match category {
        IntensityCategory::Low => 50.0,
        IntensityCategory::Medium => 20.0,
        IntensityCategory::High => -30.0,
    }
}

fn network_bonus(quality: NetworkQuality) -> f64 {
    match quality {
        NetworkQuality::Fast => 10.0,
        NetworkQuality::Medium => 5.0,
        NetworkQuality::Slow => -20.0,
    }
}

fn battery_bonus(conditions: &DeviceConditions) -> f64 {
    match conditions.battery {
        Some(b) if b.charging => 15.0,
        Some(b) if b.level < 0.2 => -25.0,
        Some(b) if b.level < 0.5 => -10.0,
        _ => 0.0,
    }
}

/// Scores running a task in a window of the given intensity class
pub fn score_window(
    category: IntensityCategory,
    hours_delayed: f64,
    conditions: &DeviceConditions,
    config: &SchedulerConfig,
) -> f64 {
    let mut score = BASE_SCORE + intensity_bonus(category) - DELAY_PENALTY_PER_HOUR * hours_delayed;
    if config.network_aware {
        score += network_bonus(conditions.network);
    }
    if config.battery_aware {
        score += battery_bonus(conditions);
    }
    score
}

/// Intensity class right now, from the forecast or the time-of-day model
pub fn current_category(forecast: &CarbonForecast, now: DateTime<Utc>) -> IntensityCategory {
    current_intensity(forecast, now).1
}

/// Intensity right now and its class
pub(crate) fn current_intensity(
    forecast: &CarbonForecast,
    now: DateTime<Utc>,
) -> (f64, IntensityCategory) {
    match forecast.slot_covering(now) {
        Some(slot) => (slot.intensity, slot.category),
        None => {
            let intensity = simulated_intensity(now.hour());
            (intensity, IntensityCategory::from_intensity(intensity))
        }
    }
}

/// Score of running a task right now
pub fn immediate_score(
    forecast: &CarbonForecast,
    conditions: &DeviceConditions,
    config: &SchedulerConfig,
    now: DateTime<Utc>,
) -> f64 {
    score_window(current_category(forecast, now), 0.0, conditions, config)
}

/// Picks the best start time for `task`
///
/// Only forecast slots starting after `now` and no later than the task's
/// deadline are considered. A slot must score strictly higher than running
/// immediately to be chosen; otherwise `now` is returned.
pub fn find_optimal_execution_time(
    task: &Task,
    forecast: &CarbonForecast,
    conditions: &DeviceConditions,
    config: &SchedulerConfig,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let deadline = task.deadline();
    let mut best_time = now;
    let mut best_score = immediate_score(forecast, conditions, config, now);

    for slot in &forecast.slots {
        let start = forecast.slot_start(slot);
        if start <= now || start > deadline {
            continue;
        }
        let hours_delayed = (start - now).num_seconds() as f64 / 3600.0;
        let score = score_window(slot.category, hours_delayed, conditions, config);
        trace!(
            task_id = %task.id,
            hour_offset = slot.hour_offset,
            score,
            "Scored forecast slot"
        );
        if score > best_score {
            best_score = score;
            best_time = start;
        }
    }

    best_time
}
