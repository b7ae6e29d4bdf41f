//! Verdant Scheduler - Carbon-aware priority task scheduling
//!
//! Provides:
//! - Five priority buckets, each bounding how long a task may be deferred
//! - Execution-window scoring against a 24h carbon intensity forecast,
//!   network quality and battery state
//! - A carbon data provider chain (grid API, third-party services,
//!   deterministic time-of-day simulation) with source tagging
//! - Task execution with bounded retries and exponential backoff
//! - Background maintenance: carbon refresh, device refresh, queue sweep
//!
//! ## Modules
//!
//! - [`scheduler`] - The [`CarbonAwareScheduler`] and its maintenance loop
//! - [`task`] - Priorities, tasks and the [`TaskRunner`] callback trait
//! - [`forecast`] - Forecast slots, intensity categories and data sources
//! - [`scoring`] - Pure scoring of candidate execution windows
//! - [`carbon`] - HTTP intensity providers and the fallback chain
//! - [`conditions`] - Device condition probes

pub mod carbon;
pub mod conditions;
pub mod forecast;
pub mod scheduler;
pub mod scoring;
pub mod task;

use thiserror::Error;

use verdant_core::domain::TaskId;

pub use carbon::{CarbonDataService, HttpIntensityProvider};
pub use conditions::StaticDeviceProbe;
pub use forecast::{CarbonForecast, DataSource, ForecastSlot, IntensityCategory};
pub use scheduler::{CarbonAwareScheduler, QueueStatus, ScheduleOutcome, SchedulerStats, TaskReport};
pub use task::{Priority, ScheduleOptions, Task, TaskRunner, TaskSpec, TaskWork};

/// Errors that can occur while scheduling or executing tasks
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Priority name not recognised
    #[error("invalid priority '{0}'; valid: urgent, high, normal, low, background")]
    InvalidPriority(String),

    /// A task exhausted its attempts and was dropped
    #[error("task {id} failed after {attempts} attempt(s): {message}")]
    TaskFailed {
        id: TaskId,
        attempts: u32,
        message: String,
    },

    /// HTTP client construction or request failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A provider returned an unusable intensity value
    #[error("invalid intensity {value} from provider {provider}")]
    InvalidReading { provider: String, value: f64 },
}
