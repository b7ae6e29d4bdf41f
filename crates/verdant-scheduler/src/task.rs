//! Priorities, tasks and task work
//!
//! A [`Task`] is created by `CarbonAwareScheduler::schedule_task` and lives in
//! its priority bucket until it runs (successfully or not) or is cancelled.
//! The scheduler only decides *when* a task runs; the work itself is supplied
//! by the caller as one or more [`TaskRunner`]s.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use verdant_core::domain::TaskId;

use crate::SchedulerError;

/// Base carbon cost per second of work, before the type factor
pub const BASE_CARBON_COST: f64 = 10.0;

/// Default estimated duration for tasks that do not provide one
pub const DEFAULT_ESTIMATED_DURATION: StdDuration = StdDuration::from_secs(1);

// ============================================================================
// Priority
// ============================================================================

/// Scheduling class bounding how long a task may be deferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    Normal,
    Low,
    Background,
}

impl Priority {
    /// All priorities, most urgent first
    pub const ALL: [Priority; 5] = [
        Priority::Urgent,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Background,
    ];

    /// How long a task of this priority may wait by default
    pub fn default_max_delay(self) -> Duration {
        match self {
            Priority::Urgent => Duration::zero(),
            Priority::High => Duration::hours(1),
            Priority::Normal => Duration::hours(6),
            Priority::Low => Duration::hours(24),
            Priority::Background => Duration::days(7),
        }
    }

    /// Parses a priority name, defaulting to `Normal` with a warning
    pub fn parse_or_default(name: &str) -> Self {
        name.parse::<Priority>().unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to normal priority");
            Priority::Normal
        })
    }
}

impl FromStr for Priority {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "urgent" => Ok(Priority::Urgent),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            "background" => Ok(Priority::Background),
            other => Err(SchedulerError::InvalidPriority(other.to_string())),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Background => "background",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// TaskRunner / TaskWork
// ============================================================================

/// The work behind a scheduled task
///
/// Implementations call back into whichever component owns the work; the
/// scheduler never inspects it.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

/// Work carried by a task
#[derive(Clone)]
pub enum TaskWork {
    /// One unit of work
    Single(Arc<dyn TaskRunner>),
    /// Independent sub-tasks run in paced chunks; only failed ones are retried
    Batch(Vec<Arc<dyn TaskRunner>>),
}

impl TaskWork {
    pub fn single<R: TaskRunner + 'static>(runner: R) -> Self {
        TaskWork::Single(Arc::new(runner))
    }

    /// Number of runnable units
    pub fn len(&self) -> usize {
        match self {
            TaskWork::Single(_) => 1,
            TaskWork::Batch(runners) => runners.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, TaskWork::Batch(_))
    }

    pub(crate) fn runners(&self) -> Vec<Arc<dyn TaskRunner>> {
        match self {
            TaskWork::Single(r) => vec![Arc::clone(r)],
            TaskWork::Batch(runners) => runners.clone(),
        }
    }
}

impl fmt::Debug for TaskWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskWork::Single(_) => f.write_str("Single"),
            TaskWork::Batch(runners) => write!(f, "Batch({})", runners.len()),
        }
    }
}

// ============================================================================
// TaskSpec / ScheduleOptions
// ============================================================================

/// Caller-provided description of a task to schedule
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Type tag used to pick the carbon cost factor (`sync`, `upload`, ...)
    pub task_type: String,
    pub work: TaskWork,
    pub estimated_duration: StdDuration,
}

impl TaskSpec {
    pub fn new(task_type: impl Into<String>, work: TaskWork) -> Self {
        Self {
            task_type: task_type.into(),
            work,
            estimated_duration: DEFAULT_ESTIMATED_DURATION,
        }
    }

    pub fn with_estimated_duration(mut self, duration: StdDuration) -> Self {
        self.estimated_duration = duration;
        self
    }
}

/// Per-task overrides
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleOptions {
    /// Replaces the priority's default maximum delay
    pub max_delay: Option<Duration>,
}

impl ScheduleOptions {
    pub fn with_max_delay(max_delay: Duration) -> Self {
        Self {
            max_delay: Some(max_delay),
        }
    }
}

// ============================================================================
// Task
// ============================================================================

/// A task waiting in (or taken from) a priority bucket
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    /// When the task is planned to run
    pub scheduled_at: DateTime<Utc>,
    pub max_delay: Duration,
    pub estimated_carbon_cost: f64,
    pub estimated_duration: StdDuration,
    /// Execution attempts made so far
    pub attempts: u32,
    pub work: TaskWork,
}

impl Task {
    pub(crate) fn from_spec(
        spec: TaskSpec,
        priority: Priority,
        max_delay: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let estimated_carbon_cost = estimate_carbon_cost(&spec.task_type, spec.estimated_duration);
        Self {
            id: TaskId::new(),
            task_type: spec.task_type,
            priority,
            created_at: now,
            scheduled_at: now,
            max_delay,
            estimated_carbon_cost,
            estimated_duration: spec.estimated_duration,
            attempts: 0,
            work: spec.work,
        }
    }

    /// Latest time the task may start
    pub fn deadline(&self) -> DateTime<Utc> {
        self.created_at + self.max_delay
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline()
    }
}

/// Relative energy weight of a task type
pub fn type_factor(task_type: &str) -> f64 {
    match task_type {
        "sync" => 1.0,
        "download" => 1.5,
        "upload" => 2.0,
        "backup" => 2.5,
        "compute" => 3.0,
        _ => 1.0,
    }
}

/// `BASE_CARBON_COST × type factor × seconds`
pub fn estimate_carbon_cost(task_type: &str, duration: StdDuration) -> f64 {
    BASE_CARBON_COST * type_factor(task_type) * duration.as_secs_f64()
}
