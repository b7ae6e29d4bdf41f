//! Carbon-aware task scheduler
//!
//! Tasks wait in one of five priority buckets until their chosen execution
//! time. Each deferred task arms a timer; the timer only runs the task if it
//! is still in its bucket, so `force_execute_all`, `cancel_task` and the
//! sweep supersede pending timers without cancelling them.
//!
//! ## Maintenance
//!
//! [`CarbonAwareScheduler::start`] spawns a loop that refreshes carbon data
//! (every 30 min by default), refreshes device conditions (every 5 min) and
//! sweeps the buckets (every minute), running tasks that are overdue or whose
//! live score beats the configured threshold.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use verdant_core::config::SchedulerConfig;
use verdant_core::domain::TaskId;
use verdant_core::ports::{DeviceConditions, IDeviceProbe};

use crate::carbon::CarbonDataService;
use crate::forecast::{simulated_intensity, CarbonForecast, DataSource};
use crate::scoring;
use crate::task::{Priority, ScheduleOptions, Task, TaskRunner, TaskSpec};
use crate::SchedulerError;

/// Intensity used as the "dirty grid" baseline for savings (gCO2/kWh)
const HIGH_INTENSITY_REFERENCE: f64 = 500.0;

/// Intensity at which a task costs exactly its estimated carbon cost
const COST_REFERENCE_INTENSITY: f64 = 400.0;

/// Result of `schedule_task`
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    /// The task ran before `schedule_task` returned
    Executed(TaskReport),
    /// The task is queued to run at `at`
    Scheduled { id: TaskId, at: DateTime<Utc> },
}

/// Summary of a successful task execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub attempts: u32,
    /// Estimated carbon saved versus running on a high-intensity grid
    pub carbon_saved: f64,
    /// Where the intensity used for the estimate came from
    pub source: DataSource,
}

/// Cumulative scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    pub tasks_scheduled: u64,
    pub tasks_executed: u64,
    pub tasks_failed: u64,
    /// Savings estimated from measured intensity
    pub carbon_saved_measured: f64,
    /// Savings estimated from the time-of-day model
    pub carbon_saved_simulated: f64,
}

impl SchedulerStats {
    pub fn total_carbon_saved(&self) -> f64 {
        self.carbon_saved_measured + self.carbon_saved_simulated
    }
}

/// Tasks waiting per priority
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub per_priority: BTreeMap<Priority, usize>,
    pub total: usize,
}

struct SchedulerInner {
    config: SchedulerConfig,
    queues: Mutex<BTreeMap<Priority, Vec<Task>>>,
    forecast: RwLock<CarbonForecast>,
    conditions: RwLock<DeviceConditions>,
    carbon: CarbonDataService,
    device_probe: Arc<dyn IDeviceProbe>,
    stats: Mutex<SchedulerStats>,
}

/// Priority scheduler timing tasks against carbon intensity
///
/// Cloning is cheap; clones share the same buckets and statistics.
#[derive(Clone)]
pub struct CarbonAwareScheduler {
    inner: Arc<SchedulerInner>,
}

impl CarbonAwareScheduler {
    /// Creates a scheduler using a simulated forecast until the first refresh
    pub fn new(
        config: SchedulerConfig,
        carbon: CarbonDataService,
        device_probe: Arc<dyn IDeviceProbe>,
    ) -> Self {
        let queues = Priority::ALL.iter().map(|p| (*p, Vec::new())).collect();
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                queues: Mutex::new(queues),
                forecast: RwLock::new(CarbonForecast::simulated(Utc::now())),
                conditions: RwLock::new(DeviceConditions::default()),
                carbon,
                device_probe,
                stats: Mutex::new(SchedulerStats::default()),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Schedules a task
    ///
    /// Urgent tasks, and tasks whose maximum delay is zero, run before this
    /// returns. Other tasks are queued for the best-scoring time within their
    /// deadline.
    ///
    /// # Errors
    /// Returns `SchedulerError::TaskFailed` if an immediately executed task
    /// exhausts its attempts.
    #[tracing::instrument(skip(self, spec), fields(task_type = %spec.task_type))]
    pub async fn schedule_task(
        &self,
        spec: TaskSpec,
        priority: Priority,
        options: ScheduleOptions,
    ) -> Result<ScheduleOutcome, SchedulerError> {
        let now = Utc::now();
        let max_delay = options
            .max_delay
            .unwrap_or_else(|| priority.default_max_delay());
        let mut task = Task::from_spec(spec, priority, max_delay, now);

        self.inner.stats.lock().unwrap().tasks_scheduled += 1;

        if priority == Priority::Urgent || max_delay <= chrono::Duration::zero() {
            debug!(task_id = %task.id, "Executing task immediately");
            let report = self.execute_task(task).await?;
            return Ok(ScheduleOutcome::Executed(report));
        }

        let at = self.optimal_time_at(&task, now);
        task.scheduled_at = at;
        let id = task.id;

        info!(
            task_id = %id,
            priority = %priority,
            delay_secs = (at - now).num_seconds(),
            estimated_cost = task.estimated_carbon_cost,
            "Task scheduled"
        );

        self.inner
            .queues
            .lock()
            .unwrap()
            .entry(priority)
            .or_default()
            .push(task);
        self.arm_timer(id, at);

        Ok(ScheduleOutcome::Scheduled { id, at })
    }

    /// Best start time for `task` under the current forecast and conditions
    pub fn find_optimal_execution_time(&self, task: &Task) -> DateTime<Utc> {
        self.optimal_time_at(task, Utc::now())
    }

    fn optimal_time_at(&self, task: &Task, now: DateTime<Utc>) -> DateTime<Utc> {
        let forecast = self.inner.forecast.read().unwrap();
        let conditions = self.inner.conditions.read().unwrap();
        scoring::find_optimal_execution_time(task, &forecast, &conditions, &self.inner.config, now)
    }

    fn arm_timer(&self, id: TaskId, at: DateTime<Utc>) {
        let delay = (at - Utc::now()).to_std().unwrap_or_default();
        let weak = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let scheduler = CarbonAwareScheduler { inner };
            // Already run, cancelled or swept: nothing to do
            if let Some(task) = scheduler.take_task(id) {
                let _ = scheduler.execute_task(task).await;
            }
        });
    }

    /// Removes a waiting task from its bucket
    pub fn take_task(&self, id: TaskId) -> Option<Task> {
        let mut queues = self.inner.queues.lock().unwrap();
        for bucket in queues.values_mut() {
            if let Some(pos) = bucket.iter().position(|t| t.id == id) {
                return Some(bucket.remove(pos));
            }
        }
        None
    }

    /// Cancels a waiting task; returns false if it is not queued
    pub fn cancel_task(&self, id: TaskId) -> bool {
        let cancelled = self.take_task(id).is_some();
        if cancelled {
            info!(task_id = %id, "Task cancelled");
        }
        cancelled
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Runs a task with bounded retries
    ///
    /// Batch sub-tasks run in chunks with a pause between chunks; after a
    /// failed attempt only the failed sub-tasks are retried. Attempts back off
    /// exponentially (2^attempt seconds).
    ///
    /// # Errors
    /// Returns `SchedulerError::TaskFailed` once `max_task_attempts` attempts
    /// have failed. The task is dropped.
    pub async fn execute_task(&self, mut task: Task) -> Result<TaskReport, SchedulerError> {
        let max_attempts = self.inner.config.max_task_attempts.max(1);
        let mut pending = task.work.runners();

        loop {
            task.attempts += 1;
            let (failed, last_error) = self.run_pass(&pending).await;

            let Some(message) = last_error else {
                break;
            };

            if task.attempts >= max_attempts {
                self.inner.stats.lock().unwrap().tasks_failed += 1;
                error!(
                    task_id = %task.id,
                    attempts = task.attempts,
                    failed = failed.len(),
                    error = %message,
                    "Task failed, dropping"
                );
                return Err(SchedulerError::TaskFailed {
                    id: task.id,
                    attempts: task.attempts,
                    message,
                });
            }

            let delay_secs = 2u64.pow(task.attempts);
            warn!(
                task_id = %task.id,
                attempt = task.attempts,
                delay_secs,
                failed = failed.len(),
                error = %message,
                "Task attempt failed, retrying"
            );
            tokio::time::sleep(StdDuration::from_secs(delay_secs)).await;
            pending = failed;
        }

        let (carbon_saved, source) = self.estimate_savings(&task);
        {
            let mut stats = self.inner.stats.lock().unwrap();
            stats.tasks_executed += 1;
            if source.is_measured() {
                stats.carbon_saved_measured += carbon_saved;
            } else {
                stats.carbon_saved_simulated += carbon_saved;
            }
        }

        info!(
            task_id = %task.id,
            attempts = task.attempts,
            carbon_saved,
            source = %source,
            "Task executed"
        );

        Ok(TaskReport {
            id: task.id,
            attempts: task.attempts,
            carbon_saved,
            source,
        })
    }

    /// Runs each runner once; returns the failed runners and the last error
    async fn run_pass(
        &self,
        runners: &[Arc<dyn TaskRunner>],
    ) -> (Vec<Arc<dyn TaskRunner>>, Option<String>) {
        let chunk_size = self.inner.config.batch_chunk_size.max(1);
        let pacing = StdDuration::from_millis(self.inner.config.batch_pacing_ms);
        let mut failed = Vec::new();
        let mut last_error = None;

        for (idx, chunk) in runners.chunks(chunk_size).enumerate() {
            if idx > 0 && !pacing.is_zero() {
                tokio::time::sleep(pacing).await;
            }
            for runner in chunk {
                if let Err(e) = runner.run().await {
                    last_error = Some(format!("{e:#}"));
                    failed.push(Arc::clone(runner));
                }
            }
        }

        (failed, last_error)
    }

    /// `max(0, cost on a dirty grid - cost at the current intensity)`
    fn estimate_savings(&self, task: &Task) -> (f64, DataSource) {
        let now = Utc::now();
        let forecast = self.inner.forecast.read().unwrap();
        let (intensity, source) = match forecast.slot_covering(now) {
            Some(slot) => (slot.intensity, slot.source.clone()),
            None => (simulated_intensity(now.hour()), DataSource::Simulated),
        };

        let cost_at = |i: f64| task.estimated_carbon_cost * i / COST_REFERENCE_INTENSITY;
        let saved = (cost_at(HIGH_INTENSITY_REFERENCE) - cost_at(intensity)).max(0.0);
        (saved, source)
    }

    /// Drains every bucket, most urgent first, and runs the tasks now
    ///
    /// Pending timers for these tasks become no-ops.
    #[tracing::instrument(skip(self))]
    pub async fn force_execute_all(&self) -> Vec<Result<TaskReport, SchedulerError>> {
        let tasks: Vec<Task> = {
            let mut queues = self.inner.queues.lock().unwrap();
            queues.values_mut().flat_map(std::mem::take).collect()
        };

        info!(count = tasks.len(), "Force-executing all queued tasks");

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            results.push(self.execute_task(task).await);
        }
        results
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Runs tasks that are past their deadline or whose live score beats the
    /// optimal threshold
    pub async fn sweep(&self) -> usize {
        self.sweep_at(Utc::now()).await
    }

    pub(crate) async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let live_score = {
            let forecast = self.inner.forecast.read().unwrap();
            let conditions = self.inner.conditions.read().unwrap();
            scoring::immediate_score(&forecast, &conditions, &self.inner.config, now)
        };
        let good_window = live_score > self.inner.config.optimal_score_threshold;

        let due: Vec<Task> = {
            let mut queues = self.inner.queues.lock().unwrap();
            let mut due = Vec::new();
            for bucket in queues.values_mut() {
                let (run, keep): (Vec<Task>, Vec<Task>) = std::mem::take(bucket)
                    .into_iter()
                    .partition(|t| good_window || t.is_overdue(now));
                *bucket = keep;
                due.extend(run);
            }
            due
        };

        if due.is_empty() {
            return 0;
        }

        debug!(count = due.len(), live_score, "Sweep executing tasks");
        let count = due.len();
        for task in due {
            let _ = self.execute_task(task).await;
        }
        count
    }

    /// Fetches a fresh forecast from the provider chain
    pub async fn refresh_carbon_data(&self) {
        let forecast = self.inner.carbon.fetch_forecast(Utc::now()).await;
        debug!(
            measured = forecast.has_measurements(),
            "Carbon forecast refreshed"
        );
        *self.inner.forecast.write().unwrap() = forecast;
    }

    /// Probes device conditions, keeping the previous value on failure
    pub async fn refresh_device_conditions(&self) {
        match self.inner.device_probe.probe().await {
            Ok(conditions) => {
                debug!(network = %conditions.network, "Device conditions refreshed");
                *self.inner.conditions.write().unwrap() = conditions;
            }
            Err(e) => {
                warn!(error = %e, "Device probe failed, keeping previous conditions");
            }
        }
    }

    /// Loads initial carbon data and device conditions
    pub async fn initialize(&self) {
        self.refresh_carbon_data().await;
        self.refresh_device_conditions().await;
    }

    /// Spawns the maintenance loop, which runs until `shutdown` is cancelled
    pub fn start(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let scheduler = self.clone();
        let config = &self.inner.config;
        let carbon_every = StdDuration::from_secs(config.carbon_refresh_minutes.max(1) * 60);
        let device_every = StdDuration::from_secs(config.device_refresh_minutes.max(1) * 60);
        let sweep_every = StdDuration::from_secs(config.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            info!("Scheduler maintenance starting");

            let mut carbon_timer = tokio::time::interval(carbon_every);
            let mut device_timer = tokio::time::interval(device_every);
            let mut sweep_timer = tokio::time::interval(sweep_every);
            for timer in [&mut carbon_timer, &mut device_timer, &mut sweep_timer] {
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            }

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Scheduler maintenance stopping");
                        break;
                    }
                    _ = carbon_timer.tick() => scheduler.refresh_carbon_data().await,
                    _ = device_timer.tick() => scheduler.refresh_device_conditions().await,
                    _ = sweep_timer.tick() => {
                        scheduler.sweep().await;
                    }
                }
            }
        })
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn queue_status(&self) -> QueueStatus {
        let queues = self.inner.queues.lock().unwrap();
        let per_priority: BTreeMap<Priority, usize> =
            queues.iter().map(|(p, tasks)| (*p, tasks.len())).collect();
        let total = per_priority.values().sum();
        QueueStatus {
            per_priority,
            total,
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.inner.stats.lock().unwrap().clone()
    }

    pub fn current_forecast(&self) -> CarbonForecast {
        self.inner.forecast.read().unwrap().clone()
    }

    pub fn set_forecast(&self, forecast: CarbonForecast) {
        *self.inner.forecast.write().unwrap() = forecast;
    }

    pub fn conditions(&self) -> DeviceConditions {
        *self.inner.conditions.read().unwrap()
    }

    pub fn set_conditions(&self, conditions: DeviceConditions) {
        *self.inner.conditions.write().unwrap() = conditions;
    }
}

impl std::fmt::Debug for CarbonAwareScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarbonAwareScheduler")
            .field("queued", &self.queue_status().total)
            .field("carbon", &self.inner.carbon)
            .finish_non_exhaustive()
    }
}
