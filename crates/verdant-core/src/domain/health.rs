//! Queue statistics and health reporting
//!
//! [`HealthReport::assess`] turns queue statistics and the current sync state
//! into human-readable issues and recommendations.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::mutation::Mutation;
use super::sync_state::{SyncState, SyncStatus};

/// Aggregate statistics over the mutation queue
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total: usize,
    /// Mutations that failed at least once but can still retry
    pub retrying: usize,
    /// Mutations whose automatic retries are exhausted
    pub permanently_failed: usize,
    /// Mutations older than the stale threshold
    pub stale: usize,
    /// Age of the oldest queued mutation, in milliseconds
    pub oldest_age_ms: Option<i64>,
    /// Mutation counts keyed by type tag
    pub by_type: BTreeMap<String, usize>,
}

impl QueueStats {
    /// Computes statistics over a queue snapshot
    pub fn compute(
        queue: &[Mutation],
        now: DateTime<Utc>,
        max_retries: u32,
        stale_after: Duration,
    ) -> Self {
        let mut stats = QueueStats {
            total: queue.len(),
            ..Default::default()
        };

        for m in queue {
            if !m.can_retry(max_retries) {
                stats.permanently_failed += 1;
            } else if m.retry_count > 0 {
                stats.retrying += 1;
            }

            let age = m.age(now);
            if age > stale_after {
                stats.stale += 1;
            }
            let age_ms = age.num_milliseconds();
            stats.oldest_age_ms = Some(stats.oldest_age_ms.map_or(age_ms, |o| o.max(age_ms)));

            *stats.by_type.entry(m.kind.clone()).or_insert(0) += 1;
        }

        stats
    }
}

/// Coarse health level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Error,
}

impl std::fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthLevel::Healthy => write!(f, "healthy"),
            HealthLevel::Degraded => write!(f, "degraded"),
            HealthLevel::Error => write!(f, "error"),
        }
    }
}

/// Aggregated health of the sync engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthLevel,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

impl HealthReport {
    /// Derives a health report from queue statistics and the sync state
    pub fn assess(stats: &QueueStats, state: &SyncState) -> Self {
        let mut status = HealthLevel::Healthy;
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        if stats.permanently_failed > 0 {
            status = status.max(HealthLevel::Degraded);
            issues.push(format!(
                "{} mutation(s) exhausted their retries",
                stats.permanently_failed
            ));
            recommendations.push(
                "Inspect failed mutations and remove or force-sync them".to_string(),
            );
        }

        if stats.stale > 0 {
            status = status.max(HealthLevel::Degraded);
            issues.push(format!(
                "{} mutation(s) have been queued past the stale threshold",
                stats.stale
            ));
            recommendations.push("Check connectivity to the sync endpoint".to_string());
        }

        if stats.retrying > 0 {
            issues.push(format!("{} mutation(s) are retrying", stats.retrying));
        }

        match state.status {
            SyncStatus::Error => {
                status = HealthLevel::Error;
                issues.push(match &state.error {
                    Some(e) => format!("Sync engine is in error state: {e}"),
                    None => "Sync engine is in error state".to_string(),
                });
                recommendations.push("Review the last sync error and retry".to_string());
            }
            SyncStatus::Offline if stats.total > 0 => {
                issues.push(format!(
                    "Offline with {} pending mutation(s)",
                    stats.total
                ));
                recommendations
                    .push("Changes will sync automatically once back online".to_string());
            }
            _ => {}
        }

        Self {
            status,
            issues,
            recommendations,
        }
    }

    /// Adds an unreadable persisted queue to the report
    pub fn with_storage_problem(mut self, problem: &str) -> Self {
        self.status = self.status.max(HealthLevel::Degraded);
        self.issues.push(format!(
            "Persisted queue unreadable, changes are kept in memory: {problem}"
        ));
        self.recommendations
            .push("Repair or move the queue file; it is reloaded on the next write".to_string());
        self
    }
}
