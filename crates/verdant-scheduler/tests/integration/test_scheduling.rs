//! End-to-end scheduling through the public API

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use wiremock::MockServer;

use verdant_core::config::{CarbonConfig, SchedulerConfig};
use verdant_core::ports::{BatteryStatus, DeviceConditions, NetworkQuality};
use verdant_scheduler::{
    CarbonAwareScheduler, CarbonDataService, CarbonForecast, DataSource, ForecastSlot, Priority,
    ScheduleOptions, ScheduleOutcome, StaticDeviceProbe, TaskSpec, TaskWork,
};

use crate::common::{endpoint, mount_intensity, CountingRunner};

fn scheduler_with(
    carbon: CarbonDataService,
    probe: Arc<StaticDeviceProbe>,
) -> CarbonAwareScheduler {
    CarbonAwareScheduler::new(SchedulerConfig::default(), carbon, probe)
}

#[tokio::test]
async fn test_initialize_uses_measured_intensity() {
    let server = MockServer::start().await;
    mount_intensity(&server, 200, serde_json::json!({"intensity": 120.0})).await;

    let carbon = CarbonDataService::from_config(&CarbonConfig {
        grid_api: Some(endpoint("grid", &server)),
        ..CarbonConfig::default()
    });
    let probe = Arc::new(StaticDeviceProbe::new(DeviceConditions {
        network: NetworkQuality::Fast,
        battery: Some(BatteryStatus {
            level: 0.9,
            charging: true,
        }),
    }));
    let scheduler = scheduler_with(carbon, probe);
    scheduler.initialize().await;

    assert!(scheduler.current_forecast().has_measurements());
    assert_eq!(scheduler.conditions().network, NetworkQuality::Fast);

    let runner = Arc::new(CountingRunner::default());
    let outcome = scheduler
        .schedule_task(
            TaskSpec::new("backup", TaskWork::Single(runner.clone())),
            Priority::Urgent,
            ScheduleOptions::default(),
        )
        .await
        .unwrap();

    let ScheduleOutcome::Executed(report) = outcome else {
        panic!("urgent task must run inline");
    };
    assert_eq!(runner.calls(), 1);
    assert!(report.source.is_measured());
    assert!(report.carbon_saved > 0.0);
    assert!(scheduler.stats().carbon_saved_measured > 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_priorities_bound_the_deferral() {
    let scheduler = scheduler_with(
        CarbonDataService::default(),
        Arc::new(StaticDeviceProbe::default()),
    );
    // Dirty grid for 12 hours, clean afterwards
    let now = Utc::now();
    let slots = (0..24)
        .map(|h| ForecastSlot::new(h, if h < 12 { 450.0 } else { 150.0 }, DataSource::Simulated))
        .collect();
    scheduler.set_forecast(CarbonForecast::new(now, slots));

    let normal = Arc::new(CountingRunner::default());
    let background = Arc::new(CountingRunner::default());

    let normal_at = match scheduler
        .schedule_task(
            TaskSpec::new("sync", TaskWork::Single(normal.clone())),
            Priority::Normal,
            ScheduleOptions::default(),
        )
        .await
        .unwrap()
    {
        ScheduleOutcome::Scheduled { at, .. } => at,
        other => panic!("expected deferral, got {other:?}"),
    };
    let background_at = match scheduler
        .schedule_task(
            TaskSpec::new("sync", TaskWork::Single(background.clone())),
            Priority::Background,
            ScheduleOptions::default(),
        )
        .await
        .unwrap()
    {
        ScheduleOutcome::Scheduled { at, .. } => at,
        other => panic!("expected deferral, got {other:?}"),
    };

    // Normal may not wait for the clean window 12h out
    assert!(normal_at <= now + Duration::hours(6));
    assert_eq!(background_at, now + Duration::hours(12));

    let status = scheduler.queue_status();
    assert_eq!(status.total, 2);
    assert_eq!(status.per_priority[&Priority::Background], 1);

    tokio::time::sleep(StdDuration::from_secs(13 * 3600)).await;
    assert_eq!(normal.calls(), 1);
    assert_eq!(background.calls(), 1);
    assert_eq!(scheduler.queue_status().total, 0);
    assert_eq!(scheduler.stats().tasks_executed, 2);
}

#[tokio::test(start_paused = true)]
async fn test_custom_max_delay_overrides_priority_default() {
    let scheduler = scheduler_with(
        CarbonDataService::default(),
        Arc::new(StaticDeviceProbe::default()),
    );
    let now = Utc::now();
    scheduler.set_forecast(CarbonForecast::new(
        now,
        vec![
            ForecastSlot::new(0, 450.0, DataSource::Simulated),
            ForecastSlot::new(3, 150.0, DataSource::Simulated),
        ],
    ));

    let runner = Arc::new(CountingRunner::default());
    let outcome = scheduler
        .schedule_task(
            TaskSpec::new("sync", TaskWork::Single(runner.clone())),
            Priority::Background,
            ScheduleOptions::with_max_delay(Duration::hours(2)),
        )
        .await
        .unwrap();

    let ScheduleOutcome::Scheduled { at, .. } = outcome else {
        panic!("expected deferral");
    };
    assert!(at < now + Duration::hours(3));
}
