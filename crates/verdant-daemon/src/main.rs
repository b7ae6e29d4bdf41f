//! Verdant Daemon - Background mutation sync service
//!
//! Runs the sync engine against the configured HTTP endpoint:
//! - Loads the persisted mutation queue and drains it on a poll interval
//! - Optionally defers batches to the carbon-aware scheduler
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon wires adapters from configuration, builds the `SyncEngine`,
//! then enters a main loop that periodically processes the queue. The loop
//! and the scheduler's maintenance task are controlled by a
//! `CancellationToken` triggered on receipt of SIGTERM or SIGINT.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use verdant_conflict::{ConflictDetector, ConflictResolver, ConflictStrategy};
use verdant_core::{
    config::{Config, LoggingConfig},
    domain::{HealthLevel, SyncEvent, SyncEventKind, SyncStatus},
};
use verdant_scheduler::{CarbonAwareScheduler, CarbonDataService, StaticDeviceProbe};
use verdant_sync::{
    HttpSyncTransport, JsonFileMutationStore, ManualNetworkObserver, ProcessOptions, SyncEngine,
    Subscription,
};

// ============================================================================
// Command line
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "verdantd", version, about = "Offline mutation sync daemon")]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, short = 'c', value_name = "PATH")]
    config: Option<PathBuf>,

    /// Defer sync batches to low-carbon windows
    #[arg(long)]
    carbon_aware: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }

    /// Command line flags win over the file
    fn apply_overrides(&self, config: &mut Config) {
        if self.carbon_aware {
            config.sync.carbon_aware = true;
        }
        if self.json_logs {
            config.logging.json = true;
        }
    }
}

// ============================================================================
// Logging
// ============================================================================

/// `RUST_LOG` if set, otherwise the configured level
fn env_filter(logging: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
}

fn init_tracing(logging: &LoggingConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(logging))
        .with_target(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the engine, the optional scheduler and the shutdown token
struct DaemonService {
    config: Config,
    engine: SyncEngine,
    scheduler: Option<CarbonAwareScheduler>,
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Builds adapters from configuration and loads the persisted queue
    async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        for problem in config.validate() {
            warn!(%problem, "Configuration problem, using fallback where possible");
        }

        let transport = HttpSyncTransport::from_config(&config.transport)
            .context("Cannot start without a sync endpoint")?;
        info!(endpoint = %transport.endpoint(), "Using HTTP transport");

        let store = JsonFileMutationStore::new(&config.sync.queue_file);
        info!(queue_file = %store.path().display(), "Using persisted queue");

        let resolver = ConflictResolver::new(
            ConflictStrategy::from_config(&config.sync.conflict_strategy),
            ConflictDetector::timestamp(),
        );

        let scheduler = config.sync.carbon_aware.then(|| {
            let carbon = CarbonDataService::from_config(&config.carbon);
            info!(
                providers = carbon.provider_count(),
                region = %config.carbon.region,
                "Carbon-aware scheduling enabled"
            );
            CarbonAwareScheduler::new(
                config.scheduler.clone(),
                carbon,
                Arc::new(StaticDeviceProbe::default()),
            )
        });

        let mut builder = SyncEngine::builder()
            .config(config.sync.clone())
            .store(Arc::new(store))
            .transport(Arc::new(transport))
            .conflict_resolver(resolver)
            .network_observer(Arc::new(ManualNetworkObserver::online()));
        if let Some(scheduler) = &scheduler {
            builder = builder.scheduler(scheduler.clone());
        }

        let engine = builder.build().await.context("Failed to start sync engine")?;

        Ok(Self {
            config,
            engine,
            scheduler,
            shutdown,
        })
    }

    /// Runs until the shutdown token is cancelled
    async fn run(&self) -> Result<()> {
        let maintenance = match &self.scheduler {
            Some(scheduler) => {
                scheduler.initialize().await;
                Some(scheduler.start(self.shutdown.child_token()))
            }
            None => None,
        };

        let _state_log = self.log_state_changes();

        let result = self.sync_loop().await;

        if let Some(handle) = maintenance {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler maintenance task panicked");
            }
        }

        let state = self.engine.sync_state();
        info!(pending = state.pending, status = %state.status, "Sync engine stopped");
        result
    }

    fn log_state_changes(&self) -> Subscription {
        self.engine
            .add_event_listener(SyncEventKind::StatusChange, |event| {
                if let SyncEvent::StatusChange { previous, current } = event {
                    match current {
                        SyncStatus::Error => {
                            error!(from = %previous, "Sync needs attention");
                        }
                        _ => info!(from = %previous, to = %current, "Sync status changed"),
                    }
                }
            })
    }

    /// Periodically drains the queue
    ///
    /// The first tick fires immediately so a queue left over from the
    /// previous run is sent right away.
    async fn sync_loop(&self) -> Result<()> {
        let poll_secs = self.config.sync.poll_interval.max(1);
        info!(poll_interval_secs = poll_secs, "Starting sync loop");

        let mut interval = tokio::time::interval(Duration::from_secs(poll_secs));

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
            }

            match self.engine.process_queue(ProcessOptions::default()).await {
                Ok(state) => {
                    info!(
                        status = %state.status,
                        pending = state.pending,
                        "Poll completed"
                    );
                }
                Err(e) => {
                    error!(error = %format!("{e:#}"), "Poll failed");
                }
            }

            let health = self.engine.get_health_status().await;
            if health.status != HealthLevel::Healthy {
                warn!(
                    status = %health.status,
                    issues = ?health.issues,
                    "Sync health degraded"
                );
            }
        }

        info!("Sync loop terminated");
        Ok(())
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config_path();
    let mut config = Config::load_or_default(&config_path);
    args.apply_overrides(&mut config);

    init_tracing(&config.logging);
    info!(config_path = %config_path.display(), "Verdant daemon starting (verdantd)");

    let shutdown_token = CancellationToken::new();

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, shutdown_token.clone()).await?;
    let result = service.run().await;

    match &result {
        Ok(()) => info!("Verdant daemon shut down gracefully"),
        Err(e) => error!(error = %e, "Verdant daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
