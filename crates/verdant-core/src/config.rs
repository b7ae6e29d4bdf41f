//! Configuration module for Verdant.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for Verdant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub scheduler: SchedulerConfig,
    pub carbon: CarbonConfig,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
}

/// Mutation queue and sync engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Sync cycles a mutation may fail before it needs operator action.
    pub max_retries: u32,
    /// Base delay for exponential backoff between attempts (milliseconds).
    pub retry_base_delay_ms: u64,
    /// Quiet period that batches near-simultaneous adds (milliseconds).
    pub debounce_ms: u64,
    /// Delegate queue draining to the carbon-aware scheduler.
    pub carbon_aware: bool,
    /// Priority used for scheduler batches: `urgent`, `high`, `normal`, `low`, `background`.
    pub carbon_priority: String,
    /// Seconds between periodic queue polls in the daemon.
    pub poll_interval: u64,
    /// Conflict strategy: `last_write_wins` or `server_wins`.
    pub conflict_strategy: String,
    /// File holding the persisted mutation queue.
    pub queue_file: PathBuf,
    /// Queue age after which a mutation is reported as stale (hours).
    pub stale_after_hours: u64,
}

/// Carbon-aware scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Adjust scores for network quality.
    pub network_aware: bool,
    /// Adjust scores for battery level and charging.
    pub battery_aware: bool,
    /// Live score above which the sweep runs a deferred task early.
    pub optimal_score_threshold: f64,
    /// Minutes between carbon data refreshes.
    pub carbon_refresh_minutes: u64,
    /// Minutes between device condition refreshes.
    pub device_refresh_minutes: u64,
    /// Seconds between queue sweeps.
    pub sweep_interval_secs: u64,
    /// Attempts per task before it is dropped.
    pub max_task_attempts: u32,
    /// Sub-tasks run together before pausing, for batch tasks.
    pub batch_chunk_size: usize,
    /// Pause between batch chunks (milliseconds).
    pub batch_pacing_ms: u64,
}

/// Carbon intensity data sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CarbonConfig {
    /// Grid region code passed to providers.
    pub region: String,
    /// Primary grid operator API, tried first.
    pub grid_api: Option<ProviderEndpoint>,
    /// Third-party services, tried in order after the grid API.
    pub services: Vec<ProviderEndpoint>,
    /// Per-request timeout (seconds).
    pub request_timeout_secs: u64,
}

/// An HTTP carbon intensity endpoint returning `{"intensity": <gCO2/kWh>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Remote sync endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// URL receiving mutation records as JSON. `None` until configured.
    pub endpoint: Option<String>,
    /// Per-request timeout (seconds).
    pub timeout_secs: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/verdant/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("verdant")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_ms: 1000,
            debounce_ms: 100,
            carbon_aware: false,
            carbon_priority: "normal".to_string(),
            poll_interval: 30,
            conflict_strategy: "last_write_wins".to_string(),
            queue_file: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("verdant")
                .join("mutations.json"),
            stale_after_hours: 24,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            network_aware: true,
            battery_aware: true,
            optimal_score_threshold: 80.0,
            carbon_refresh_minutes: 30,
            device_refresh_minutes: 5,
            sweep_interval_secs: 60,
            max_task_attempts: 3,
            batch_chunk_size: 10,
            batch_pacing_ms: 100,
        }
    }
}

impl Default for CarbonConfig {
    fn default() -> Self {
        Self {
            region: "default".to_string(),
            grid_api: None,
            services: Vec::new(),
            request_timeout_secs: 10,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.max_retries"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `sync.conflict_strategy`.
const VALID_CONFLICT_STRATEGIES: &[&str] = &["last_write_wins", "server_wins"];

/// Valid values for `sync.carbon_priority`.
const VALID_PRIORITIES: &[&str] = &["urgent", "high", "normal", "low", "background"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid. Callers may still
    /// start with an invalid strategy or priority: those fall back to safe
    /// defaults at runtime with a warning.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if self.sync.max_retries == 0 {
            errors.push(ValidationError {
                field: "sync.max_retries".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.retry_base_delay_ms == 0 {
            errors.push(ValidationError {
                field: "sync.retry_base_delay_ms".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.poll_interval == 0 {
            errors.push(ValidationError {
                field: "sync.poll_interval".into(),
                message: "must be greater than 0".into(),
            });
        }
        if !VALID_CONFLICT_STRATEGIES.contains(&self.sync.conflict_strategy.as_str()) {
            errors.push(ValidationError {
                field: "sync.conflict_strategy".into(),
                message: format!(
                    "invalid strategy '{}'; valid options: {}",
                    self.sync.conflict_strategy,
                    VALID_CONFLICT_STRATEGIES.join(", ")
                ),
            });
        }
        if !VALID_PRIORITIES.contains(&self.sync.carbon_priority.as_str()) {
            errors.push(ValidationError {
                field: "sync.carbon_priority".into(),
                message: format!(
                    "invalid priority '{}'; valid options: {}",
                    self.sync.carbon_priority,
                    VALID_PRIORITIES.join(", ")
                ),
            });
        }

        // --- scheduler ---
        if self.scheduler.carbon_refresh_minutes == 0 {
            errors.push(ValidationError {
                field: "scheduler.carbon_refresh_minutes".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.scheduler.device_refresh_minutes == 0 {
            errors.push(ValidationError {
                field: "scheduler.device_refresh_minutes".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.scheduler.sweep_interval_secs == 0 {
            errors.push(ValidationError {
                field: "scheduler.sweep_interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.scheduler.max_task_attempts == 0 {
            errors.push(ValidationError {
                field: "scheduler.max_task_attempts".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.scheduler.batch_chunk_size == 0 {
            errors.push(ValidationError {
                field: "scheduler.batch_chunk_size".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- carbon ---
        let endpoints = self.carbon.grid_api.iter().chain(self.carbon.services.iter());
        for (idx, endpoint) in endpoints.enumerate() {
            if !endpoint.url.starts_with("http://") && !endpoint.url.starts_with("https://") {
                errors.push(ValidationError {
                    field: format!("carbon.providers[{idx}].url"),
                    message: format!("not an http(s) URL: {}", endpoint.url),
                });
            }
        }

        // --- transport ---
        if let Some(endpoint) = &self.transport.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                errors.push(ValidationError {
                    field: "transport.endpoint".into(),
                    message: format!("not an http(s) URL: {endpoint}"),
                });
            }
        }
        if self.transport.timeout_secs == 0 {
            errors.push(ValidationError {
                field: "transport.timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use verdant_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .sync_max_retries(5)
///     .sync_carbon_aware(true)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_max_retries(mut self, n: u32) -> Self {
        self.config.sync.max_retries = n;
        self
    }

    pub fn sync_retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.sync.retry_base_delay_ms = ms;
        self
    }

    pub fn sync_debounce_ms(mut self, ms: u64) -> Self {
        self.config.sync.debounce_ms = ms;
        self
    }

    pub fn sync_carbon_aware(mut self, enabled: bool) -> Self {
        self.config.sync.carbon_aware = enabled;
        self
    }

    pub fn sync_carbon_priority(mut self, priority: impl Into<String>) -> Self {
        self.config.sync.carbon_priority = priority.into();
        self
    }

    pub fn sync_conflict_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.config.sync.conflict_strategy = strategy.into();
        self
    }

    pub fn sync_queue_file(mut self, path: PathBuf) -> Self {
        self.config.sync.queue_file = path;
        self
    }

    // --- scheduler ---

    pub fn scheduler_network_aware(mut self, enabled: bool) -> Self {
        self.config.scheduler.network_aware = enabled;
        self
    }

    pub fn scheduler_battery_aware(mut self, enabled: bool) -> Self {
        self.config.scheduler.battery_aware = enabled;
        self
    }

    pub fn scheduler_max_task_attempts(mut self, n: u32) -> Self {
        self.config.scheduler.max_task_attempts = n;
        self
    }

    // --- carbon ---

    pub fn carbon_grid_api(mut self, endpoint: ProviderEndpoint) -> Self {
        self.config.carbon.grid_api = Some(endpoint);
        self
    }

    pub fn carbon_service(mut self, endpoint: ProviderEndpoint) -> Self {
        self.config.carbon.services.push(endpoint);
        self
    }

    // --- transport ---

    pub fn transport_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.transport.endpoint = Some(url.into());
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
