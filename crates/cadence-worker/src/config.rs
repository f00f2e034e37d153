use chrono::Duration as ChronoDuration;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use cadence_core::models::RetryConfig;
use cadence_core::service::ServiceConfig;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub storage_dsn: String,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub availability_timeout_secs: i64,
    pub worker_id: Option<String>,
    pub retry: RetryConfigRaw,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            availability_timeout_secs: 300,
            worker_id: None,
            retry: RetryConfigRaw::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfigRaw {
    pub max_retries: i64,
    pub base_delay_secs: i64,
    pub max_delay_secs: i64,
}

impl Default for RetryConfigRaw {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_secs: 1,
            max_delay_secs: 300,
        }
    }
}

impl RetryConfigRaw {
    fn into_retry_config(self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: ChronoDuration::seconds(self.base_delay_secs),
            max_delay: ChronoDuration::seconds(self.max_delay_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub sync_horizon_days: i64,
    pub async_horizon_days: i64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            sync_horizon_days: 7,
            async_horizon_days: 90,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl AppConfig {
    /// Layers a `cadence.toml` file (if present) under `CADENCE_`-prefixed
    /// environment variables, nested fields separated by `__`
    /// (e.g. `CADENCE_WORKER__RETRY__MAX_RETRIES`).
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("cadence.toml"))
            .merge(Env::prefixed("CADENCE_").split("__"))
            .extract()
    }

    pub fn worker_id(&self) -> String {
        self.worker
            .worker_id
            .clone()
            .unwrap_or_else(default_worker_id)
    }

    pub fn to_service_config(&self) -> ServiceConfig {
        ServiceConfig {
            async_horizon_days: self.generation.async_horizon_days,
            worker_id: self.worker_id(),
            lease_duration: ChronoDuration::seconds(self.worker.availability_timeout_secs),
            retry_config: self.worker.retry.clone().into_retry_config(),
        }
    }

    pub fn scheduler_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.scheduler.interval_secs)
    }
}

/// Falls back through a couple of common ways to name the host, the same
/// multi-method-then-fallback shape the CLI uses to detect a timezone when
/// none is configured.
fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "cadence-worker".to_string());
    format!("{host}:{}", std::process::id())
}
