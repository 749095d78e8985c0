use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::batch::{BatchConfig, RetryPolicy};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchSettings {
    /// Maximum records per flushed batch
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Oldest-record age in milliseconds that triggers a flush
    #[serde(default = "default_max_wait_time_ms")]
    pub max_wait_time_ms: u64,
}

fn default_max_batch_size() -> usize {
    50
}

fn default_max_wait_time_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Consecutive failed flushes before pending records are marked failed
    #[serde(default = "default_failures_before_mark")]
    pub failures_before_mark: u32,
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    30_000 // 30 seconds
}

fn default_max_retries() -> u32 {
    3
}

fn default_failures_before_mark() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// How often the flush task checks time triggers, in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_tick_interval_ms() -> u64 {
    25
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Timeout for pushing one batch onto a connection channel
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

fn default_send_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Fraction of traces sampled, 0.0 to 1.0
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "ara-batch-delivery".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("batch.max_batch_size", default_max_batch_size() as u64)?
            .set_default("batch.max_wait_time_ms", default_max_wait_time_ms())?
            .set_default("retry.base_delay_ms", default_base_delay_ms())?
            .set_default("retry.max_delay_ms", default_max_delay_ms())?
            .set_default("retry.max_retries", default_max_retries() as u64)?
            .set_default("retry.failures_before_mark", default_failures_before_mark() as u64)?
            .set_default("scheduler.tick_interval_ms", default_tick_interval_ms())?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // ARA_BATCH__MAX_BATCH_SIZE, ARA_RETRY__MAX_RETRIES, ARA_OTEL__ENABLED, etc.
            .add_source(
                Environment::with_prefix("ARA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            max_batch_size: self.batch.max_batch_size.max(1),
            max_wait_time: Duration::from_millis(self.batch.max_wait_time_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            max_retries: self.retry.max_retries,
            failures_before_mark: self.retry.failures_before_mark.max(1),
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_wait_time_ms: default_max_wait_time_ms(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: default_max_retries(),
            failures_before_mark: default_failures_before_mark(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
