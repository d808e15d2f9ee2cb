//! Configuration management for the Herald campaign worker.

use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use herald_delivery::{
    stats::DEFAULT_STATS_CHANNEL, ConsumerConfig, GatewayConfig, ProcessorConfig,
    RateLimitConfig, WorkerConfig, MAX_TEMPLATE_PARAMS,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "herald.toml";

/// Complete worker configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`herald.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Only `DATABASE_URL` normally needs to be set for a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Database
    /// PostgreSQL connection URL.
    ///
    /// Environment variable: `DATABASE_URL`
    #[serde(default = "default_database_url", alias = "DATABASE_URL")]
    pub database_url: String,
    /// Maximum number of database connections in the pool.
    ///
    /// Environment variable: `DATABASE_MAX_CONNECTIONS`
    #[serde(default = "default_max_connections", alias = "DATABASE_MAX_CONNECTIONS")]
    pub database_max_connections: u32,
    /// Minimum number of connections to maintain in the pool.
    ///
    /// Environment variable: `DATABASE_MIN_CONNECTIONS`
    #[serde(default = "default_min_connections", alias = "DATABASE_MIN_CONNECTIONS")]
    pub database_min_connections: u32,
    /// Database connection acquire timeout in seconds.
    ///
    /// Environment variable: `DATABASE_CONNECTION_TIMEOUT`
    #[serde(default = "default_acquire_timeout", alias = "DATABASE_CONNECTION_TIMEOUT")]
    pub database_connection_timeout: u64,

    // Worker
    /// Lease owner name for this process. A random name is generated when
    /// unset.
    ///
    /// Environment variable: `WORKER_ID`
    #[serde(default, alias = "WORKER_ID")]
    pub worker_id: Option<String>,
    /// Pause between queue polls when no job is waiting, in milliseconds.
    ///
    /// Environment variable: `POLL_INTERVAL_MS`
    #[serde(default = "default_poll_interval_ms", alias = "POLL_INTERVAL_MS")]
    pub poll_interval_ms: u64,
    /// Pause after a queue error, in milliseconds.
    ///
    /// Environment variable: `ERROR_BACKOFF_MS`
    #[serde(default = "default_error_backoff_ms", alias = "ERROR_BACKOFF_MS")]
    pub error_backoff_ms: u64,
    /// How long a claimed job stays hidden from other workers, in seconds.
    ///
    /// Environment variable: `JOB_VISIBILITY_TIMEOUT_SECONDS`
    #[serde(default = "default_visibility_timeout", alias = "JOB_VISIBILITY_TIMEOUT_SECONDS")]
    pub job_visibility_timeout_seconds: u64,
    /// Campaign lease lifetime, renewed before every recipient, in seconds.
    ///
    /// Environment variable: `LEASE_TTL_SECONDS`
    #[serde(default = "default_lease_ttl", alias = "LEASE_TTL_SECONDS")]
    pub lease_ttl_seconds: u64,
    /// Grace period for the in-flight campaign on shutdown, in seconds.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECONDS`
    #[serde(default = "default_shutdown_timeout", alias = "SHUTDOWN_TIMEOUT_SECONDS")]
    pub shutdown_timeout_seconds: u64,

    // Templates
    /// Highest positional template parameter sent to the provider.
    ///
    /// Environment variable: `MAX_TEMPLATE_PARAMS`
    #[serde(default = "default_max_template_params", alias = "MAX_TEMPLATE_PARAMS")]
    pub max_template_params: usize,

    // Rate limiting
    /// One of `fixed_interval`, `token_bucket` or `disabled`.
    ///
    /// Environment variable: `RATE_LIMIT_STRATEGY`
    #[serde(default = "default_rate_limit_strategy", alias = "RATE_LIMIT_STRATEGY")]
    pub rate_limit_strategy: String,
    /// Pause after each send for the `fixed_interval` strategy, in
    /// milliseconds.
    ///
    /// Environment variable: `SEND_INTERVAL_MS`
    #[serde(default = "default_send_interval_ms", alias = "SEND_INTERVAL_MS")]
    pub send_interval_ms: u64,
    /// Burst size for the `token_bucket` strategy.
    ///
    /// Environment variable: `TOKEN_BUCKET_CAPACITY`
    #[serde(default = "default_bucket_capacity", alias = "TOKEN_BUCKET_CAPACITY")]
    pub token_bucket_capacity: u32,
    /// Tokens added per second for the `token_bucket` strategy.
    ///
    /// Environment variable: `TOKEN_BUCKET_REFILL_PER_SECOND`
    #[serde(default = "default_bucket_refill", alias = "TOKEN_BUCKET_REFILL_PER_SECOND")]
    pub token_bucket_refill_per_second: f64,

    // Gateway
    /// Provider API base URL.
    ///
    /// Environment variable: `GATEWAY_BASE_URL`
    #[serde(default = "default_gateway_base_url", alias = "GATEWAY_BASE_URL")]
    pub gateway_base_url: String,
    /// Per-request provider timeout in seconds.
    ///
    /// Environment variable: `GATEWAY_TIMEOUT_SECONDS`
    #[serde(default = "default_gateway_timeout", alias = "GATEWAY_TIMEOUT_SECONDS")]
    pub gateway_timeout_seconds: u64,

    // Stats
    /// Postgres `NOTIFY` channel for progress snapshots.
    ///
    /// Environment variable: `STATS_CHANNEL`
    #[serde(default = "default_stats_channel", alias = "STATS_CHANNEL")]
    pub stats_channel: String,

    // Logging
    /// Log level configuration.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Load configuration from defaults, config file, and environment variable
    /// overrides.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Convert to the processor configuration.
    pub fn to_processor_config(&self) -> ProcessorConfig {
        let defaults = ProcessorConfig::default();
        ProcessorConfig {
            worker_id: self.worker_id.clone().unwrap_or(defaults.worker_id),
            max_template_params: self.max_template_params,
            lease_ttl: Duration::from_secs(self.lease_ttl_seconds),
        }
    }

    /// Convert to the consumer loop configuration.
    pub fn to_consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            error_backoff: Duration::from_millis(self.error_backoff_ms),
            heartbeat_interval: self.job_visibility_timeout() / 3,
        }
    }

    /// Convert to the worker lifecycle configuration.
    pub fn to_worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            consumer: self.to_consumer_config(),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_seconds),
        }
    }

    /// Convert to the provider gateway configuration.
    pub fn to_gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.gateway_base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(self.gateway_timeout_seconds),
            ..GatewayConfig::default()
        }
    }

    /// Job visibility timeout for the Postgres queue.
    pub fn job_visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.job_visibility_timeout_seconds)
    }

    /// Rate limiter selected by `rate_limit_strategy`.
    pub fn rate_limit(&self) -> Result<RateLimitConfig> {
        let config = match self.rate_limit_strategy.as_str() {
            "fixed_interval" => RateLimitConfig::FixedInterval { interval_ms: self.send_interval_ms },
            "token_bucket" => RateLimitConfig::TokenBucket {
                capacity: self.token_bucket_capacity,
                refill_per_second: self.token_bucket_refill_per_second,
            },
            "disabled" => RateLimitConfig::Disabled,
            other => anyhow::bail!("unknown rate_limit_strategy '{other}'"),
        };
        Ok(config)
    }

    /// Get database URL with password masked for logging.
    pub fn database_url_masked(&self) -> String {
        let userinfo_start = self.database_url.find("://").map_or(0, |pos| pos + 3);
        if let Some(at_pos) = self.database_url.find('@') {
            if let Some(colon_pos) = self.database_url[..at_pos].rfind(':') {
                if colon_pos < userinfo_start {
                    return self.database_url.clone();
                }
                let mut masked = self.database_url.clone();
                masked.replace_range(colon_pos + 1..at_pos, "***");
                return masked;
            }
        }
        self.database_url.clone()
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.database_max_connections == 0 {
            anyhow::bail!("database max_connections must be greater than 0");
        }

        if self.database_min_connections > self.database_max_connections {
            anyhow::bail!("database min_connections cannot exceed max_connections");
        }

        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than 0");
        }

        if self.lease_ttl_seconds == 0 {
            anyhow::bail!("lease_ttl_seconds must be greater than 0");
        }

        if self.job_visibility_timeout_seconds == 0 {
            anyhow::bail!("job_visibility_timeout_seconds must be greater than 0");
        }

        if self.worker_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            anyhow::bail!("worker_id must not be blank");
        }

        if self.gateway_base_url.is_empty() {
            anyhow::bail!("gateway_base_url must be set");
        }

        if self.stats_channel.is_empty() {
            anyhow::bail!("stats_channel must be set");
        }

        self.rate_limit()?.validate().context("invalid rate limit settings")?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            database_max_connections: default_max_connections(),
            database_min_connections: default_min_connections(),
            database_connection_timeout: default_acquire_timeout(),
            worker_id: None,
            poll_interval_ms: default_poll_interval_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            job_visibility_timeout_seconds: default_visibility_timeout(),
            lease_ttl_seconds: default_lease_ttl(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            max_template_params: default_max_template_params(),
            rate_limit_strategy: default_rate_limit_strategy(),
            send_interval_ms: default_send_interval_ms(),
            token_bucket_capacity: default_bucket_capacity(),
            token_bucket_refill_per_second: default_bucket_refill(),
            gateway_base_url: default_gateway_base_url(),
            gateway_timeout_seconds: default_gateway_timeout(),
            stats_channel: default_stats_channel(),
            rust_log: default_log_level(),
        }
    }
}

fn default_database_url() -> String {
    "postgresql://localhost/herald".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    herald_delivery::DEFAULT_POLL_INTERVAL_MS
}

fn default_error_backoff_ms() -> u64 {
    herald_delivery::DEFAULT_ERROR_BACKOFF_SECONDS * 1000
}

fn default_visibility_timeout() -> u64 {
    herald_delivery::DEFAULT_VISIBILITY_TIMEOUT_SECONDS
}

fn default_lease_ttl() -> u64 {
    herald_delivery::DEFAULT_LEASE_TTL_SECONDS
}

fn default_shutdown_timeout() -> u64 {
    herald_delivery::DEFAULT_SHUTDOWN_TIMEOUT_SECONDS
}

fn default_max_template_params() -> usize {
    MAX_TEMPLATE_PARAMS
}

fn default_rate_limit_strategy() -> String {
    "fixed_interval".to_string()
}

fn default_send_interval_ms() -> u64 {
    herald_delivery::DEFAULT_SEND_INTERVAL_MS
}

fn default_bucket_capacity() -> u32 {
    10
}

fn default_bucket_refill() -> f64 {
    10.0
}

fn default_gateway_base_url() -> String {
    GatewayConfig::default().base_url
}

fn default_gateway_timeout() -> u64 {
    herald_delivery::DEFAULT_TIMEOUT_SECONDS
}

fn default_stats_channel() -> String {
    DEFAULT_STATS_CHANNEL.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
