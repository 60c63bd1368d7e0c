//! Configuration for the event listener

use crate::{
    container::ContainerConfig,
    health::HealthMonitorConfig,
    retry::{MaxAttempts, RetryPolicy},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable naming a TOML config file
pub const CONFIG_PATH_ENV: &str = "LISTENER_CONFIG";

/// Event listener configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Broker connection
    pub broker: BrokerConfig,

    /// Consumer settings
    pub consumer: ConsumerConfig,

    /// Retry and backoff
    pub retry: RetryConfig,

    /// Connection settings
    pub connection: ConnectionConfig,

    /// Request settings
    pub request: RequestConfig,

    /// Broker health checks
    pub health_check: HealthCheckConfig,
}

/// Broker connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrokerConfig {
    /// Broker address
    pub address: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: "nats://localhost:4222".to_string(),
        }
    }
}

/// Where a new consumer group starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoOffsetReset {
    /// From the oldest retained record
    Earliest,
    /// From records published after the consumer joined
    Latest,
}

impl FromStr for AutoOffsetReset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" => Ok(AutoOffsetReset::Earliest),
            "latest" => Ok(AutoOffsetReset::Latest),
            other => Err(Error::Config(format!(
                "autoOffsetReset must be earliest or latest, got {}",
                other
            ))),
        }
    }
}

/// Consumer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConsumerConfig {
    /// Consumer group
    pub group_id: String,

    /// Topic consumed
    pub topic: String,

    /// Start position for a new group
    pub auto_offset_reset: AutoOffsetReset,

    /// Broker-side auto commit; must stay off
    pub enable_auto_commit: bool,

    /// Records fetched per poll
    pub max_poll_records: usize,

    /// Session timeout (milliseconds)
    pub session_timeout_ms: u64,

    /// Heartbeat interval (milliseconds)
    pub heartbeat_interval_ms: u64,

    /// Worker count
    pub concurrency: usize,

    /// Poll timeout (milliseconds)
    pub poll_timeout_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: "event-listener".to_string(),
            topic: "events".to_string(),
            auto_offset_reset: AutoOffsetReset::Latest,
            enable_auto_commit: false,
            max_poll_records: 500,
            session_timeout_ms: 45_000,
            heartbeat_interval_ms: 3_000,
            concurrency: 1,
            poll_timeout_ms: 30_000,
        }
    }
}

/// Retry and backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    /// Redeliver records rejected at the health gate
    pub enabled: bool,

    /// Attempt cap; `<= 0` means 3 for redelivery, unlimited for reconnect
    pub max_attempts: i64,

    /// First reconnect delay (milliseconds)
    pub initial_interval_ms: u64,

    /// Largest reconnect delay (milliseconds)
    pub max_interval_ms: u64,

    /// Reconnect delay growth factor
    pub multiplier: f64,

    /// Pause between redeliveries and after failed polls (milliseconds)
    pub fixed_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_interval_ms: 60_000,  // 1 minute
            max_interval_ms: 300_000,     // 5 minutes
            multiplier: 1.5,
            fixed_delay_ms: 5_000,
        }
    }
}

/// Connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Connect timeout (milliseconds)
    pub timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

/// Request settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestConfig {
    /// Request timeout (milliseconds)
    pub timeout_ms: u64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { timeout_ms: 60_000 }
    }
}

/// Broker health checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HealthCheckConfig {
    /// Probe the broker at all
    pub enabled: bool,

    /// Probe timeout (milliseconds)
    pub timeout_ms: u64,

    /// Delay between periodic checks (milliseconds)
    pub interval_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 30_000,
            interval_ms: 60_000,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Defaults plus `LISTENER_*` environment overrides (`.env` honored)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Config::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// File named by `LISTENER_CONFIG` if set, then environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Config::from_file(path)?,
            Err(_) => Config::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, keyed by environment variable name
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LISTENER_BROKER_ADDRESS") {
            self.broker.address = v;
        }
        if let Some(v) = lookup("LISTENER_GROUP_ID") {
            self.consumer.group_id = v;
        }
        if let Some(v) = lookup("LISTENER_TOPIC") {
            self.consumer.topic = v;
        }
        if let Some(v) = lookup("LISTENER_AUTO_OFFSET_RESET") {
            self.consumer.auto_offset_reset = v.parse()?;
        }
        if let Some(v) = lookup("LISTENER_ENABLE_AUTO_COMMIT") {
            self.consumer.enable_auto_commit = parse("LISTENER_ENABLE_AUTO_COMMIT", &v)?;
        }
        if let Some(v) = lookup("LISTENER_MAX_POLL_RECORDS") {
            self.consumer.max_poll_records = parse("LISTENER_MAX_POLL_RECORDS", &v)?;
        }
        if let Some(v) = lookup("LISTENER_CONCURRENCY") {
            self.consumer.concurrency = parse("LISTENER_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("LISTENER_RETRY_ENABLED") {
            self.retry.enabled = parse("LISTENER_RETRY_ENABLED", &v)?;
        }
        if let Some(v) = lookup("LISTENER_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse("LISTENER_RETRY_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("LISTENER_HEALTH_CHECK_ENABLED") {
            self.health_check.enabled = parse("LISTENER_HEALTH_CHECK_ENABLED", &v)?;
        }
        if let Some(v) = lookup("LISTENER_HEALTH_CHECK_INTERVAL_MS") {
            self.health_check.interval_ms = parse("LISTENER_HEALTH_CHECK_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("LISTENER_RETRY_INITIAL_INTERVAL_MS") {
            self.retry.initial_interval_ms = parse("LISTENER_RETRY_INITIAL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("LISTENER_RETRY_MAX_INTERVAL_MS") {
            self.retry.max_interval_ms = parse("LISTENER_RETRY_MAX_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("LISTENER_RETRY_MULTIPLIER") {
            self.retry.multiplier = parse("LISTENER_RETRY_MULTIPLIER", &v)?;
        }
        if let Some(v) = lookup("LISTENER_RETRY_FIXED_DELAY_MS") {
            self.retry.fixed_delay_ms = parse("LISTENER_RETRY_FIXED_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("LISTENER_HEALTH_CHECK_TIMEOUT_MS") {
            self.health_check.timeout_ms = parse("LISTENER_HEALTH_CHECK_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("LISTENER_CONNECTION_TIMEOUT_MS") {
            self.connection.timeout_ms = parse("LISTENER_CONNECTION_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("LISTENER_REQUEST_TIMEOUT_MS") {
            self.request.timeout_ms = parse("LISTENER_REQUEST_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("LISTENER_SESSION_TIMEOUT_MS") {
            self.consumer.session_timeout_ms = parse("LISTENER_SESSION_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("LISTENER_HEARTBEAT_INTERVAL_MS") {
            self.consumer.heartbeat_interval_ms = parse("LISTENER_HEARTBEAT_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("LISTENER_POLL_TIMEOUT_MS") {
            self.consumer.poll_timeout_ms = parse("LISTENER_POLL_TIMEOUT_MS", &v)?;
        }
        Ok(())
    }

    /// Reject settings the listener cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.broker.address.trim().is_empty() {
            return Err(Error::Config("broker.address must not be empty".to_string()));
        }
        if self.consumer.topic.trim().is_empty() {
            return Err(Error::Config("consumer.topic must not be empty".to_string()));
        }
        if self.consumer.group_id.trim().is_empty() {
            return Err(Error::Config("consumer.groupId must not be empty".to_string()));
        }
        if self.consumer.enable_auto_commit {
            return Err(Error::Config(
                "consumer.enableAutoCommit must be false, offsets are committed manually"
                    .to_string(),
            ));
        }
        if self.consumer.max_poll_records == 0 {
            return Err(Error::Config("consumer.maxPollRecords must be positive".to_string()));
        }
        if self.consumer.concurrency == 0 {
            return Err(Error::Config("consumer.concurrency must be positive".to_string()));
        }
        if self.consumer.session_timeout_ms == 0 {
            return Err(Error::Config("consumer.sessionTimeoutMs must be positive".to_string()));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(Error::Config("retry.multiplier must be at least 1.0".to_string()));
        }
        if self.retry.max_interval_ms < self.retry.initial_interval_ms {
            return Err(Error::Config(
                "retry.maxIntervalMs must not be below retry.initialIntervalMs".to_string(),
            ));
        }
        if self.health_check.interval_ms == 0 || self.health_check.timeout_ms == 0 {
            return Err(Error::Config(
                "healthCheck.intervalMs and healthCheck.timeoutMs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Fixed-delay policy for general operations; `maxAttempts` counts
    /// every attempt
    pub fn fixed_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            MaxAttempts::or_default(self.retry.max_attempts),
            Duration::from_millis(self.retry.fixed_delay_ms),
        )
    }

    /// Redelivery policy for records rejected at the health gate;
    /// `maxAttempts` counts redeliveries after the first delivery
    pub fn redelivery_policy(&self) -> RetryPolicy {
        let max_attempts = if self.retry.enabled {
            MaxAttempts::from_retries(self.retry.max_attempts)
        } else {
            MaxAttempts::Limited(1)
        };
        RetryPolicy::fixed(max_attempts, Duration::from_millis(self.retry.fixed_delay_ms))
    }

    /// Backoff of the reconnect scheduler
    pub fn reconnect_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            MaxAttempts::or_unlimited(self.retry.max_attempts),
            Duration::from_millis(self.retry.initial_interval_ms),
            Duration::from_millis(self.retry.max_interval_ms),
            self.retry.multiplier,
        )
    }

    /// Bounded retry around a single health probe
    pub fn probe_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            MaxAttempts::Limited(3),
            Duration::from_secs(5),
            Duration::from_secs(20),
            2.0,
        )
    }

    /// Health monitor settings
    pub fn health_monitor_config(&self) -> HealthMonitorConfig {
        HealthMonitorConfig {
            enabled: self.health_check.enabled,
            probe_timeout: Duration::from_millis(self.health_check.timeout_ms),
            check_interval: Duration::from_millis(self.health_check.interval_ms),
            reconnect_policy: self.reconnect_policy(),
            probe_retry_policy: self.probe_retry_policy(),
        }
    }

    /// Listener container settings
    pub fn container_config(&self) -> ContainerConfig {
        ContainerConfig {
            max_poll_records: self.consumer.max_poll_records,
            poll_timeout: Duration::from_millis(self.consumer.poll_timeout_ms),
            concurrency: self.consumer.concurrency,
            error_policy: self.redelivery_policy(),
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid value for {}: {}", key, value)))
}
