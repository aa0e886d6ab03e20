//! Pool configuration types
//!
//! Durations are stored as milliseconds so the configuration round-trips
//! cleanly through TOML and JSON; accessors hand out `Duration`s. A value of
//! zero disables the corresponding feature unless noted otherwise.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use shardpool_core::{Credentials, Endpoint, Result, ShardpoolError};

use crate::retry::RetryPolicy;

const DEFAULT_POOL_NAME: &str = "shardpool";
const DEFAULT_MAX_CONNECTIONS: usize = 10;
const DEFAULT_ACQUIRE_RETRY_DELAY_MS: u64 = 7_000;

/// Order in which free leases are handed out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceOrder {
    /// Oldest returned lease first
    #[default]
    Fifo,
    /// Most recently returned lease first
    Lifo,
}

/// Acquisition algorithm used by `get_connection`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Poll the preferred partition, scan the others, then wait
    #[default]
    Default,
    /// Pin one lease per caller on top of the default algorithm
    Cached,
}

/// Configuration for a partitioned connection pool
///
/// Controls sizing, maintenance intervals, timeouts, and retry behavior.
/// Out-of-range values are corrected by [`PoolConfig::sanitized`] when the
/// pool is built; construction never fails because of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Label used in log fields
    pool_name: String,
    /// Database location passed to the driver
    endpoint: Endpoint,
    /// Credentials passed to the driver
    credentials: Credentials,
    /// Number of independent partitions
    partition_count: usize,
    /// Connections each partition opens up front and keeps open
    min_connections_per_partition: usize,
    /// Hard cap on connections per partition
    max_connections_per_partition: usize,
    /// Connections opened per growth step
    acquire_increment: usize,
    /// How often idle connections are probed
    idle_connection_test_period_ms: u64,
    /// Idle time after which surplus connections are closed
    idle_max_age_ms: u64,
    /// Age after which a connection is closed regardless of activity
    max_connection_age_ms: u64,
    /// Cached statements kept per distinct SQL on each connection
    statements_cache_size: usize,
    /// Release helper tasks per partition
    release_helper_threads: usize,
    /// Retries after a failed connection attempt
    acquire_retry_attempts: u32,
    /// Delay before the first retry
    acquire_retry_delay_ms: u64,
    /// Growth factor applied to the retry delay (1.0 keeps it fixed)
    acquire_retry_multiplier: f64,
    /// Maximum wait for a free connection (0 waits forever)
    connection_timeout_ms: u64,
    /// Return `None` instead of an error when the wait times out
    null_on_connection_timeout: bool,
    /// Statement used by the liveness probe instead of the driver ping
    connection_test_statement: Option<String>,
    /// Upper bound on a single liveness probe
    liveness_probe_timeout_ms: u64,
    /// Order in which free connections are handed out
    service_order: ServiceOrder,
    /// Acquisition algorithm
    strategy: StrategyKind,
    /// Skip opening the minimum connections at construction
    lazy_init: bool,
}

impl PoolConfig {
    /// Create a new configuration with the given per-partition bounds
    ///
    /// Bounds are not validated here; see [`PoolConfig::sanitized`].
    pub fn new(min_connections_per_partition: usize, max_connections_per_partition: usize) -> Self {
        Self {
            pool_name: DEFAULT_POOL_NAME.to_string(),
            endpoint: Endpoint::default(),
            credentials: Credentials::default(),
            partition_count: 1,
            min_connections_per_partition,
            max_connections_per_partition,
            acquire_increment: 2,
            idle_connection_test_period_ms: 240 * 60_000,
            idle_max_age_ms: 60 * 60_000,
            max_connection_age_ms: 0,
            statements_cache_size: 0,
            release_helper_threads: 0,
            acquire_retry_attempts: 5,
            acquire_retry_delay_ms: DEFAULT_ACQUIRE_RETRY_DELAY_MS,
            acquire_retry_multiplier: 1.0,
            connection_timeout_ms: 0,
            null_on_connection_timeout: false,
            connection_test_statement: None,
            liveness_probe_timeout_ms: 5_000,
            service_order: ServiceOrder::Fifo,
            strategy: StrategyKind::Default,
            lazy_init: false,
        }
    }

    /// Parse a configuration from TOML
    ///
    /// Missing keys take their default values.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| ShardpoolError::Configuration(e.to_string()))
    }

    pub fn with_pool_name(mut self, name: impl Into<String>) -> Self {
        self.pool_name = name.into();
        self
    }

    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Endpoint::new(url);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_partition_count(mut self, count: usize) -> Self {
        self.partition_count = count;
        self
    }

    pub fn with_acquire_increment(mut self, increment: usize) -> Self {
        self.acquire_increment = increment;
        self
    }

    pub fn with_idle_connection_test_period_ms(mut self, period_ms: u64) -> Self {
        self.idle_connection_test_period_ms = period_ms;
        self
    }

    pub fn with_idle_max_age_ms(mut self, age_ms: u64) -> Self {
        self.idle_max_age_ms = age_ms;
        self
    }

    pub fn with_max_connection_age_ms(mut self, age_ms: u64) -> Self {
        self.max_connection_age_ms = age_ms;
        self
    }

    pub fn with_statements_cache_size(mut self, size: usize) -> Self {
        self.statements_cache_size = size;
        self
    }

    pub fn with_release_helper_threads(mut self, threads: usize) -> Self {
        self.release_helper_threads = threads;
        self
    }

    /// Set the retry budget for opening connections
    pub fn with_acquire_retry(mut self, attempts: u32, delay_ms: u64) -> Self {
        self.acquire_retry_attempts = attempts;
        self.acquire_retry_delay_ms = delay_ms;
        self
    }

    pub fn with_acquire_retry_multiplier(mut self, multiplier: f64) -> Self {
        self.acquire_retry_multiplier = multiplier;
        self
    }

    pub fn with_connection_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connection_timeout_ms = timeout_ms;
        self
    }

    pub fn with_null_on_connection_timeout(mut self, null_on_timeout: bool) -> Self {
        self.null_on_connection_timeout = null_on_timeout;
        self
    }

    pub fn with_connection_test_statement(mut self, sql: impl Into<String>) -> Self {
        self.connection_test_statement = Some(sql.into());
        self
    }

    pub fn with_liveness_probe_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.liveness_probe_timeout_ms = timeout_ms;
        self
    }

    pub fn with_service_order(mut self, order: ServiceOrder) -> Self {
        self.service_order = order;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_lazy_init(mut self, lazy: bool) -> Self {
        self.lazy_init = lazy;
        self
    }

    /// Return a copy with every out-of-range value replaced by a safe default
    ///
    /// Each correction is logged as a warning.
    pub fn sanitized(mut self) -> Self {
        if self.pool_name.trim().is_empty() {
            self.pool_name = DEFAULT_POOL_NAME.to_string();
        }

        if self.partition_count == 0 {
            tracing::warn!(pool = %self.pool_name, "partition_count must be at least 1, using 1");
            self.partition_count = 1;
        }

        if self.max_connections_per_partition == 0 {
            tracing::warn!(
                pool = %self.pool_name,
                default = DEFAULT_MAX_CONNECTIONS,
                "max_connections_per_partition must be at least 1, using default"
            );
            self.max_connections_per_partition = DEFAULT_MAX_CONNECTIONS;
        }

        if self.min_connections_per_partition > self.max_connections_per_partition {
            tracing::warn!(
                pool = %self.pool_name,
                min = self.min_connections_per_partition,
                max = self.max_connections_per_partition,
                "min_connections_per_partition exceeds max, clamping to max"
            );
            self.min_connections_per_partition = self.max_connections_per_partition;
        }

        if self.acquire_increment == 0 {
            tracing::warn!(pool = %self.pool_name, "acquire_increment must be at least 1, using 1");
            self.acquire_increment = 1;
        } else if self.acquire_increment > self.max_connections_per_partition {
            tracing::warn!(
                pool = %self.pool_name,
                increment = self.acquire_increment,
                "acquire_increment exceeds max_connections_per_partition, clamping"
            );
            self.acquire_increment = self.max_connections_per_partition;
        }

        if self.acquire_retry_delay_ms == 0 {
            tracing::warn!(
                pool = %self.pool_name,
                default_ms = DEFAULT_ACQUIRE_RETRY_DELAY_MS,
                "acquire_retry_delay must be positive, using default"
            );
            self.acquire_retry_delay_ms = DEFAULT_ACQUIRE_RETRY_DELAY_MS;
        }

        if self.acquire_retry_multiplier.is_nan() || self.acquire_retry_multiplier < 1.0 {
            tracing::warn!(
                pool = %self.pool_name,
                multiplier = self.acquire_retry_multiplier,
                "acquire_retry_multiplier must be at least 1.0, using 1.0"
            );
            self.acquire_retry_multiplier = 1.0;
        }

        if self
            .connection_test_statement
            .as_deref()
            .is_some_and(|sql| sql.trim().is_empty())
        {
            tracing::warn!(pool = %self.pool_name, "ignoring empty connection_test_statement");
            self.connection_test_statement = None;
        }

        if self.liveness_probe_timeout_ms == 0 {
            tracing::warn!(pool = %self.pool_name, "liveness_probe_timeout must be positive, using 5s");
            self.liveness_probe_timeout_ms = 5_000;
        }

        self
    }

    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    pub fn min_connections_per_partition(&self) -> usize {
        self.min_connections_per_partition
    }

    pub fn max_connections_per_partition(&self) -> usize {
        self.max_connections_per_partition
    }

    pub fn acquire_increment(&self) -> usize {
        self.acquire_increment
    }

    /// Probe interval for idle connections, if enabled
    pub fn idle_connection_test_period(&self) -> Option<Duration> {
        non_zero_ms(self.idle_connection_test_period_ms)
    }

    /// Idle age after which surplus connections are closed, if enabled
    pub fn idle_max_age(&self) -> Option<Duration> {
        non_zero_ms(self.idle_max_age_ms)
    }

    /// Absolute connection lifetime, if enabled
    pub fn max_connection_age(&self) -> Option<Duration> {
        non_zero_ms(self.max_connection_age_ms)
    }

    /// How often the tester task runs
    ///
    /// The shorter of the test period and the idle max age, or `None` when
    /// both are disabled.
    pub fn tester_period(&self) -> Option<Duration> {
        match (self.idle_connection_test_period(), self.idle_max_age()) {
            (Some(test), Some(idle)) => Some(test.min(idle)),
            (test, idle) => test.or(idle),
        }
    }

    pub fn statements_cache_size(&self) -> usize {
        self.statements_cache_size
    }

    pub fn release_helper_threads(&self) -> usize {
        self.release_helper_threads
    }

    pub fn acquire_retry_attempts(&self) -> u32 {
        self.acquire_retry_attempts
    }

    pub fn acquire_retry_delay(&self) -> Duration {
        Duration::from_millis(self.acquire_retry_delay_ms)
    }

    /// Retry policy for opening connections
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.acquire_retry_attempts, self.acquire_retry_delay_ms)
            .with_multiplier(self.acquire_retry_multiplier)
    }

    /// Maximum wait for a free connection; `None` waits forever
    pub fn connection_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.connection_timeout_ms)
    }

    pub fn null_on_connection_timeout(&self) -> bool {
        self.null_on_connection_timeout
    }

    pub fn connection_test_statement(&self) -> Option<&str> {
        self.connection_test_statement.as_deref()
    }

    pub fn liveness_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_probe_timeout_ms)
    }

    pub fn service_order(&self) -> ServiceOrder {
        self.service_order
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn lazy_init(&self) -> bool {
        self.lazy_init
    }
}

impl Default for PoolConfig {
    /// Create a default pool configuration
    ///
    /// Defaults:
    /// - one partition with 1 to 10 connections, growing 2 at a time
    /// - idle connections probed every 4 hours, surplus closed after 1 hour idle
    /// - no max connection age, no statement cache, no release helpers
    /// - 5 open retries 7 seconds apart
    /// - acquisitions wait forever
    fn default() -> Self {
        Self::new(1, DEFAULT_MAX_CONNECTIONS)
    }
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

#[cfg(test)]
mod tests;
