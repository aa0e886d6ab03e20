//! Pool statistics types
//!
//! [`PoolStats`] and [`PartitionStats`] are point-in-time gauges.
//! [`Statistics`] holds the running counters of one pool instance; every pool
//! owns its own, so independent pools in a process never share numbers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Statistics about a connection pool's current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Total number of connections (idle + active)
    total: usize,
    /// Number of idle connections available in the pool
    idle: usize,
    /// Number of connections currently in use
    active: usize,
    /// Number of requests waiting for a connection
    waiting: usize,
}

impl PoolStats {
    /// Create new pool statistics
    pub fn new(total: usize, idle: usize, active: usize, waiting: usize) -> Self {
        Self {
            total,
            idle,
            active,
            waiting,
        }
    }

    /// Get the total number of connections
    pub fn total(&self) -> usize {
        self.total
    }

    /// Get the number of idle connections
    pub fn idle(&self) -> usize {
        self.idle
    }

    /// Get the number of active (in-use) connections
    pub fn active(&self) -> usize {
        self.active
    }

    /// Get the number of waiting requests
    pub fn waiting(&self) -> usize {
        self.waiting
    }

    /// Calculate pool utilization as a fraction (0.0 to 1.0)
    ///
    /// Returns 0.0 if total is 0 to avoid division by zero.
    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.active as f64 / self.total as f64
        }
    }

    /// Check if the pool is fully utilized (all connections in use)
    pub fn is_full(&self) -> bool {
        self.idle == 0 && self.total > 0
    }
}

impl Default for PoolStats {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

/// Gauges for a single partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionStats {
    pub index: usize,
    /// Connections currently open for this partition
    pub created: usize,
    /// Connections sitting in the free queue
    pub free: usize,
    /// Connections held by callers or awaiting release
    pub leased: usize,
    pub min: usize,
    pub max: usize,
    /// Whether growth stopped because the partition reached its max
    pub unable_to_create_more: bool,
}

/// Running counters owned by one pool
#[derive(Debug, Default)]
pub(crate) struct Statistics {
    connections_requested: AtomicU64,
    connections_created: AtomicU64,
    connections_destroyed: AtomicU64,
    acquisition_timeouts: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    statements_prepared: AtomicU64,
    cumulative_wait_micros: AtomicU64,
}

impl Statistics {
    pub fn record_request(&self, waited: Duration) {
        self.connections_requested.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(waited.as_micros()).unwrap_or(u64::MAX);
        self.cumulative_wait_micros
            .fetch_add(micros, Ordering::Relaxed);
    }

    pub fn record_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_destroyed(&self) {
        self.connections_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.acquisition_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prepared(&self) {
        self.statements_prepared.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            connections_requested: self.connections_requested.load(Ordering::Relaxed),
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_destroyed: self.connections_destroyed.load(Ordering::Relaxed),
            acquisition_timeouts: self.acquisition_timeouts.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            statements_prepared: self.statements_prepared.load(Ordering::Relaxed),
            cumulative_wait_micros: self.cumulative_wait_micros.load(Ordering::Relaxed),
        }
    }
}

/// Copy of a pool's counters at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub connections_requested: u64,
    pub connections_created: u64,
    pub connections_destroyed: u64,
    pub acquisition_timeouts: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub statements_prepared: u64,
    pub cumulative_wait_micros: u64,
}

impl StatisticsSnapshot {
    /// Fraction of statement lookups served from the cache
    pub fn cache_hit_ratio(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }

    /// Average time callers spent inside `get_connection`
    pub fn average_wait(&self) -> Duration {
        if self.connections_requested == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.cumulative_wait_micros / self.connections_requested)
        }
    }
}
