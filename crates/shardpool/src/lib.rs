//! Shardpool - partitioned database connection pool
//!
//! This crate leases a bounded set of physical connections to concurrent
//! callers. Capacity is split into partitions to spread contention; each
//! partition is grown by a watch task, kept healthy by tester and max-age
//! tasks, and optionally drained by release helpers.
//!
//! # Example
//!
//! ```ignore
//! use shardpool::{Pool, PoolConfig};
//!
//! let config = PoolConfig::new(2, 10)
//!     .with_partition_count(2)
//!     .with_endpoint("postgres://localhost/app")
//!     .with_connection_timeout_ms(5_000);
//!
//! let pool = Pool::new(config, driver).await?;
//! if let Some(conn) = pool.get_connection().await? {
//!     conn.execute("UPDATE jobs SET claimed = true").await?;
//!     conn.release().await;
//! }
//! pool.shutdown().await;
//! ```

mod config;
mod connection;
mod health;
mod lease;
mod maintenance;
mod partition;
mod pool;
mod queue;
mod retry;
mod statement_cache;
mod stats;
mod strategy;

#[cfg(test)]
mod testing;

pub use config::{PoolConfig, ServiceOrder, StrategyKind};
pub use connection::{PooledConnection, PooledStatement};
pub use health::{PingError, PingResult};
pub use pool::{CallerId, CallerScope, Pool};
pub use retry::RetryPolicy;
pub use stats::{PartitionStats, PoolStats, StatisticsSnapshot};

pub use shardpool_core::{
    AcquireFailContext, ConnectionHook, ConnectionState, Credentials, DatabaseDriver, Endpoint,
    FailureClass, LeaseInfo, RawConnection, RawStatement, Result, ShardpoolError,
    StatementKind, StatementOptions,
};
