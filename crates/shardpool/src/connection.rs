//! Caller-facing connection and statement handles

use std::sync::Arc;

use shardpool_core::{RawStatement, Result, ShardpoolError, StatementOptions};

use crate::lease::ConnectionLease;
use crate::pool::PoolInner;
use crate::statement_cache::{self, StatementKey};
use crate::strategy::CachedSlot;

/// A connection leased from a [`Pool`](crate::Pool)
///
/// Give it back with [`PooledConnection::release`]. Dropping it also returns
/// it to the pool; when that needs async work (probing, closing, or handing
/// off to a release helper) the work is spawned onto the pool's runtime.
pub struct PooledConnection {
    lease: Option<ConnectionLease>,
    pool: Arc<PoolInner>,
    slot: Option<Arc<CachedSlot>>,
}

impl PooledConnection {
    pub(crate) fn new(
        lease: ConnectionLease,
        pool: Arc<PoolInner>,
        slot: Option<Arc<CachedSlot>>,
    ) -> Self {
        Self {
            lease: Some(lease),
            pool,
            slot,
        }
    }

    fn lease(&self) -> Result<&ConnectionLease> {
        self.lease
            .as_ref()
            .ok_or_else(|| ShardpoolError::Connection("connection already released".into()))
    }

    /// Pool-unique id of the underlying physical connection
    pub fn id(&self) -> u64 {
        self.lease.as_ref().map(ConnectionLease::id).unwrap_or_default()
    }

    /// Index of the partition the connection currently belongs to
    pub fn partition(&self) -> usize {
        self.lease
            .as_ref()
            .map(ConnectionLease::partition_index)
            .unwrap_or_default()
    }

    /// Whether this connection is pinned to its caller by the cached strategy
    pub fn is_pinned(&self) -> bool {
        self.slot.is_some()
    }

    pub fn is_possibly_broken(&self) -> bool {
        self.lease
            .as_ref()
            .is_some_and(ConnectionLease::is_possibly_broken)
    }

    /// Idle statements held in this connection's statement cache
    pub fn cached_statements(&self) -> usize {
        self.lease
            .as_ref()
            .map(|lease| lease.statements().len())
            .unwrap_or_default()
    }

    /// Flag the connection so it is probed before anyone reuses it.
    pub fn mark_possibly_broken(&self) {
        if let Some(lease) = &self.lease {
            lease.mark_possibly_broken();
        }
    }

    /// Execute a statement directly on the connection.
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        let lease = self.lease()?;
        lease
            .raw()
            .execute(sql)
            .await
            .map_err(|e| self.route_error(lease, e))
    }

    /// Prepare a statement, reusing a cached one when available.
    pub async fn prepare(&self, sql: &str) -> Result<PooledStatement<'_>> {
        self.prepare_with(sql, &StatementOptions::default()).await
    }

    pub async fn prepare_with(
        &self,
        sql: &str,
        options: &StatementOptions,
    ) -> Result<PooledStatement<'_>> {
        let lease = self.lease()?;
        let key = StatementKey::new(sql, options);
        let cache = lease.statements();

        if cache.is_enabled() {
            if let Some(statement) = cache.get(&key) {
                self.pool.statistics().record_cache_hit();
                return Ok(PooledStatement::new(self, key, statement));
            }
            self.pool.statistics().record_cache_miss();
        }

        let statement = lease
            .raw()
            .prepare(sql, options)
            .await
            .map_err(|e| self.route_error(lease, e))?;
        self.pool.statistics().record_prepared();
        Ok(PooledStatement::new(self, key, statement))
    }

    /// Give the connection back to the pool.
    pub async fn release(mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        let pool = self.pool.clone();
        if let Some(lease) = pool.hand_back(lease, self.slot.take()) {
            pool.release_connection(lease).await;
        }
    }

    fn route_error(&self, lease: &ConnectionLease, error: ShardpoolError) -> ShardpoolError {
        self.pool.handle_connection_error(lease, &error);
        error
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        if let Some(lease) = self.pool.hand_back(lease, self.slot.take()) {
            self.pool.release_detached(lease);
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("lease", &self.lease)
            .field("pinned", &self.slot.is_some())
            .finish()
    }
}

/// A prepared statement borrowed from a connection's statement cache
///
/// Closing (or dropping) the statement returns it to the cache.
pub struct PooledStatement<'a> {
    conn: &'a PooledConnection,
    key: StatementKey,
    statement: Option<Box<dyn RawStatement>>,
}

impl<'a> PooledStatement<'a> {
    fn new(conn: &'a PooledConnection, key: StatementKey, statement: Box<dyn RawStatement>) -> Self {
        Self {
            conn,
            key,
            statement: Some(statement),
        }
    }

    pub fn sql(&self) -> &str {
        self.key.sql()
    }

    /// Execute with positional parameters.
    pub async fn execute(&self, params: &[&str]) -> Result<u64> {
        let statement = self
            .statement
            .as_ref()
            .ok_or_else(|| ShardpoolError::Other("statement already closed".into()))?;
        match statement.execute(params).await {
            Ok(rows) => Ok(rows),
            Err(e) => {
                let lease = self.conn.lease()?;
                Err(self.conn.route_error(lease, e))
            }
        }
    }

    /// Return the statement to the connection's cache.
    pub async fn close(mut self) {
        let Some(statement) = self.statement.take() else {
            return;
        };
        match self.conn.lease.as_ref() {
            Some(lease) => lease.statements().put(self.key.clone(), statement).await,
            None => statement_cache::close_statement(statement).await,
        }
    }
}

impl Drop for PooledStatement<'_> {
    fn drop(&mut self) {
        let Some(statement) = self.statement.take() else {
            return;
        };
        let rejected = match self.conn.lease.as_ref() {
            Some(lease) => lease.statements().offer(self.key.clone(), statement),
            None => vec![statement],
        };
        if !rejected.is_empty() {
            self.conn.pool.runtime().spawn(async move {
                for statement in rejected {
                    statement_cache::close_statement(statement).await;
                }
            });
        }
    }
}
