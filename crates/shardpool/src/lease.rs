//! Pool-side state of one physical connection

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use shardpool_core::{LeaseInfo, RawConnection};

use crate::partition::Partition;
use crate::pool::CallerId;
use crate::statement_cache::StatementCache;

/// A physical connection together with its bookkeeping
///
/// A lease is owned by exactly one place at a time: a partition's free
/// queue, a pending-release queue, a pinned caller slot, or the
/// [`PooledConnection`](crate::PooledConnection) handed to a caller.
pub(crate) struct ConnectionLease {
    id: u64,
    raw: Box<dyn RawConnection>,
    statements: StatementCache,
    partition: Weak<Partition>,
    partition_index: usize,
    /// Pool generation at creation; stale generations are retired on release
    generation: u64,
    created_at: Instant,
    last_used_at: Instant,
    last_reset_at: Instant,
    possibly_broken: AtomicBool,
    holder: Option<CallerId>,
}

impl ConnectionLease {
    pub fn new(
        id: u64,
        raw: Box<dyn RawConnection>,
        partition: &Arc<Partition>,
        generation: u64,
        statements_cache_size: usize,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            raw,
            statements: StatementCache::new(statements_cache_size),
            partition: Arc::downgrade(partition),
            partition_index: partition.index(),
            generation,
            created_at: now,
            last_used_at: now,
            last_reset_at: now,
            possibly_broken: AtomicBool::new(false),
            holder: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn raw(&self) -> &dyn RawConnection {
        self.raw.as_ref()
    }

    pub fn statements(&self) -> &StatementCache {
        &self.statements
    }

    pub fn partition(&self) -> Option<Arc<Partition>> {
        self.partition.upgrade()
    }

    pub fn partition_index(&self) -> usize {
        self.partition_index
    }

    /// Move the lease into another partition's accounting.
    pub fn rebind(&mut self, partition: &Arc<Partition>) {
        self.partition = Arc::downgrade(partition);
        self.partition_index = partition.index();
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn info(&self) -> LeaseInfo {
        LeaseInfo {
            id: self.id,
            partition: self.partition_index,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    pub fn since_reset(&self) -> Duration {
        self.last_reset_at.elapsed()
    }

    pub fn touch(&mut self) {
        self.last_used_at = Instant::now();
    }

    /// Record a successful liveness probe.
    pub fn reset_health(&mut self) {
        self.last_reset_at = Instant::now();
        self.possibly_broken.store(false, Ordering::Release);
    }

    pub fn is_possibly_broken(&self) -> bool {
        self.possibly_broken.load(Ordering::Acquire)
    }

    pub fn mark_possibly_broken(&self) {
        self.possibly_broken.store(true, Ordering::Release);
    }

    pub fn set_holder(&mut self, holder: Option<CallerId>) {
        self.holder = holder;
    }

    /// Close cached statements and the physical connection.
    pub async fn close(self) {
        self.statements.clear().await;
        if let Err(e) = self.raw.close().await {
            tracing::debug!(lease_id = self.id, error = %e, "error closing connection");
        }
    }
}

impl std::fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("id", &self.id)
            .field("partition", &self.partition_index)
            .field("generation", &self.generation)
            .field("possibly_broken", &self.is_possibly_broken())
            .field("holder", &self.holder)
            .finish()
    }
}
