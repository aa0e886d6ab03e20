//! Partitioned connection pool
//!
//! [`Pool`] is a cheap, cloneable handle over the shared [`PoolInner`]. The
//! inner state owns the partitions, the acquisition strategy and the handles
//! of the maintenance tasks; the release path, broken-connection handling
//! and shutdown live here as well.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use shardpool_core::{
    AcquireFailContext, ConnectionHook, ConnectionState, DatabaseDriver, FailureClass, Result,
    ShardpoolError,
};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{PoolConfig, StrategyKind};
use crate::connection::PooledConnection;
use crate::health::{self, PingResult};
use crate::lease::ConnectionLease;
use crate::maintenance;
use crate::partition::Partition;
use crate::stats::{PartitionStats, PoolStats, Statistics, StatisticsSnapshot};
use crate::strategy::{self, AcquisitionStrategy, CachedSlot};

/// Identity of whoever is asking for a connection
///
/// Callers are either a thread, identified by a hash of its id, or an
/// explicit [`CallerScope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallerId {
    Thread(u64),
    Scope(u64),
}

impl CallerId {
    /// Identity of the current thread.
    pub fn current_thread() -> Self {
        let mut hasher = DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        CallerId::Thread(hasher.finish())
    }

    fn partition_hint(&self) -> u64 {
        match self {
            CallerId::Thread(hash) | CallerId::Scope(hash) => *hash,
        }
    }
}

/// Resolves once shutdown has been signalled or the pool is gone.
pub(crate) async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

/// A connection pool split into independently locked partitions
///
/// # Example
///
/// ```ignore
/// let pool = Pool::new(PoolConfig::new(2, 5), driver).await?;
/// let conn = pool.get_connection().await?.expect("waits without a timeout");
/// conn.execute("SELECT 1").await?;
/// conn.release().await;
/// pool.shutdown().await;
/// ```
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Build a pool and open the minimum connections of every partition.
    ///
    /// Must be called from within a tokio runtime; maintenance tasks are
    /// spawned onto it.
    pub async fn new<D: DatabaseDriver>(config: PoolConfig, driver: D) -> Result<Self> {
        Self::build(config, Arc::new(driver), None).await
    }

    /// Build a pool that reports lifecycle events to `hook`.
    pub async fn with_hook<D, H>(config: PoolConfig, driver: D, hook: H) -> Result<Self>
    where
        D: DatabaseDriver,
        H: ConnectionHook,
    {
        Self::build(config, Arc::new(driver), Some(Arc::new(hook))).await
    }

    async fn build(
        config: PoolConfig,
        driver: Arc<dyn DatabaseDriver>,
        hook: Option<Arc<dyn ConnectionHook>>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| ShardpoolError::Other(format!("pool requires a tokio runtime: {}", e)))?;
        let config = config.sanitized();
        let partitions = (0..config.partition_count())
            .map(|index| Arc::new(Partition::new(index, &config)))
            .collect();
        let (shutdown_tx, _) = watch::channel(false);

        let inner = Arc::new(PoolInner {
            strategy: strategy::for_kind(config.strategy()),
            config,
            driver,
            hook,
            partitions,
            statistics: Statistics::default(),
            starving: AtomicBool::new(false),
            database_down: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            next_lease_id: AtomicU64::new(1),
            next_scope_id: AtomicU64::new(0),
            waiting: AtomicUsize::new(0),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            running_tasks: Arc::new(AtomicUsize::new(0)),
            runtime,
        });

        tracing::info!(
            pool = %inner.config.pool_name(),
            driver = %inner.driver.name(),
            partitions = inner.partitions.len(),
            min = inner.config.min_connections_per_partition(),
            max = inner.config.max_connections_per_partition(),
            "starting connection pool"
        );

        if !inner.config.lazy_init() {
            for partition in &inner.partitions {
                if let Err(e) = inner.add_connections(partition, partition.min()).await {
                    tracing::error!(
                        pool = %inner.config.pool_name(),
                        partition = partition.index(),
                        error = %e,
                        "failed to open initial connections"
                    );
                    inner.shutdown().await;
                    return Err(e);
                }
            }
        }

        maintenance::spawn_all(&inner);
        Ok(Self { inner })
    }

    /// Lease a connection for the current thread.
    ///
    /// Waits for a free connection up to the configured timeout. Returns
    /// `Ok(None)` on timeout when `null_on_connection_timeout` is set.
    pub async fn get_connection(&self) -> Result<Option<PooledConnection>> {
        self.inner.acquire(CallerId::current_thread()).await
    }

    /// Open a caller scope with its own stable identity.
    ///
    /// With the cached strategy the connection pinned to the scope is given
    /// back when the scope is dropped.
    pub fn scope(&self) -> CallerScope {
        let id = self.inner.next_scope_id.fetch_add(1, Ordering::Relaxed);
        CallerScope {
            id: CallerId::Scope(id),
            pool: self.clone(),
        }
    }

    /// Give a connection back to the pool.
    pub async fn release_connection(&self, conn: PooledConnection) {
        conn.release().await;
    }

    /// Stop maintenance and close every idle connection.
    ///
    /// Connections still held by callers are closed when released. Calling
    /// this more than once has no further effect.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shutting_down()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Acquisition strategy currently in effect
    pub fn strategy(&self) -> StrategyKind {
        self.inner.strategy.kind()
    }

    /// Whether any caller has had to wait for a connection
    pub fn is_starving(&self) -> bool {
        self.inner.starving.load(Ordering::Acquire)
    }

    /// Current pool-wide gauges
    pub fn stats(&self) -> PoolStats {
        let (total, idle) = self
            .inner
            .partitions
            .iter()
            .fold((0, 0), |(total, idle), p| (total + p.created(), idle + p.free_count()));
        PoolStats::new(
            total,
            idle,
            total.saturating_sub(idle),
            self.inner.waiting.load(Ordering::Relaxed),
        )
    }

    pub fn partition_stats(&self) -> Vec<PartitionStats> {
        self.inner.partitions.iter().map(|p| p.stats()).collect()
    }

    /// Running counters of this pool
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.inner.statistics.snapshot()
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<PoolInner> {
        &self.inner
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.config.pool_name())
            .field("stats", &self.stats())
            .field("maintenance_tasks", &self.inner.running_tasks())
            .finish()
    }
}

/// A caller identity with explicit teardown
pub struct CallerScope {
    id: CallerId,
    pool: Pool,
}

impl CallerScope {
    pub fn id(&self) -> CallerId {
        self.id
    }

    /// Lease a connection on behalf of this scope.
    pub async fn get_connection(&self) -> Result<Option<PooledConnection>> {
        self.pool.inner.acquire(self.id).await
    }
}

impl Drop for CallerScope {
    fn drop(&mut self) {
        self.pool
            .inner
            .strategy
            .caller_finished(&self.pool.inner, self.id);
    }
}

/// Decrements the waiter gauge when a wait ends, however it ends
pub(crate) struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Counts a maintenance task as running until it is dropped
struct TaskGuard(Arc<AtomicUsize>);

impl TaskGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter.clone())
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(crate) struct PoolInner {
    config: PoolConfig,
    driver: Arc<dyn DatabaseDriver>,
    hook: Option<Arc<dyn ConnectionHook>>,
    partitions: Vec<Arc<Partition>>,
    strategy: Box<dyn AcquisitionStrategy>,
    statistics: Statistics,
    starving: AtomicBool,
    database_down: AtomicBool,
    /// Bumped on every database-down event
    generation: AtomicU64,
    shutting_down: AtomicBool,
    next_lease_id: AtomicU64,
    next_scope_id: AtomicU64,
    waiting: AtomicUsize,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running_tasks: Arc<AtomicUsize>,
    runtime: Handle,
}

impl PoolInner {
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn partitions(&self) -> &[Arc<Partition>] {
        &self.partitions
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn strategy(&self) -> &dyn AcquisitionStrategy {
        self.strategy.as_ref()
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn a maintenance task that shutdown waits for.
    pub fn spawn_task<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let running = TaskGuard::enter(&self.running_tasks);
        let handle = self.runtime.spawn(async move {
            let _running = running;
            task.await;
        });
        self.tasks.lock().push(handle);
    }

    /// Maintenance tasks that have not finished yet
    pub fn running_tasks(&self) -> usize {
        self.running_tasks.load(Ordering::Acquire)
    }

    pub fn set_starving(&self) {
        self.starving.store(true, Ordering::Release);
    }

    pub fn clear_starving(&self) {
        self.starving.store(false, Ordering::Release);
    }

    pub fn waiter(&self) -> WaitingGuard<'_> {
        self.waiting.fetch_add(1, Ordering::Relaxed);
        WaitingGuard(&self.waiting)
    }

    /// Partition a caller polls first.
    pub fn preferred_partition(&self, caller: CallerId) -> &Arc<Partition> {
        let index = (caller.partition_hint() % self.partitions.len() as u64) as usize;
        &self.partitions[index]
    }

    pub async fn acquire(self: &Arc<Self>, caller: CallerId) -> Result<Option<PooledConnection>> {
        if self.is_shutting_down() {
            return Err(ShardpoolError::PoolClosed);
        }

        let started = Instant::now();
        let result = self.strategy.acquire(self, caller).await;
        self.statistics.record_request(started.elapsed());
        result
    }

    /// Wrap a lease in a caller-facing handle.
    pub fn check_out(
        self: &Arc<Self>,
        mut lease: ConnectionLease,
        caller: CallerId,
        slot: Option<Arc<CachedSlot>>,
    ) -> PooledConnection {
        lease.set_holder(Some(caller));
        if let Some(hook) = &self.hook {
            hook.on_check_out(&lease.info());
        }
        tracing::trace!(lease_id = lease.id(), partition = lease.partition_index(), "checked out");
        PooledConnection::new(lease, self.clone(), slot)
    }

    fn check_in(&self, lease: &mut ConnectionLease) {
        lease.set_holder(None);
        if let Some(hook) = &self.hook {
            hook.on_check_in(&lease.info());
        }
    }

    /// Take a lease back from a caller.
    ///
    /// Pinned leases are parked in their caller slot; anything else is
    /// handed back for release.
    pub fn hand_back(
        &self,
        mut lease: ConnectionLease,
        slot: Option<Arc<CachedSlot>>,
    ) -> Option<ConnectionLease> {
        self.check_in(&mut lease);
        match slot {
            Some(slot) => self.strategy.park(self, &slot, lease),
            None => Some(lease),
        }
    }

    /// Run the release path, via the release helpers when configured.
    pub async fn release_connection(&self, lease: ConnectionLease) {
        if !self.is_shutting_down()
            && let Some(partition) = lease.partition()
            && let Some(queue) = partition.pending_release()
        {
            let mut shutdown = self.shutdown_receiver();
            match queue.push_unless(lease, shutdown_signalled(&mut shutdown)).await {
                Ok(()) => {
                    // Helpers may already have drained the queue and stopped
                    if self.is_shutting_down() {
                        for lease in queue.drain() {
                            self.release_inline(lease).await;
                        }
                    }
                }
                Err(lease) => self.release_inline(lease).await,
            }
            return;
        }
        self.release_inline(lease).await;
    }

    /// Release without awaiting; the slow path is spawned onto the runtime.
    pub fn release_detached(self: &Arc<Self>, lease: ConnectionLease) {
        if let Err(lease) = self.try_return_to_free(lease) {
            let pool = self.clone();
            self.runtime.spawn(async move {
                pool.release_connection(lease).await;
            });
        }
    }

    /// Put a healthy lease straight back into its own free queue.
    fn try_return_to_free(&self, mut lease: ConnectionLease) -> std::result::Result<(), ConnectionLease> {
        if self.is_shutting_down() || lease.is_possibly_broken() || self.is_retired(&lease) {
            return Err(lease);
        }
        let Some(partition) = lease.partition() else {
            return Err(lease);
        };
        if partition.pending_release().is_some() {
            return Err(lease);
        }
        lease.touch();
        partition.free().try_push(lease)
    }

    pub async fn release_inline(&self, mut lease: ConnectionLease) {
        if self.is_shutting_down() {
            self.destroy_lease(lease, "pool shut down").await;
            return;
        }
        if let Some(reason) = self.retirement_reason(&lease) {
            self.destroy_lease(lease, reason).await;
            return;
        }
        if lease.is_possibly_broken() {
            match self.probe(&lease).await {
                Ok(_) => lease.reset_health(),
                Err(e) => {
                    tracing::debug!(lease_id = lease.id(), error = %e, "liveness probe failed");
                    self.destroy_lease(lease, "failed liveness probe").await;
                    return;
                }
            }
        }
        lease.touch();
        self.release_in_any_free_partition(lease).await;
    }

    /// Return a lease to its own partition, or adopt it into any partition
    /// with room, or wait for room in its own.
    pub async fn release_in_any_free_partition(&self, mut lease: ConnectionLease) {
        let Some(origin) = lease.partition() else {
            lease.close().await;
            return;
        };

        lease = match origin.free().try_push(lease) {
            Ok(()) => return,
            Err(rejected) => rejected,
        };

        for partition in &self.partitions {
            if partition.index() == origin.index()
                || partition.free_count() >= partition.max()
                || !partition.try_reserve_slot()
            {
                continue;
            }
            lease.rebind(partition);
            match partition.free().try_push(lease) {
                Ok(()) => {
                    origin.release_slot();
                    tracing::debug!(
                        from = origin.index(),
                        to = partition.index(),
                        "moved connection to another partition"
                    );
                    return;
                }
                Err(rejected) => {
                    partition.release_slot();
                    lease = rejected;
                    lease.rebind(&origin);
                }
            }
        }

        origin.free().push(lease).await;
    }

    pub fn is_retired(&self, lease: &ConnectionLease) -> bool {
        self.retirement_reason(lease).is_some()
    }

    fn retirement_reason(&self, lease: &ConnectionLease) -> Option<&'static str> {
        if lease.generation() != self.generation.load(Ordering::Acquire) {
            return Some("discarded after database failure");
        }
        match self.config.max_connection_age() {
            Some(max_age) if lease.age() >= max_age => Some("exceeded max connection age"),
            _ => None,
        }
    }

    pub async fn probe(&self, lease: &ConnectionLease) -> PingResult {
        health::probe(
            lease.raw(),
            self.config.connection_test_statement(),
            self.config.liveness_probe_timeout(),
        )
        .await
    }

    /// Close a lease for good and give its slot back to the partition.
    pub async fn destroy_lease(&self, lease: ConnectionLease, reason: &str) {
        let info = lease.info();
        let partition = lease.partition();

        if let Some(hook) = &self.hook {
            hook.on_destroy(&info);
        }
        tracing::debug!(lease_id = info.id, partition = info.partition, reason, "destroying connection");

        lease.close().await;
        self.statistics.record_destroyed();

        if let Some(partition) = partition {
            partition.release_slot();
            // Waiters may have signalled while the partition was at max
            let waiters = self.waiting.load(Ordering::Relaxed) > 0;
            if !self.is_shutting_down() && (partition.is_below_min() || waiters) {
                partition.signal_almost_full();
            }
        }
    }

    /// Open up to `count` connections into the partition's free queue.
    pub async fn add_connections(&self, partition: &Arc<Partition>, count: usize) -> Result<usize> {
        let mut added = 0;
        for _ in 0..count {
            if self.is_shutting_down() || !partition.try_reserve_slot() {
                break;
            }
            let lease = match self.open_connection(partition).await {
                Ok(lease) => lease,
                Err(e) => {
                    partition.release_slot();
                    return Err(e);
                }
            };
            if let Err(lease) = partition.free().try_push(lease) {
                self.destroy_lease(lease, "free queue full").await;
                break;
            }
            added += 1;
        }
        Ok(added)
    }

    /// Open one physical connection, retrying per the retry policy or hook.
    async fn open_connection(&self, partition: &Arc<Partition>) -> Result<ConnectionLease> {
        let policy = self.config.retry_policy();
        let mut shutdown = self.shutdown_receiver();
        let mut attempt = 0;

        loop {
            let opened = self
                .driver
                .open(self.config.endpoint(), self.config.credentials())
                .await;

            let error = match opened {
                Ok(raw) => {
                    let lease = ConnectionLease::new(
                        self.next_lease_id.fetch_add(1, Ordering::Relaxed),
                        raw,
                        partition,
                        self.generation.load(Ordering::Acquire),
                        self.config.statements_cache_size(),
                    );
                    self.database_down.store(false, Ordering::Release);
                    self.statistics.record_created();
                    if let Some(hook) = &self.hook {
                        hook.on_acquire(&lease.info());
                    }
                    tracing::debug!(lease_id = lease.id(), partition = partition.index(), "opened connection");
                    return Ok(lease);
                }
                Err(e) => e,
            };

            let context = AcquireFailContext {
                attempt,
                max_retries: policy.max_retries(),
                next_delay: policy.calculate_delay(attempt),
                url: self.config.endpoint().url.clone(),
            };
            let retry = match &self.hook {
                Some(hook) => hook.on_acquire_fail(&error, &context),
                None => policy.allows_retry(attempt),
            };
            if !retry || self.is_shutting_down() {
                return Err(error);
            }

            tracing::warn!(
                pool = %self.config.pool_name(),
                partition = partition.index(),
                attempt = attempt + 1,
                delay_ms = context.next_delay.as_millis() as u64,
                error = %error,
                "failed to open connection, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(context.next_delay) => {}
                _ = shutdown_signalled(&mut shutdown) => return Err(error),
            }
            attempt += 1;
        }
    }

    /// Classify an error reported through a leased connection.
    pub fn handle_connection_error(self: &Arc<Self>, lease: &ConnectionLease, error: &ShardpoolError) {
        let info = lease.info();
        let verdict = self
            .hook
            .as_ref()
            .map(|hook| hook.on_mark_possibly_broken(&info, error))
            .unwrap_or_default();

        let class = match verdict {
            ConnectionState::TerminateAll => FailureClass::DatabaseDown,
            ConnectionState::PossiblyBroken => FailureClass::ConnectionBroken,
            ConnectionState::Nop => error.failure_class(),
        };

        match class {
            FailureClass::DatabaseDown => {
                lease.mark_possibly_broken();
                self.database_down_detected(error);
            }
            FailureClass::ConnectionBroken => {
                let broken = self
                    .hook
                    .as_ref()
                    .is_none_or(|hook| hook.on_connection_exception(&info, error));
                if broken {
                    tracing::debug!(lease_id = info.id, error = %error, "connection marked possibly broken");
                    lease.mark_possibly_broken();
                }
            }
            FailureClass::Unrelated => {}
        }
    }

    fn database_down_detected(self: &Arc<Self>, error: &ShardpoolError) {
        if self
            .database_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::error!(
            pool = %self.config.pool_name(),
            sql_state = error.sql_state().unwrap_or("none"),
            generation,
            error = %error,
            "database appears to be down, terminating all connections"
        );

        let pool = self.clone();
        self.runtime.spawn(async move {
            pool.terminate_all_and_repopulate().await;
        });
    }

    async fn terminate_all_and_repopulate(&self) {
        for partition in &self.partitions {
            for lease in partition.free().drain() {
                self.destroy_lease(lease, "discarded after database failure").await;
            }
        }
        self.strategy.terminate_all(self).await;

        if !self.is_shutting_down() {
            for partition in &self.partitions {
                partition.signal_almost_full();
            }
        }
    }

    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(pool = %self.config.pool_name(), "shutting down connection pool");

        self.shutdown_tx.send_replace(true);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(pool = %self.config.pool_name(), error = %e, "maintenance task failed");
            }
        }

        self.strategy.terminate_all(self).await;
        for partition in &self.partitions {
            let mut leases = partition.free().drain();
            if let Some(queue) = partition.pending_release() {
                leases.extend(queue.drain());
            }
            for lease in leases {
                self.destroy_lease(lease, "pool shut down").await;
            }
        }

        tracing::info!(pool = %self.config.pool_name(), "connection pool shut down");
    }
}
