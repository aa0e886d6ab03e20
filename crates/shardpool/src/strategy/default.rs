use std::sync::Arc;

use async_trait::async_trait;
use shardpool_core::{Result, ShardpoolError};

use super::AcquisitionStrategy;
use crate::config::StrategyKind;
use crate::connection::PooledConnection;
use crate::lease::ConnectionLease;
use crate::partition::Partition;
use crate::pool::{CallerId, PoolInner, shutdown_signalled};

/// Poll the preferred partition, then the others, then wait
pub(crate) struct DefaultStrategy;

impl DefaultStrategy {
    /// Take a free lease without waiting.
    pub fn poll(&self, pool: &PoolInner, caller: CallerId) -> Option<ConnectionLease> {
        let preferred = pool.preferred_partition(caller);
        let lease = preferred.free().try_pop();
        preferred.maybe_signal_for_more();
        if lease.is_some() {
            return lease;
        }

        pool.partitions()
            .iter()
            .filter(|partition| partition.index() != preferred.index())
            .find_map(|partition| {
                let lease = partition.free().try_pop();
                if lease.is_some() {
                    partition.maybe_signal_for_more();
                }
                lease
            })
    }

    pub async fn acquire_lease(
        &self,
        pool: &PoolInner,
        caller: CallerId,
    ) -> Result<Option<ConnectionLease>> {
        if let Some(lease) = self.poll(pool, caller) {
            return Ok(Some(lease));
        }
        self.wait_for_lease(pool, pool.preferred_partition(caller)).await
    }

    async fn wait_for_lease(
        &self,
        pool: &PoolInner,
        partition: &Partition,
    ) -> Result<Option<ConnectionLease>> {
        pool.set_starving();
        partition.signal_almost_full();

        let _waiting = pool.waiter();
        let mut shutdown = pool.shutdown_receiver();
        let timeout = pool.config().connection_timeout();

        let popped = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, partition.free().pop()).await.ok(),
                None => Some(partition.free().pop().await),
            }
        };

        tokio::select! {
            lease = popped => match lease {
                Some(lease) => Ok(Some(lease)),
                None => {
                    pool.statistics().record_timeout();
                    tracing::debug!(
                        partition = partition.index(),
                        timeout_ms = timeout.map(|t| t.as_millis() as u64),
                        "timed out waiting for a connection"
                    );
                    if pool.config().null_on_connection_timeout() {
                        Ok(None)
                    } else {
                        Err(ShardpoolError::AcquisitionTimeout(timeout.unwrap_or_default()))
                    }
                }
            },
            _ = shutdown_signalled(&mut shutdown) => Err(ShardpoolError::PoolClosed),
        }
    }
}

#[async_trait]
impl AcquisitionStrategy for DefaultStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Default
    }

    async fn acquire(
        &self,
        pool: &Arc<PoolInner>,
        caller: CallerId,
    ) -> Result<Option<PooledConnection>> {
        let lease = self.acquire_lease(pool, caller).await?;
        Ok(lease.map(|lease| pool.check_out(lease, caller, None)))
    }
}
