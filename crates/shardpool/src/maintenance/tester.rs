use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::partition::Partition;
use crate::pool::{PoolInner, shutdown_signalled};

/// Pause between two tested connections.
const ITEM_PAUSE: Duration = Duration::from_millis(5);

pub(super) async fn run(
    pool: Weak<PoolInner>,
    partition: Arc<Partition>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_signalled(&mut shutdown) => break,
        }

        let Some(pool) = pool.upgrade() else {
            break;
        };
        test_idle_connections(&pool, &partition).await;
    }

    tracing::debug!(partition = partition.index(), "tester task stopped");
}

/// Walk the free leases once, oldest first.
///
/// Broken and retired leases are destroyed, as are leases idle beyond the
/// idle max age while the partition keeps its minimum free. Leases whose
/// last health reset is older than the test period are probed.
pub(crate) async fn test_idle_connections(pool: &PoolInner, partition: &Arc<Partition>) {
    let idle_max_age = pool.config().idle_max_age();
    let test_period = pool.config().idle_connection_test_period();

    for _ in 0..partition.free_count() {
        if pool.is_shutting_down() {
            return;
        }
        let Some(mut lease) = partition.free().pop_oldest() else {
            break;
        };

        if lease.is_possibly_broken() {
            pool.destroy_lease(lease, "possibly broken").await;
            continue;
        }
        if pool.is_retired(&lease) {
            pool.destroy_lease(lease, "retired").await;
            continue;
        }
        if let Some(max_idle) = idle_max_age
            && lease.idle_for() > max_idle
            && partition.free_count() >= partition.min()
        {
            pool.destroy_lease(lease, "idle too long").await;
            continue;
        }
        if let Some(period) = test_period
            && lease.since_reset() > period
        {
            match pool.probe(&lease).await {
                Ok(latency) => {
                    tracing::trace!(lease_id = lease.id(), latency_us = latency.as_micros() as u64, "probe ok");
                    lease.reset_health();
                }
                Err(e) => {
                    tracing::debug!(lease_id = lease.id(), error = %e, "idle connection failed probe");
                    pool.destroy_lease(lease, "failed liveness probe").await;
                    continue;
                }
            }
        }

        pool.release_in_any_free_partition(lease).await;
        tokio::time::sleep(ITEM_PAUSE).await;
    }
}
