use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;

use crate::partition::Partition;
use crate::pool::{PoolInner, shutdown_signalled};

const MIN_RESCHEDULE: Duration = Duration::from_millis(1);

pub(super) async fn run(
    pool: Weak<PoolInner>,
    partition: Arc<Partition>,
    max_age: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut next_run = max_age;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(next_run) => {}
            _ = shutdown_signalled(&mut shutdown) => break,
        }

        let Some(pool) = pool.upgrade() else {
            break;
        };
        next_run = evict_expired(&pool, &partition, max_age).await;
    }

    tracing::debug!(partition = partition.index(), "max-age task stopped");
}

/// Destroy free leases older than `max_age`.
///
/// Returns how long until the youngest survivor expires, so the task can
/// sleep exactly that long.
pub(crate) async fn evict_expired(
    pool: &PoolInner,
    partition: &Arc<Partition>,
    max_age: Duration,
) -> Duration {
    let mut next_run = max_age;

    for _ in 0..partition.free_count() {
        if pool.is_shutting_down() {
            break;
        }
        let Some(lease) = partition.free().pop_oldest() else {
            break;
        };

        let age = lease.age();
        if age >= max_age {
            pool.destroy_lease(lease, "exceeded max connection age").await;
            continue;
        }
        next_run = next_run.min(max_age - age);
        pool.release_in_any_free_partition(lease).await;
    }

    next_run.max(MIN_RESCHEDULE)
}
