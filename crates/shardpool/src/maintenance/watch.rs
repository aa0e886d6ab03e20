use std::sync::{Arc, Weak};

use tokio::sync::watch;

use crate::partition::Partition;
use crate::pool::{PoolInner, shutdown_signalled};

/// Grow the partition whenever it signals that it is running low.
pub(super) async fn run(
    pool: Weak<PoolInner>,
    partition: Arc<Partition>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = partition.almost_full_signalled() => {}
            _ = shutdown_signalled(&mut shutdown) => break,
        }

        let Some(pool) = pool.upgrade() else {
            break;
        };
        if pool.is_shutting_down() {
            break;
        }
        grow(&pool, &partition).await;
    }

    tracing::debug!(partition = partition.index(), "watch task stopped");
}

async fn grow(pool: &PoolInner, partition: &Arc<Partition>) {
    loop {
        let room = partition.room();
        if room == 0 {
            partition.mark_unable_to_create_more();
            return;
        }

        let batch = room.min(partition.increment());
        match pool.add_connections(partition, batch).await {
            Ok(0) => return,
            Ok(added) => {
                pool.clear_starving();
                tracing::debug!(
                    partition = partition.index(),
                    added,
                    created = partition.created(),
                    "grew partition"
                );
            }
            Err(e) => {
                tracing::error!(
                    partition = partition.index(),
                    error = %e,
                    "failed to grow partition"
                );
                return;
            }
        }

        if pool.is_shutting_down() || !(partition.is_below_min() || partition.is_running_low()) {
            return;
        }
    }
}
