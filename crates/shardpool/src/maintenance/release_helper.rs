use std::sync::{Arc, Weak};

use tokio::sync::watch;

use crate::partition::Partition;
use crate::pool::{PoolInner, shutdown_signalled};

/// Run the release path for leases queued on the partition.
pub(super) async fn run(
    pool: Weak<PoolInner>,
    partition: Arc<Partition>,
    mut shutdown: watch::Receiver<bool>,
) {
    let Some(queue) = partition.pending_release() else {
        return;
    };

    loop {
        let lease = tokio::select! {
            lease = queue.pop() => lease,
            _ = shutdown_signalled(&mut shutdown) => break,
        };
        match pool.upgrade() {
            Some(pool) => pool.release_inline(lease).await,
            None => {
                lease.close().await;
                return;
            }
        }
    }

    // Best-effort drain; the release path closes leases once shutting down
    if let Some(pool) = pool.upgrade() {
        for lease in queue.drain() {
            pool.release_inline(lease).await;
        }
    }
    tracing::debug!(partition = partition.index(), "release helper stopped");
}
