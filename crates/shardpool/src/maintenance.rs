//! Background maintenance tasks
//!
//! Every partition gets a watch task that grows it on demand. Tester and
//! max-age tasks run when their intervals are configured, and release
//! helpers run when `release_helper_threads` is non-zero. Tasks hold only a
//! weak reference to the pool and stop on shutdown or once the pool is gone.

mod max_age;
mod release_helper;
mod tester;
mod watch;

use std::sync::Arc;

use crate::pool::PoolInner;

#[cfg(test)]
pub(crate) use tester::test_idle_connections;

pub(crate) fn spawn_all(pool: &Arc<PoolInner>) {
    let config = pool.config();

    for partition in pool.partitions() {
        let weak = Arc::downgrade(pool);

        pool.spawn_task(watch::run(
            weak.clone(),
            partition.clone(),
            pool.shutdown_receiver(),
        ));

        if let Some(period) = config.tester_period() {
            pool.spawn_task(tester::run(
                weak.clone(),
                partition.clone(),
                period,
                pool.shutdown_receiver(),
            ));
        }

        if let Some(max_age) = config.max_connection_age() {
            pool.spawn_task(max_age::run(
                weak.clone(),
                partition.clone(),
                max_age,
                pool.shutdown_receiver(),
            ));
        }

        for _ in 0..config.release_helper_threads() {
            pool.spawn_task(release_helper::run(
                weak.clone(),
                partition.clone(),
                pool.shutdown_receiver(),
            ));
        }
    }

    tracing::debug!(
        pool = %config.pool_name(),
        partitions = pool.partitions().len(),
        "maintenance tasks started"
    );
}
