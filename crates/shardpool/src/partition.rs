//! A partition: one slice of the pool's capacity
//!
//! Each partition owns its free queue, an optional pending-release queue for
//! the release helpers, and the `created` counter that bounds how many
//! physical connections it may hold.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::config::PoolConfig;
use crate::lease::ConnectionLease;
use crate::queue::BoundedQueue;
use crate::stats::PartitionStats;

/// Free percentage below which a partition asks its watch task to grow.
const LOW_FREE_THRESHOLD_PERCENT: usize = 20;

pub(crate) struct Partition {
    index: usize,
    min: usize,
    max: usize,
    increment: usize,
    free: BoundedQueue<ConnectionLease>,
    pending_release: Option<BoundedQueue<ConnectionLease>>,
    created: RwLock<usize>,
    unable_to_create_more: AtomicBool,
    acquire_calls: AtomicUsize,
    almost_full: Notify,
}

impl Partition {
    pub fn new(index: usize, config: &PoolConfig) -> Self {
        let max = config.max_connections_per_partition();
        let pending_release = (config.release_helper_threads() > 0)
            .then(|| BoundedQueue::new(max, config.service_order()));

        Self {
            index,
            min: config.min_connections_per_partition(),
            max,
            increment: config.acquire_increment(),
            free: BoundedQueue::new(max, config.service_order()),
            pending_release,
            created: RwLock::new(0),
            unable_to_create_more: AtomicBool::new(false),
            acquire_calls: AtomicUsize::new(0),
            almost_full: Notify::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn increment(&self) -> usize {
        self.increment
    }

    pub fn free(&self) -> &BoundedQueue<ConnectionLease> {
        &self.free
    }

    pub fn pending_release(&self) -> Option<&BoundedQueue<ConnectionLease>> {
        self.pending_release.as_ref()
    }

    pub fn created(&self) -> usize {
        *self.created.read()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Connections this partition may still open.
    pub fn room(&self) -> usize {
        self.max.saturating_sub(self.created())
    }

    /// Claim capacity for one new connection.
    ///
    /// Fails once the partition is at its maximum, and records that growth
    /// is no longer possible.
    pub fn try_reserve_slot(&self) -> bool {
        let mut created = self.created.write();
        if *created < self.max {
            *created += 1;
            true
        } else {
            self.unable_to_create_more.store(true, Ordering::Release);
            false
        }
    }

    /// Give back capacity after a connection was destroyed or failed to open.
    pub fn release_slot(&self) {
        let mut created = self.created.write();
        *created = created.saturating_sub(1);
        self.unable_to_create_more.store(false, Ordering::Release);
    }

    /// Record that the partition is at capacity, if it really is.
    pub fn mark_unable_to_create_more(&self) {
        let created = self.created.read();
        if *created >= self.max {
            self.unable_to_create_more.store(true, Ordering::Release);
        }
    }

    pub fn is_unable_to_create_more(&self) -> bool {
        self.unable_to_create_more.load(Ordering::Acquire)
    }

    /// Whether the free share of `max` has dropped below the growth threshold.
    pub fn is_running_low(&self) -> bool {
        self.free_count() * 100 / self.max < LOW_FREE_THRESHOLD_PERCENT
    }

    pub fn is_below_min(&self) -> bool {
        self.created() < self.min
    }

    /// Wake the watch task.
    pub fn signal_almost_full(&self) {
        self.almost_full.notify_one();
    }

    /// Wake the watch task on every other acquisition when free capacity
    /// runs low and the partition can still grow.
    pub fn maybe_signal_for_more(&self) {
        let call = self.acquire_calls.fetch_add(1, Ordering::Relaxed);
        if call % 2 == 0 && !self.is_unable_to_create_more() && self.is_running_low() {
            self.signal_almost_full();
        }
    }

    pub async fn almost_full_signalled(&self) {
        self.almost_full.notified().await;
    }

    pub fn stats(&self) -> PartitionStats {
        let created = self.created();
        let free = self.free_count();
        PartitionStats {
            index: self.index,
            created,
            free,
            leased: created.saturating_sub(free),
            min: self.min,
            max: self.max,
            unable_to_create_more: self.is_unable_to_create_more(),
        }
    }
}
