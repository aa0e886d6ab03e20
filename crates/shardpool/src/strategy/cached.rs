use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use shardpool_core::Result;

use super::{AcquisitionStrategy, DefaultStrategy};
use crate::config::StrategyKind;
use crate::connection::PooledConnection;
use crate::lease::ConnectionLease;
use crate::pool::{CallerId, PoolInner};

/// One caller's pinned connection
pub(crate) struct CachedSlot {
    /// Set while the pinned lease is out with its caller
    in_use: AtomicBool,
    /// The pinned lease while parked
    lease: Mutex<Option<ConnectionLease>>,
    /// The caller has finished; the lease must not be parked again
    orphaned: AtomicBool,
}

impl CachedSlot {
    fn checked_out() -> Self {
        Self {
            in_use: AtomicBool::new(true),
            lease: Mutex::new(None),
            orphaned: AtomicBool::new(false),
        }
    }
}

/// Pins one connection per caller on top of [`DefaultStrategy`]
///
/// Disables itself for good the first time a new caller cannot be served
/// without waiting; from then on every call goes through the default
/// strategy.
pub(crate) struct CachedStrategy {
    fallback: DefaultStrategy,
    slots: Mutex<HashMap<CallerId, Arc<CachedSlot>>>,
    disabled: AtomicBool,
}

impl CachedStrategy {
    pub fn new() -> Self {
        Self {
            fallback: DefaultStrategy,
            slots: Mutex::new(HashMap::new()),
            disabled: AtomicBool::new(false),
        }
    }

    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    fn remove_slot(&self, caller: CallerId, slot: &Arc<CachedSlot>) {
        let mut slots = self.slots.lock();
        if slots.get(&caller).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(&caller);
        }
    }

    /// Hand a pinned lease back to the pool, if it is parked.
    fn reclaim(&self, pool: &Arc<PoolInner>, slot: &CachedSlot) {
        slot.orphaned.store(true, Ordering::Release);
        let pinned = slot.lease.lock().take();
        if let Some(lease) = pinned {
            pool.release_detached(lease);
        }
    }

    fn disable(&self, pool: &Arc<PoolInner>) {
        if self.disabled.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::warn!(
            pool = %pool.config().pool_name(),
            "connection starvation with cached strategy, falling back to default strategy"
        );

        let slots: Vec<Arc<CachedSlot>> = self.slots.lock().drain().map(|(_, slot)| slot).collect();
        for slot in slots {
            self.reclaim(pool, &slot);
        }
    }
}

#[async_trait]
impl AcquisitionStrategy for CachedStrategy {
    fn kind(&self) -> StrategyKind {
        if self.is_disabled() {
            StrategyKind::Default
        } else {
            StrategyKind::Cached
        }
    }

    async fn acquire(
        &self,
        pool: &Arc<PoolInner>,
        caller: CallerId,
    ) -> Result<Option<PooledConnection>> {
        if self.is_disabled() {
            return self.fallback.acquire(pool, caller).await;
        }

        let existing = self.slots.lock().get(&caller).cloned();
        if let Some(slot) = existing {
            if slot
                .in_use
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // Re-entrant call while the pinned lease is out
                return self.fallback.acquire(pool, caller).await;
            }

            let pinned = slot.lease.lock().take();
            if let Some(lease) = pinned {
                return Ok(Some(pool.check_out(lease, caller, Some(slot))));
            }
            self.remove_slot(caller, &slot);
        }

        match self.fallback.poll(pool, caller) {
            Some(lease) => {
                let slot = Arc::new(CachedSlot::checked_out());
                self.slots.lock().insert(caller, slot.clone());
                if matches!(caller, CallerId::Thread(_)) {
                    register_thread_teardown(pool, caller);
                }
                Ok(Some(pool.check_out(lease, caller, Some(slot))))
            }
            None => {
                self.disable(pool);
                self.fallback.acquire(pool, caller).await
            }
        }
    }

    fn park(
        &self,
        pool: &PoolInner,
        slot: &Arc<CachedSlot>,
        lease: ConnectionLease,
    ) -> Option<ConnectionLease> {
        let mut pinned = slot.lease.lock();
        let keep = !self.is_disabled()
            && !slot.orphaned.load(Ordering::Acquire)
            && !pool.is_shutting_down()
            && !lease.is_possibly_broken()
            && !pool.is_retired(&lease);

        let returned = if keep {
            *pinned = Some(lease);
            None
        } else {
            Some(lease)
        };
        drop(pinned);
        slot.in_use.store(false, Ordering::Release);
        returned
    }

    fn caller_finished(&self, pool: &Arc<PoolInner>, caller: CallerId) {
        let slot = self.slots.lock().remove(&caller);
        if let Some(slot) = slot {
            tracing::trace!(?caller, "reclaiming pinned connection");
            self.reclaim(pool, &slot);
        }
    }

    async fn terminate_all(&self, pool: &PoolInner) {
        let slots: Vec<Arc<CachedSlot>> = self.slots.lock().values().cloned().collect();
        for slot in slots {
            let pinned = slot.lease.lock().take();
            if let Some(lease) = pinned {
                pool.destroy_lease(lease, "pinned connection terminated").await;
            }
        }
    }
}

thread_local! {
    static THREAD_TEARDOWN: RefCell<ThreadTeardown> = RefCell::new(ThreadTeardown::default());
}

/// Reports a thread caller as finished to every cached pool it used
#[derive(Default)]
struct ThreadTeardown {
    caller: Option<CallerId>,
    pools: Vec<Weak<PoolInner>>,
}

impl Drop for ThreadTeardown {
    fn drop(&mut self) {
        let Some(caller) = self.caller else {
            return;
        };
        for pool in self.pools.drain(..).filter_map(|pool| pool.upgrade()) {
            pool.strategy().caller_finished(&pool, caller);
        }
    }
}

fn register_thread_teardown(pool: &Arc<PoolInner>, caller: CallerId) {
    // Fails only while the thread's locals are being destroyed
    let _ = THREAD_TEARDOWN.try_with(|teardown| {
        let mut teardown = teardown.borrow_mut();
        teardown.caller = Some(caller);
        teardown.pools.retain(|known| known.strong_count() > 0);
        if !teardown.pools.iter().any(|known| known.as_ptr() == Arc::as_ptr(pool)) {
            teardown.pools.push(Arc::downgrade(pool));
        }
    });
}
