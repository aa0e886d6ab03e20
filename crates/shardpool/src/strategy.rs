//! Acquisition strategies
//!
//! The default strategy polls the caller's preferred partition, scans the
//! others and finally waits. The cached strategy layers a per-caller pinned
//! connection over it.

mod cached;
mod default;

use std::sync::Arc;

use async_trait::async_trait;
use shardpool_core::Result;

use crate::config::StrategyKind;
use crate::connection::PooledConnection;
use crate::lease::ConnectionLease;
use crate::pool::{CallerId, PoolInner};

pub(crate) use cached::{CachedSlot, CachedStrategy};
pub(crate) use default::DefaultStrategy;

#[async_trait]
pub(crate) trait AcquisitionStrategy: Send + Sync {
    /// Strategy currently in effect
    fn kind(&self) -> StrategyKind;

    async fn acquire(
        &self,
        pool: &Arc<PoolInner>,
        caller: CallerId,
    ) -> Result<Option<PooledConnection>>;

    /// Keep a returned lease pinned to its caller slot.
    ///
    /// Returns the lease when it has to go through the normal release path.
    fn park(
        &self,
        _pool: &PoolInner,
        _slot: &Arc<CachedSlot>,
        lease: ConnectionLease,
    ) -> Option<ConnectionLease> {
        Some(lease)
    }

    /// The caller is gone; give back anything pinned to it.
    fn caller_finished(&self, _pool: &Arc<PoolInner>, _caller: CallerId) {}

    /// Destroy every lease the strategy holds on to.
    async fn terminate_all(&self, _pool: &PoolInner) {}
}

pub(crate) fn for_kind(kind: StrategyKind) -> Box<dyn AcquisitionStrategy> {
    match kind {
        StrategyKind::Default => Box::new(DefaultStrategy),
        StrategyKind::Cached => Box::new(CachedStrategy::new()),
    }
}
