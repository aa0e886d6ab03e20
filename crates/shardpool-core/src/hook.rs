//! Lifecycle callbacks invoked by the pool

use std::time::{Duration, Instant};

use crate::ShardpoolError;

/// Snapshot of a lease handed to hook callbacks
#[derive(Debug, Clone)]
pub struct LeaseInfo {
    /// Pool-unique lease identifier
    pub id: u64,
    /// Index of the partition the lease belongs to
    pub partition: usize,
    pub created_at: Instant,
    pub last_used_at: Instant,
}

/// Context for a failed attempt to open a physical connection
#[derive(Debug, Clone)]
pub struct AcquireFailContext {
    /// Zero-based number of the attempt that just failed
    pub attempt: u32,
    /// Retries configured after the first attempt
    pub max_retries: u32,
    /// Delay before the next attempt, if one is made
    pub next_delay: Duration,
    /// Connection URL being opened
    pub url: String,
}

impl AcquireFailContext {
    /// Retries still allowed by the configured policy.
    pub fn retries_remaining(&self) -> u32 {
        self.max_retries.saturating_sub(self.attempt)
    }
}

/// Verdict returned by [`ConnectionHook::on_mark_possibly_broken`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Let the pool classify the failure itself
    #[default]
    Nop,
    /// Treat this connection as possibly broken
    PossiblyBroken,
    /// Treat the database as down: discard every connection and repopulate
    TerminateAll,
}

/// Optional callbacks around the lease lifecycle
///
/// Every method has a default so implementors only override what they need.
/// Callbacks run inline on pool tasks and must not block.
pub trait ConnectionHook: Send + Sync + 'static {
    /// A new physical connection was opened.
    fn on_acquire(&self, _lease: &LeaseInfo) {}

    /// A lease was handed to a caller.
    fn on_check_out(&self, _lease: &LeaseInfo) {}

    /// A lease was given back by a caller.
    fn on_check_in(&self, _lease: &LeaseInfo) {}

    /// A physical connection is about to be closed for good.
    fn on_destroy(&self, _lease: &LeaseInfo) {}

    /// Opening a connection failed. Return `true` to retry.
    fn on_acquire_fail(&self, _error: &ShardpoolError, context: &AcquireFailContext) -> bool {
        context.retries_remaining() > 0
    }

    /// A leased connection reported an error that looks like a broken
    /// connection. Return `false` to keep using the connection anyway.
    fn on_connection_exception(&self, _lease: &LeaseInfo, _error: &ShardpoolError) -> bool {
        true
    }

    /// Classify an error reported by a leased connection.
    fn on_mark_possibly_broken(
        &self,
        _lease: &LeaseInfo,
        _error: &ShardpoolError,
    ) -> ConnectionState {
        ConnectionState::Nop
    }
}
