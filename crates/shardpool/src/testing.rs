//! In-memory driver used by the unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use shardpool_core::{
    Credentials, DatabaseDriver, Endpoint, RawConnection, RawStatement, Result, ShardpoolError,
    StatementOptions,
};

use crate::config::PoolConfig;
use crate::pool::Pool;

/// Build a pool over a fresh mock driver.
pub(crate) async fn mock_pool(config: PoolConfig) -> (Pool, Arc<MockState>) {
    let driver = MockDriver::new();
    let state = driver.state();
    let pool = Pool::new(config, driver).await.expect("pool should build");
    (pool, state)
}

/// Poll `condition` until it holds or two seconds pass.
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Counters and failure switches shared by a driver and its connections
#[derive(Default)]
pub(crate) struct MockState {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub prepared: AtomicUsize,
    pub statements_closed: AtomicUsize,
    pub pings: AtomicUsize,
    /// Number of upcoming `open` calls that fail
    pub fail_opens: AtomicUsize,
    pub fail_pings: AtomicBool,
    /// SQL state returned by the next `execute`
    pub next_error_state: Mutex<Option<String>>,
}

impl MockState {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed
    pub fn live(&self) -> usize {
        self.opened() - self.closed()
    }

    pub fn prepared(&self) -> usize {
        self.prepared.load(Ordering::SeqCst)
    }

    pub fn statements_closed(&self) -> usize {
        self.statements_closed.load(Ordering::SeqCst)
    }

    pub fn fail_next_opens(&self, count: usize) {
        self.fail_opens.store(count, Ordering::SeqCst);
    }

    pub fn set_ping_failure(&self, fail: bool) {
        self.fail_pings.store(fail, Ordering::SeqCst);
    }

    pub fn fail_next_execute(&self, sql_state: &str) {
        *self.next_error_state.lock() = Some(sql_state.to_string());
    }

    fn take_execute_error(&self) -> Option<ShardpoolError> {
        self.next_error_state
            .lock()
            .take()
            .map(|state| ShardpoolError::database("injected failure", state))
    }
}

pub(crate) struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState::default()),
        }
    }

    pub fn state(&self) -> Arc<MockState> {
        self.state.clone()
    }
}

#[async_trait]
impl DatabaseDriver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(
        &self,
        _endpoint: &Endpoint,
        _credentials: &Credentials,
    ) -> Result<Box<dyn RawConnection>> {
        let failing = self
            .state
            .fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ShardpoolError::Connection("connection refused".into()));
        }

        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            state: self.state.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

pub(crate) struct MockConnection {
    state: Arc<MockState>,
    closed: AtomicBool,
}

#[async_trait]
impl RawConnection for MockConnection {
    async fn execute(&self, _sql: &str) -> Result<u64> {
        match self.state.take_execute_error() {
            Some(err) => Err(err),
            None => Ok(1),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_pings.load(Ordering::SeqCst) {
            return Err(ShardpoolError::Connection("ping failed".into()));
        }
        Ok(())
    }

    async fn prepare(
        &self,
        sql: &str,
        _options: &StatementOptions,
    ) -> Result<Box<dyn RawStatement>> {
        self.state.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStatement::new(sql, self.state.clone())))
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub(crate) struct MockStatement {
    sql: String,
    state: Arc<MockState>,
}

impl MockStatement {
    pub fn new(sql: &str, state: Arc<MockState>) -> Self {
        Self {
            sql: sql.to_string(),
            state,
        }
    }
}

#[async_trait]
impl RawStatement for MockStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    async fn execute(&self, _params: &[&str]) -> Result<u64> {
        match self.state.take_execute_error() {
            Some(err) => Err(err),
            None => Ok(1),
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.state.statements_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
