//! Liveness probe for pooled connections
//!
//! A probe runs the configured test statement, or the driver's lightweight
//! `ping()` when none is configured, and measures the round-trip time.

use std::time::{Duration, Instant};

use shardpool_core::RawConnection;
use thiserror::Error;

/// Result of a probe: round-trip time on success
pub type PingResult = Result<Duration, PingError>;

/// Why a probe reported a connection as dead
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PingError {
    #[error("connection already closed by the driver")]
    ConnectionClosed,

    #[error("liveness check failed: {0}")]
    QueryFailed(String),

    #[error("liveness check exceeded its timeout")]
    Timeout,
}

/// Probe a connection to check if it's alive.
pub(crate) async fn probe(
    conn: &dyn RawConnection,
    test_statement: Option<&str>,
    timeout: Duration,
) -> PingResult {
    if conn.is_closed() {
        return Err(PingError::ConnectionClosed);
    }

    let start = Instant::now();
    let outcome = tokio::time::timeout(timeout, async {
        match test_statement {
            Some(sql) => conn.execute(sql).await.map(|_| ()),
            None => conn.ping().await,
        }
    })
    .await;

    match outcome {
        Ok(Ok(())) => Ok(start.elapsed()),
        Ok(Err(e)) => Err(PingError::QueryFailed(e.to_string())),
        Err(_) => Err(PingError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use shardpool_core::{Credentials, DatabaseDriver, Endpoint};

    use super::*;
    use crate::testing::MockDriver;

    const TIMEOUT: Duration = Duration::from_secs(1);

    async fn open(driver: &MockDriver) -> Box<dyn RawConnection> {
        driver
            .open(&Endpoint::default(), &Credentials::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_probe_reports_latency_for_live_connection() {
        let driver = MockDriver::new();
        let conn = open(&driver).await;
        assert!(probe(conn.as_ref(), None, TIMEOUT).await.is_ok());
        assert!(probe(conn.as_ref(), Some("SELECT 1"), TIMEOUT).await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_of_closed_connection() {
        let driver = MockDriver::new();
        let conn = open(&driver).await;
        conn.close().await.unwrap();

        assert_eq!(
            probe(conn.as_ref(), None, TIMEOUT).await,
            Err(PingError::ConnectionClosed)
        );
    }

    #[tokio::test]
    async fn test_failed_ping_carries_driver_message() {
        let driver = MockDriver::new();
        let conn = open(&driver).await;
        driver.state().set_ping_failure(true);

        let err = probe(conn.as_ref(), None, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, PingError::QueryFailed(_)));
        assert!(err.to_string().starts_with("liveness check failed: "));
        assert!(err.to_string().contains("ping failed"));
    }
}
