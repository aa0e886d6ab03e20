//! Error types for shardpool

use std::time::Duration;

use thiserror::Error;

/// SQL states reporting that the database itself is unreachable, as opposed
/// to a single connection going bad.
pub const DATABASE_DOWN_STATES: &[&str] = &["08001", "08007", "08S01", "57P01"];

/// State assumed for failures that carry no SQL state at all.
const UNKNOWN_CONNECTION_STATE: &str = "08999";

/// Core error type for pool operations
#[derive(Error, Debug)]
pub enum ShardpoolError {
    #[error("Timed out waiting for connection (timeout: {0:?})")]
    AcquisitionTimeout(Duration),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database error: {message}")]
    Database {
        message: String,
        sql_state: Option<String>,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Pool has been shut down")]
    PoolClosed,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// How a failure reported by a leased connection affects the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// The database is unreachable; every lease should be discarded.
    DatabaseDown,
    /// This one connection may be dead and must be probed before reuse.
    ConnectionBroken,
    /// An ordinary statement failure; the connection is fine.
    Unrelated,
}

impl ShardpoolError {
    /// Create a database error carrying a SQL state.
    pub fn database(message: impl Into<String>, sql_state: impl Into<String>) -> Self {
        ShardpoolError::Database {
            message: message.into(),
            sql_state: Some(sql_state.into()),
        }
    }

    /// The SQL state reported by the driver, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            ShardpoolError::Database { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Classify the error for broken-connection handling.
    ///
    /// Errors without a SQL state that come from the transport are treated as
    /// state `08999`. Class `08` and the implementation-defined classes `5`
    /// through `9` mark the connection as possibly broken.
    pub fn failure_class(&self) -> FailureClass {
        let state = match self {
            ShardpoolError::Database { sql_state, .. } => {
                sql_state.as_deref().unwrap_or(UNKNOWN_CONNECTION_STATE)
            }
            ShardpoolError::Connection(_) | ShardpoolError::Io(_) | ShardpoolError::Timeout(_) => {
                UNKNOWN_CONNECTION_STATE
            }
            _ => return FailureClass::Unrelated,
        };

        if DATABASE_DOWN_STATES.contains(&state) {
            return FailureClass::DatabaseDown;
        }

        let class = state.chars().next().unwrap_or('0');
        if state.starts_with("08") || ('5'..='9').contains(&class) {
            FailureClass::ConnectionBroken
        } else {
            FailureClass::Unrelated
        }
    }
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, ShardpoolError>;
