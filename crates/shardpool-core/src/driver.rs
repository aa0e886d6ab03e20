//! Database driver traits consumed by the pool

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Where the pool opens its physical connections
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Driver-specific connection URL
    pub url: String,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Credentials passed to the driver when opening a connection
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Kind of statement being prepared
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StatementKind {
    #[default]
    Prepared,
    /// A stored-procedure call
    Callable,
}

/// Execution options that distinguish otherwise identical SQL text
///
/// Two statements share a cache entry only when both the SQL and every
/// option match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StatementOptions {
    pub kind: StatementKind,
    /// Ask the driver to return generated keys
    pub return_generated_keys: bool,
    /// Columns whose generated values should be returned
    pub key_columns: Vec<String>,
    /// Request a scrollable cursor instead of forward-only
    pub scrollable: bool,
}

impl StatementOptions {
    pub fn callable() -> Self {
        Self {
            kind: StatementKind::Callable,
            ..Self::default()
        }
    }

    pub fn with_generated_keys(mut self, columns: Vec<String>) -> Self {
        self.return_generated_keys = true;
        self.key_columns = columns;
        self
    }

    pub fn with_scrollable(mut self, scrollable: bool) -> Self {
        self.scrollable = scrollable;
        self
    }
}

/// Opens physical database connections
#[async_trait]
pub trait DatabaseDriver: Send + Sync + 'static {
    /// Driver name used in log fields (e.g., "postgresql")
    fn name(&self) -> &str;

    /// Open a new physical connection
    async fn open(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Box<dyn RawConnection>>;
}

#[async_trait]
impl<T: DatabaseDriver> DatabaseDriver for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn open(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Box<dyn RawConnection>> {
        (**self).open(endpoint, credentials).await
    }
}

/// A physical database connection
///
/// The pool owns each raw connection exclusively and never interprets the
/// SQL passed through it.
#[async_trait]
pub trait RawConnection: Send + Sync {
    /// Execute a statement and return the number of affected rows
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Lightweight liveness check (typically a metadata query)
    async fn ping(&self) -> Result<()>;

    /// Prepare a statement
    async fn prepare(
        &self,
        sql: &str,
        options: &StatementOptions,
    ) -> Result<Box<dyn RawStatement>>;

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;
}

/// A prepared statement owned by one physical connection
#[async_trait]
pub trait RawStatement: Send + Sync {
    /// The SQL this statement was prepared from
    fn sql(&self) -> &str;

    /// Execute the statement with positional parameters
    async fn execute(&self, params: &[&str]) -> Result<u64>;

    /// Close/deallocate the statement
    async fn close(self: Box<Self>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("app", "hunter2");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("app"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_statement_options_distinguish_keys() {
        let plain = StatementOptions::default();
        let callable = StatementOptions::callable();
        let keys = StatementOptions::default().with_generated_keys(vec!["id".into()]);

        assert_ne!(plain, callable);
        assert_ne!(plain, keys);
        assert!(keys.return_generated_keys);
    }
}
