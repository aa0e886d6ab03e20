//! Shardpool Core - traits and types shared by the pool engine
//!
//! The pool never talks to a database directly. It sequences calls on the
//! collaborators defined here:
//!
//! - `DatabaseDriver` - opens physical connections
//! - `RawConnection` / `RawStatement` - the physical handles the pool leases out
//! - `ConnectionHook` - optional lifecycle callbacks
//! - `ShardpoolError` - the error type used across the workspace

mod driver;
mod error;
mod hook;

pub use driver::*;
pub use error::*;
pub use hook::*;
