//! # txretry
//!
//! Transaction retry for relational database clients.
//!
//! Concurrent transactions fail in ways that go away if you try again:
//! deadlocks, lock-wait timeouts, serialization failures, a connection that
//! dropped mid-flight. This crate runs a unit of work inside a transaction
//! and, when it fails, decides whether running it again is both useful and
//! safe:
//!
//! - every backend error code is classified as always retryable,
//!   retryable only if safe, or fatal ([`classify`])
//! - "safe" means the `COMMIT` was never sent, or the caller declared the
//!   work idempotent ([`retry::should_retry`])
//! - attempts are spaced by a [`RetryPolicy`] and end early when the
//!   caller's [`Context`] is cancelled or times out
//! - errors crossing the boundary hide the driver's message
//!   ([`WrappedError`]) while operators get the full detail through a
//!   [`Reporter`]
//!
//! ## Quick Example
//!
//! ```rust
//! use txretry::prelude::*;
//! use txretry::testing::MockPool;
//!
//! # tokio_test::block_on(async {
//! let db = Db::new(MockPool::new());
//! let cx = Context::background();
//!
//! let rows = db
//!     .run_ro_transaction(&cx, IsolationLevel::RepeatableRead, |tx| {
//!         Box::pin(async move { tx.query("SELECT id FROM orders", &[]).await })
//!     })
//!     .await?;
//! assert!(rows.is_empty());
//! # Ok::<_, DbError>(())
//! # });
//! ```
//!
//! Plug in a real driver by implementing [`Dialect`], [`Transaction`] and
//! [`Pool`]. With the `mysql` or `postgres` feature, dialects for `sqlx`
//! errors are provided in [`classify::mysql`] and [`classify::postgres`].

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod classify;
pub mod context;
pub mod db;
pub mod driver;
pub mod error;
pub mod report;
pub mod retry;
pub mod statement;
pub mod testing;
pub mod tx;

// Re-exports
pub use classify::{ErrorClass, ErrorCode};
pub use context::Context;
pub use db::{Config, Db, DbBuilder};
pub use driver::{Dialect, IsolationLevel, Pool, Transaction, TxOptions};
pub use error::{DbError, Status, WrappedError};
pub use report::{Report, Reporter, Severity, TracingReporter};
pub use retry::{JitterStrategy, RetryPolicy, RetryStrategy};
pub use statement::{Statements, Transactionless};
pub use tx::TxHandle;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::context::Context;
    pub use crate::db::{Config, Db};
    pub use crate::driver::{IsolationLevel, TxOptions};
    pub use crate::error::DbError;
    pub use crate::retry::RetryPolicy;
    pub use crate::statement::Statements;
    pub use crate::tx::TxHandle;
}
