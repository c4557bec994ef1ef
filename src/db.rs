//! The runner: a pool plus retry configuration, built once and shared.
//!
//! ```rust
//! use std::time::Duration;
//! use txretry::testing::MockPool;
//! use txretry::{Db, RetryPolicy};
//!
//! let db = Db::builder(MockPool::new())
//!     .transaction_policy(RetryPolicy::exponential(Duration::from_millis(20)).with_max_retries(5))
//!     .replay_on_commit_failure(false)
//!     .build();
//!
//! assert_eq!(db.config().transaction_policy.max_retries(), 5);
//! ```

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::Context;
use crate::driver::{IsolationLevel, Pool, Transaction, TxOptions};
use crate::error::DbError;
use crate::report::{Reporter, TracingReporter};
use crate::retry::{Retrier, RetryPolicy, Step};
use crate::statement::Transactionless;
use crate::tx::{run_once, TxHandle};

/// Retry settings of a [`Db`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Policy for whole transactions.
    pub transaction_policy: RetryPolicy,
    /// Policy for each statement run outside a transaction.
    pub statement_policy: RetryPolicy,
    /// Whether a failed `COMMIT` may rerun the unit of work.
    ///
    /// Turn this off when the unit of work has effects outside the database
    /// that must not happen twice.
    pub replay_on_commit_failure: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transaction_policy: RetryPolicy::default(),
            statement_policy: RetryPolicy::default(),
            replay_on_commit_failure: true,
        }
    }
}

/// Runs units of work against a pool, retrying transient failures.
///
/// Cloning is cheap when the pool is.
pub struct Db<P> {
    pub(crate) pool: P,
    pub(crate) config: Arc<Config>,
    pub(crate) reporter: Arc<dyn Reporter>,
}

impl<P: Clone> Clone for Db<P> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            config: Arc::clone(&self.config),
            reporter: Arc::clone(&self.reporter),
        }
    }
}

impl<P> fmt::Debug for Db<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<P: Pool> Db<P> {
    /// A runner with default settings, reporting through `tracing`.
    pub fn new(pool: P) -> Self {
        Self::builder(pool).build()
    }

    /// Start configuring a runner.
    pub fn builder(pool: P) -> DbBuilder<P> {
        DbBuilder {
            pool,
            config: Config::default(),
            reporter: Arc::new(TracingReporter),
        }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Active settings.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run `work` in a transaction, retrying the whole transaction while
    /// failures are transient and safe to repeat.
    ///
    /// `work` may run more than once, each time on a fresh transaction. A
    /// failure it returns is rolled back; success is committed. Errors of
    /// the application's own (anything that is not a [`DbError`] in the
    /// source chain) end the call at once and come back unchanged.
    ///
    /// `idempotent` declares that running `work` twice is harmless, which
    /// allows a retry even when the first `COMMIT` may have landed.
    pub async fn run_transaction<T, E, F>(
        &self,
        cx: &Context,
        options: TxOptions,
        idempotent: bool,
        mut work: F,
    ) -> Result<T, E>
    where
        F: for<'t> FnMut(&'t mut TxHandle<P::Tx>) -> BoxFuture<'t, Result<T, E>> + Send,
        T: Send,
        E: From<DbError> + StdError + Send + 'static,
    {
        let mut retrier = Retrier::<<P::Tx as Transaction>::Dialect>::new(
            &self.config.transaction_policy,
            &*self.reporter,
            idempotent,
        )
        .replay_commit(self.config.replay_on_commit_failure);

        loop {
            let outcome = run_once(&self.pool, options, &mut work).await;
            if let Step::Done(result) = retrier.settle(cx, outcome).await {
                return result;
            }
        }
    }

    /// [`run_transaction`](Db::run_transaction) for a read-write
    /// transaction whose work is not idempotent.
    pub async fn run_rw_transaction<T, E, F>(
        &self,
        cx: &Context,
        isolation: IsolationLevel,
        work: F,
    ) -> Result<T, E>
    where
        F: for<'t> FnMut(&'t mut TxHandle<P::Tx>) -> BoxFuture<'t, Result<T, E>> + Send,
        T: Send,
        E: From<DbError> + StdError + Send + 'static,
    {
        self.run_transaction(cx, TxOptions::read_write(isolation), false, work)
            .await
    }

    /// [`run_transaction`](Db::run_transaction) for a read-only
    /// transaction. Reads are always idempotent.
    pub async fn run_ro_transaction<T, E, F>(
        &self,
        cx: &Context,
        isolation: IsolationLevel,
        work: F,
    ) -> Result<T, E>
    where
        F: for<'t> FnMut(&'t mut TxHandle<P::Tx>) -> BoxFuture<'t, Result<T, E>> + Send,
        T: Send,
        E: From<DbError> + StdError + Send + 'static,
    {
        self.run_transaction(cx, TxOptions::read_only(isolation), true, work)
            .await
    }

    /// Run `work` once against autocommit statements, each of which is
    /// retried on its own.
    pub async fn run_transactionless<'a, T, E, F>(&'a self, cx: &'a Context, work: F) -> Result<T, E>
    where
        F: for<'s> FnOnce(&'s mut Transactionless<'a, P>) -> BoxFuture<'s, Result<T, E>>,
    {
        let mut statements = self.transactionless(cx);
        work(&mut statements).await
    }

    /// Autocommit statements bound to `cx`.
    pub fn transactionless<'a>(&'a self, cx: &'a Context) -> Transactionless<'a, P> {
        Transactionless::new(self, cx)
    }
}

/// Builder for [`Db`].
pub struct DbBuilder<P> {
    pool: P,
    config: Config,
    reporter: Arc<dyn Reporter>,
}

impl<P> fmt::Debug for DbBuilder<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<P: Pool> DbBuilder<P> {
    /// Replace all settings.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Retry policy for transactions.
    pub fn transaction_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.transaction_policy = policy;
        self
    }

    /// Retry policy for statements outside a transaction.
    pub fn statement_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.statement_policy = policy;
        self
    }

    /// See [`Config::replay_on_commit_failure`].
    pub fn replay_on_commit_failure(mut self, replay: bool) -> Self {
        self.config.replay_on_commit_failure = replay;
        self
    }

    /// Where reports go. Defaults to [`TracingReporter`].
    pub fn reporter(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    /// Finish.
    pub fn build(self) -> Db<P> {
        Db {
            pool: self.pool,
            config: Arc::new(self.config),
            reporter: self.reporter,
        }
    }
}
