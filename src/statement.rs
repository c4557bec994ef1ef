//! Statements outside a transaction, each retried on its own.
//!
//! Every statement run through [`Transactionless`] autocommits, so an error
//! may arrive after the server applied it. Such a statement is only repeated
//! when running it twice cannot change the outcome:
//!
//! | statement    | idempotent                         |
//! |--------------|------------------------------------|
//! | `prepare`    | always                             |
//! | `exec`       | never                              |
//! | `query`      | when [`is_read_only`] says so      |
//! | `query_row`  | when [`is_read_only`] says so      |

use std::fmt;
use std::future::Future;

use crate::classify::classify;
use crate::context::Context;
use crate::db::Db;
use crate::driver::{ArgsOf, ErrorOf, Pool, Transaction};
use crate::error::DbError;
use crate::report::Report;
use crate::retry::{Attempt, Retrier};

type DialectOf<P> = <<P as Pool>::Tx as Transaction>::Dialect;

/// Statement surface shared by [`TxHandle`](crate::TxHandle) and
/// [`Transactionless`], so data-access code can be written once.
pub trait Statements: Send {
    /// Driver transaction type whose statement types are used.
    type Tx: Transaction;

    /// Execute a statement that returns no rows.
    fn exec(
        &mut self,
        sql: &str,
        args: &ArgsOf<Self::Tx>,
    ) -> impl Future<Output = Result<<Self::Tx as Transaction>::ExecResult, DbError>> + Send;

    /// Run a query returning rows.
    fn query(
        &mut self,
        sql: &str,
        args: &ArgsOf<Self::Tx>,
    ) -> impl Future<Output = Result<<Self::Tx as Transaction>::Rows, DbError>> + Send;

    /// Run a query expected to return exactly one row.
    ///
    /// No match is [`DbError::RowNotFound`].
    fn query_row(
        &mut self,
        sql: &str,
        args: &ArgsOf<Self::Tx>,
    ) -> impl Future<Output = Result<<Self::Tx as Transaction>::Row, DbError>> + Send;

    /// Prepare a statement.
    fn prepare(
        &mut self,
        sql: &str,
    ) -> impl Future<Output = Result<<Self::Tx as Transaction>::Statement, DbError>> + Send;
}

/// Whether `sql` is a plain `SELECT`, after leading whitespace and `--`
/// comment lines.
///
/// A comment with no line break after it hides the rest of the text, so the
/// statement is not considered read-only. Matching is case-sensitive.
///
/// ```rust
/// use txretry::statement::is_read_only;
///
/// assert!(is_read_only("SELECT 1"));
/// assert!(is_read_only("-- fetch\nSELECT 1"));
/// assert!(!is_read_only("UPDATE t SET x = 1"));
/// assert!(!is_read_only("-- no newline"));
/// ```
pub fn is_read_only(sql: &str) -> bool {
    let mut rest = sql;
    loop {
        rest = rest.trim_start();
        let Some(comment) = rest.strip_prefix("--") else {
            return rest.starts_with("SELECT");
        };
        match comment.find('\n') {
            Some(end) => rest = &comment[end + 1..],
            None => return false,
        }
    }
}

/// Autocommit statements against a [`Db`]'s pool, each one retried.
pub struct Transactionless<'a, P: Pool> {
    db: &'a Db<P>,
    cx: &'a Context,
}

impl<P: Pool> fmt::Debug for Transactionless<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transactionless")
            .field("cx", self.cx)
            .finish_non_exhaustive()
    }
}

impl<'a, P: Pool> Transactionless<'a, P> {
    pub(crate) fn new(db: &'a Db<P>, cx: &'a Context) -> Self {
        Self { db, cx }
    }

    async fn retry<T, F, Fut>(
        &self,
        sql: &str,
        args: Option<&ArgsOf<P::Tx>>,
        idempotent: bool,
        mut op: F,
    ) -> Result<T, DbError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ErrorOf<P::Tx>>>,
    {
        let args = args.as_ref().map(|a| a as &(dyn fmt::Debug + Sync));
        Retrier::<DialectOf<P>>::new(&self.db.config.statement_policy, &*self.db.reporter, idempotent)
            .run(self.cx, |_| {
                let fut = op();
                async move {
                    let result = fut.await.map_err(DbError::from_driver::<DialectOf<P>>);
                    let failures = match &result {
                        Err(err) if !err.is_row_not_found() => {
                            vec![Report::new(classify::<DialectOf<P>>(err), err)
                                .with_statement(sql, args.map(|a| a as &dyn fmt::Debug))]
                        }
                        _ => Vec::new(),
                    };
                    // Autocommit: the server may have applied the statement.
                    Attempt::new(true, result).with_failures(failures)
                }
            })
            .await
    }
}

impl<P: Pool> Statements for Transactionless<'_, P> {
    type Tx = P::Tx;

    async fn exec(
        &mut self,
        sql: &str,
        args: &ArgsOf<P::Tx>,
    ) -> Result<<P::Tx as Transaction>::ExecResult, DbError> {
        let pool = &self.db.pool;
        self.retry(sql, Some(args), false, || pool.exec(sql, args))
            .await
    }

    async fn query(
        &mut self,
        sql: &str,
        args: &ArgsOf<P::Tx>,
    ) -> Result<<P::Tx as Transaction>::Rows, DbError> {
        let pool = &self.db.pool;
        self.retry(sql, Some(args), is_read_only(sql), || pool.query(sql, args))
            .await
    }

    async fn query_row(
        &mut self,
        sql: &str,
        args: &ArgsOf<P::Tx>,
    ) -> Result<<P::Tx as Transaction>::Row, DbError> {
        let pool = &self.db.pool;
        self.retry(sql, Some(args), is_read_only(sql), || pool.query_row(sql, args))
            .await
    }

    async fn prepare(&mut self, sql: &str) -> Result<<P::Tx as Transaction>::Statement, DbError> {
        let pool = &self.db.pool;
        self.retry(sql, None, true, || pool.prepare(sql)).await
    }
}
