//! One attempt of a transaction, and the handle the unit of work runs on.

use std::fmt;

use futures::future::BoxFuture;

use crate::classify::classify;
use crate::driver::{ArgsOf, ErrorOf, Pool, Transaction, TxOptions};
use crate::error::{detail, DbError};
use crate::report::Report;
use crate::retry::{Attempt, Stage};
use crate::statement::Statements;

/// A transaction as seen by a unit of work.
///
/// Statements return [`DbError`], with database detail hidden behind
/// [`WrappedError`](crate::error::WrappedError). Every statement failure is
/// remembered so the retry loop can report it, together with the statement
/// text and arguments. [`DbError::RowNotFound`] is a normal outcome and is
/// not remembered.
///
/// The handle cannot commit or roll back; the executor does that once the
/// unit of work returns.
pub struct TxHandle<X: Transaction> {
    tx: X,
    failures: Vec<Report>,
}

impl<X: Transaction> fmt::Debug for TxHandle<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxHandle")
            .field("failures", &self.failures.len())
            .finish_non_exhaustive()
    }
}

impl<X: Transaction> TxHandle<X> {
    pub(crate) fn new(tx: X) -> Self {
        Self {
            tx,
            failures: Vec::new(),
        }
    }

    /// Direct access to the driver transaction.
    ///
    /// Errors from calls made through this reference are neither wrapped nor
    /// reported.
    pub fn raw(&mut self) -> &mut X {
        &mut self.tx
    }

    fn into_parts(self) -> (X, Vec<Report>) {
        (self.tx, self.failures)
    }

    fn record<T>(
        &mut self,
        sql: &str,
        args: Option<&ArgsOf<X>>,
        result: Result<T, ErrorOf<X>>,
    ) -> Result<T, DbError> {
        result.map_err(|err| {
            let err = DbError::from_driver::<X::Dialect>(err);
            if !err.is_row_not_found() {
                let class = classify::<X::Dialect>(&err);
                let args = args.as_ref().map(|a| a as &dyn fmt::Debug);
                self.failures
                    .push(Report::new(class, &err).with_statement(sql, args));
            }
            err
        })
    }
}

impl<X: Transaction> Statements for TxHandle<X> {
    type Tx = X;

    async fn exec(&mut self, sql: &str, args: &ArgsOf<X>) -> Result<X::ExecResult, DbError> {
        let result = self.tx.exec(sql, args).await;
        self.record(sql, Some(args), result)
    }

    async fn query(&mut self, sql: &str, args: &ArgsOf<X>) -> Result<X::Rows, DbError> {
        let result = self.tx.query(sql, args).await;
        self.record(sql, Some(args), result)
    }

    async fn query_row(&mut self, sql: &str, args: &ArgsOf<X>) -> Result<X::Row, DbError> {
        let result = self.tx.query_row(sql, args).await;
        self.record(sql, Some(args), result)
    }

    async fn prepare(&mut self, sql: &str) -> Result<X::Statement, DbError> {
        let result = self.tx.prepare(sql).await;
        self.record(sql, None, result)
    }
}

/// Run one attempt: begin, run `work`, then commit or roll back.
///
/// `commit_attempted` is set only once `COMMIT` has been sent, whatever it
/// returned. A unit of work that fails is rolled back; a rollback error is
/// logged and otherwise ignored because the unit of work's error is what
/// the caller needs.
pub(crate) async fn run_once<P, T, E, F>(pool: &P, options: TxOptions, work: &mut F) -> Attempt<T, E>
where
    P: Pool,
    F: for<'t> FnMut(&'t mut TxHandle<P::Tx>) -> BoxFuture<'t, Result<T, E>>,
    E: From<DbError>,
{
    let tx = match pool.begin(options).await {
        Ok(tx) => tx,
        Err(err) => {
            let err = E::from(DbError::from_driver::<<P::Tx as Transaction>::Dialect>(err));
            return Attempt::new(false, Err(err)).at_stage(Stage::Begin);
        }
    };

    let mut handle = TxHandle::new(tx);
    let result = work(&mut handle).await;
    let (tx, failures) = handle.into_parts();

    match result {
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::debug!(error = %detail(&rollback), "rollback failed");
            }
            Attempt::new(false, Err(err)).with_failures(failures)
        }
        Ok(value) => {
            let result = tx
                .commit()
                .await
                .map(|()| value)
                .map_err(|err| E::from(DbError::from_driver::<<P::Tx as Transaction>::Dialect>(err)));
            Attempt::new(true, result)
                .at_stage(Stage::Commit)
                .with_failures(failures)
        }
    }
}
