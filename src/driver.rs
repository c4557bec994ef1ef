//! The database client surface this crate drives.
//!
//! Connection pooling, statement execution and transactions belong to the
//! caller's driver. These traits describe the small part of that driver the
//! retry layer needs; implementing them for a concrete client is the only
//! integration work required.

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;

use crate::classify::{CodeTable, ErrorCode};

/// Backend error knowledge: how to find a code inside a driver error.
pub trait Dialect: Send + Sync + 'static {
    /// The driver's error type.
    type Error: StdError + Send + Sync + 'static;

    /// Retry table for this backend.
    const CODES: &'static CodeTable;

    /// Unwrap driver-specific wrappers to find the backend code.
    ///
    /// A severed connection does not need to be handled here; see
    /// [`locate_code`](crate::classify::locate_code).
    fn error_code(err: &Self::Error) -> Option<ErrorCode>;

    /// Recognise the driver conditions callers branch on by identity.
    fn sentinel(err: &Self::Error) -> Option<Sentinel> {
        let _ = err;
        None
    }
}

/// Driver conditions that pass through the wrapping layer unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentinel {
    /// The query returned no rows.
    RowNotFound,
    /// The transaction was already committed or rolled back.
    TxDone,
}

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IsolationLevel {
    /// Whatever the server is configured with.
    #[default]
    Default,
    /// `READ UNCOMMITTED`
    ReadUncommitted,
    /// `READ COMMITTED`
    ReadCommitted,
    /// `REPEATABLE READ`
    RepeatableRead,
    /// `SERIALIZABLE`
    Serializable,
}

impl IsolationLevel {
    /// SQL spelling, or `None` for the server default.
    pub fn as_sql(&self) -> Option<&'static str> {
        match self {
            IsolationLevel::Default => None,
            IsolationLevel::ReadUncommitted => Some("READ UNCOMMITTED"),
            IsolationLevel::ReadCommitted => Some("READ COMMITTED"),
            IsolationLevel::RepeatableRead => Some("REPEATABLE READ"),
            IsolationLevel::Serializable => Some("SERIALIZABLE"),
        }
    }
}

/// Options a transaction is started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TxOptions {
    /// Isolation level.
    pub isolation: IsolationLevel,
    /// Read-only access mode. Read-only transactions are idempotent.
    pub read_only: bool,
}

impl TxOptions {
    /// Read-write transaction at the given isolation level.
    pub fn read_write(isolation: IsolationLevel) -> Self {
        Self {
            isolation,
            read_only: false,
        }
    }

    /// Read-only transaction at the given isolation level.
    pub fn read_only(isolation: IsolationLevel) -> Self {
        Self {
            isolation,
            read_only: true,
        }
    }
}

/// Error type of a transaction's dialect.
pub type ErrorOf<X> = <<X as Transaction>::Dialect as Dialect>::Error;
/// Statement argument type of a transaction.
pub type ArgsOf<X> = <X as Transaction>::Args;

/// An open transaction.
///
/// Dropping a transaction without calling [`commit`](Transaction::commit) or
/// [`rollback`](Transaction::rollback) must release it on the driver side.
pub trait Transaction: Send {
    /// Error knowledge for this driver.
    type Dialect: Dialect;
    /// Bound statement arguments.
    type Args: ?Sized + fmt::Debug + Sync;
    /// Outcome of `exec` (e.g. rows affected).
    type ExecResult: Send;
    /// Result set of `query`.
    type Rows: Send;
    /// Single row of `query_row`.
    type Row: Send;
    /// Prepared statement.
    type Statement: Send;

    /// Execute a statement that returns no rows.
    fn exec(
        &mut self,
        sql: &str,
        args: &Self::Args,
    ) -> impl Future<Output = Result<Self::ExecResult, ErrorOf<Self>>> + Send;

    /// Run a query returning rows.
    fn query(
        &mut self,
        sql: &str,
        args: &Self::Args,
    ) -> impl Future<Output = Result<Self::Rows, ErrorOf<Self>>> + Send;

    /// Run a query expected to return exactly one row.
    fn query_row(
        &mut self,
        sql: &str,
        args: &Self::Args,
    ) -> impl Future<Output = Result<Self::Row, ErrorOf<Self>>> + Send;

    /// Prepare a statement.
    fn prepare(
        &mut self,
        sql: &str,
    ) -> impl Future<Output = Result<Self::Statement, ErrorOf<Self>>> + Send;

    /// Commit. The transaction is finished whatever the outcome.
    fn commit(self) -> impl Future<Output = Result<(), ErrorOf<Self>>> + Send;

    /// Roll back. The transaction is finished whatever the outcome.
    fn rollback(self) -> impl Future<Output = Result<(), ErrorOf<Self>>> + Send;
}

/// A connection pool: begins transactions and runs autocommit statements.
pub trait Pool: Send + Sync {
    /// Transactions handed out by this pool.
    type Tx: Transaction;

    /// Begin a transaction.
    fn begin(
        &self,
        options: TxOptions,
    ) -> impl Future<Output = Result<Self::Tx, ErrorOf<Self::Tx>>> + Send;

    /// Execute a statement outside a transaction.
    fn exec(
        &self,
        sql: &str,
        args: &ArgsOf<Self::Tx>,
    ) -> impl Future<Output = Result<<Self::Tx as Transaction>::ExecResult, ErrorOf<Self::Tx>>> + Send;

    /// Run a query outside a transaction.
    fn query(
        &self,
        sql: &str,
        args: &ArgsOf<Self::Tx>,
    ) -> impl Future<Output = Result<<Self::Tx as Transaction>::Rows, ErrorOf<Self::Tx>>> + Send;

    /// Run a single-row query outside a transaction.
    fn query_row(
        &self,
        sql: &str,
        args: &ArgsOf<Self::Tx>,
    ) -> impl Future<Output = Result<<Self::Tx as Transaction>::Row, ErrorOf<Self::Tx>>> + Send;

    /// Prepare a statement on a pooled connection.
    fn prepare(
        &self,
        sql: &str,
    ) -> impl Future<Output = Result<<Self::Tx as Transaction>::Statement, ErrorOf<Self::Tx>>> + Send;
}
