//! Testing utilities for code built on txretry.
//!
//! [`MockPool`] is an in-memory [`Pool`] whose failures are scripted, so
//! retry behavior can be exercised without a database server. It records
//! every call it receives as a [`MockEvent`]. [`RecordingReporter`] keeps
//! every report for inspection.
//!
//! # Examples
//!
//! ```rust
//! use txretry::classify::ErrorCode;
//! use txretry::testing::{Fault, MockPool, RecordingReporter};
//! use txretry::{assert_reports, Context, Db, IsolationLevel, Statements};
//! use txretry::error::DbError;
//!
//! # tokio_test::block_on(async {
//! let pool = MockPool::new();
//! pool.fail_statement(Fault::Code(ErrorCode::Number(1213)));
//!
//! let reporter = RecordingReporter::default();
//! let db = Db::builder(pool.clone()).reporter(reporter.clone()).build();
//!
//! db.run_rw_transaction(&Context::background(), IsolationLevel::Default, |tx| {
//!     Box::pin(async move {
//!         tx.exec("UPDATE stock SET qty = qty - 1", &[]).await?;
//!         Ok::<_, DbError>(())
//!     })
//! })
//! .await
//! .unwrap();
//!
//! assert_eq!(pool.begins(), 2);
//! assert_reports!(reporter, warnings: 1, errors: 0);
//! # });
//! ```

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::classify::{mysql, CodeTable, ErrorCode};
use crate::driver::{Dialect, Pool, Sentinel, Transaction, TxOptions};
use crate::report::{Report, Reporter, Severity};

/// A statement argument or row cell.
#[derive(Debug, Clone, PartialEq)]
pub enum MockValue {
    /// SQL `NULL`.
    Null,
    /// Integer.
    Int(i64),
    /// Text.
    Text(String),
}

/// A result row.
pub type MockRow = Vec<MockValue>;

/// A failure to inject into the next matching call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Server error carrying a backend code.
    Code(ErrorCode),
    /// The connection closed mid-read.
    Eof,
    /// The query matched no rows.
    RowNotFound,
    /// The transaction was already finished.
    TxDone,
    /// Error with no backend code.
    Message(String),
}

/// Error type of the mock driver.
#[derive(Debug, thiserror::Error)]
pub enum MockError {
    /// Server reported an error code.
    #[error("server returned {0}")]
    Server(ErrorCode),
    /// I/O failure on the connection.
    #[error("reading packet")]
    Io(#[source] io::Error),
    /// No rows.
    #[error("sql: no rows in result set")]
    NoRows,
    /// Transaction already finished.
    #[error("sql: transaction has already been committed or rolled back")]
    TxDone,
    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl From<Fault> for MockError {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::Code(code) => MockError::Server(code),
            Fault::Eof => MockError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "unexpected EOF",
            )),
            Fault::RowNotFound => MockError::NoRows,
            Fault::TxDone => MockError::TxDone,
            Fault::Message(msg) => MockError::Other(msg),
        }
    }
}

/// Dialect of the mock driver. Uses the MySQL code table.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockDialect;

impl Dialect for MockDialect {
    type Error = MockError;

    const CODES: &'static CodeTable = &mysql::CODES;

    fn error_code(err: &MockError) -> Option<ErrorCode> {
        match err {
            MockError::Server(code) => Some(code.clone()),
            _ => None,
        }
    }

    fn sentinel(err: &MockError) -> Option<Sentinel> {
        match err {
            MockError::NoRows => Some(Sentinel::RowNotFound),
            MockError::TxDone => Some(Sentinel::TxDone),
            _ => None,
        }
    }
}

/// A call received by the mock driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// `begin` with its options.
    Begin(TxOptions),
    /// `exec`
    Exec(String),
    /// `query`
    Query(String),
    /// `query_row`
    QueryRow(String),
    /// `prepare`
    Prepare(String),
    /// `commit`
    Commit,
    /// `rollback`
    Rollback,
}

/// A prepared statement handed out by the mock driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockStatement {
    /// The statement text.
    pub sql: String,
}

#[derive(Debug, Default)]
struct State {
    begin_faults: VecDeque<Fault>,
    statement_faults: VecDeque<Fault>,
    commit_faults: VecDeque<Fault>,
    rows: HashMap<String, Vec<MockRow>>,
    events: Vec<MockEvent>,
}

/// In-memory pool with scripted failures.
///
/// Clones share state, so a test can keep one clone for scripting and
/// inspection while the [`Db`](crate::Db) owns another.
#[derive(Debug, Clone, Default)]
pub struct MockPool {
    state: Arc<Mutex<State>>,
}

impl MockPool {
    /// A pool where every call succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `begin` that has no earlier fault queued.
    pub fn fail_begin(&self, fault: Fault) -> &Self {
        self.lock().begin_faults.push_back(fault);
        self
    }

    /// Fail the next statement (any kind) that has no earlier fault queued.
    pub fn fail_statement(&self, fault: Fault) -> &Self {
        self.lock().statement_faults.push_back(fault);
        self
    }

    /// Fail the next `n` statements with the same fault.
    pub fn fail_statements(&self, fault: Fault, n: usize) -> &Self {
        self.lock()
            .statement_faults
            .extend(std::iter::repeat_n(fault, n));
        self
    }

    /// Fail the next `commit` that has no earlier fault queued.
    pub fn fail_commit(&self, fault: Fault) -> &Self {
        self.lock().commit_faults.push_back(fault);
        self
    }

    /// Rows returned by `query`/`query_row` for exactly this statement text.
    pub fn with_rows(&self, sql: impl Into<String>, rows: Vec<MockRow>) -> &Self {
        self.lock().rows.insert(sql.into(), rows);
        self
    }

    /// Every call received so far.
    pub fn events(&self) -> Vec<MockEvent> {
        self.lock().events.clone()
    }

    /// Number of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&MockEvent) -> bool) -> usize {
        self.lock().events.iter().filter(|e| pred(e)).count()
    }

    /// Number of `begin` calls, i.e. transaction attempts.
    pub fn begins(&self) -> usize {
        self.count(|e| matches!(e, MockEvent::Begin(_)))
    }

    /// Number of `commit` calls.
    pub fn commits(&self) -> usize {
        self.count(|e| matches!(e, MockEvent::Commit))
    }

    /// Number of `rollback` calls.
    pub fn rollbacks(&self) -> usize {
        self.count(|e| matches!(e, MockEvent::Rollback))
    }

    fn statement(&self, event: MockEvent) -> Result<(), MockError> {
        let mut state = self.lock();
        state.events.push(event);
        match state.statement_faults.pop_front() {
            Some(fault) => Err(fault.into()),
            None => Ok(()),
        }
    }

    fn rows(&self, sql: &str) -> Vec<MockRow> {
        self.lock().rows.get(sql).cloned().unwrap_or_default()
    }

    fn exec_now(&self, sql: &str) -> Result<u64, MockError> {
        self.statement(MockEvent::Exec(sql.to_string()))?;
        Ok(1)
    }

    fn query_now(&self, sql: &str) -> Result<Vec<MockRow>, MockError> {
        self.statement(MockEvent::Query(sql.to_string()))?;
        Ok(self.rows(sql))
    }

    fn query_row_now(&self, sql: &str) -> Result<MockRow, MockError> {
        self.statement(MockEvent::QueryRow(sql.to_string()))?;
        self.rows(sql).into_iter().next().ok_or(MockError::NoRows)
    }

    fn prepare_now(&self, sql: &str) -> Result<MockStatement, MockError> {
        self.statement(MockEvent::Prepare(sql.to_string()))?;
        Ok(MockStatement {
            sql: sql.to_string(),
        })
    }
}

/// Transaction handed out by [`MockPool`].
#[derive(Debug)]
pub struct MockTx {
    pool: MockPool,
}

impl Transaction for MockTx {
    type Dialect = MockDialect;
    type Args = [MockValue];
    type ExecResult = u64;
    type Rows = Vec<MockRow>;
    type Row = MockRow;
    type Statement = MockStatement;

    async fn exec(&mut self, sql: &str, _args: &[MockValue]) -> Result<u64, MockError> {
        self.pool.exec_now(sql)
    }

    async fn query(&mut self, sql: &str, _args: &[MockValue]) -> Result<Vec<MockRow>, MockError> {
        self.pool.query_now(sql)
    }

    async fn query_row(&mut self, sql: &str, _args: &[MockValue]) -> Result<MockRow, MockError> {
        self.pool.query_row_now(sql)
    }

    async fn prepare(&mut self, sql: &str) -> Result<MockStatement, MockError> {
        self.pool.prepare_now(sql)
    }

    async fn commit(self) -> Result<(), MockError> {
        let mut state = self.pool.lock();
        state.events.push(MockEvent::Commit);
        match state.commit_faults.pop_front() {
            Some(fault) => Err(fault.into()),
            None => Ok(()),
        }
    }

    async fn rollback(self) -> Result<(), MockError> {
        self.pool.lock().events.push(MockEvent::Rollback);
        Ok(())
    }
}

impl Pool for MockPool {
    type Tx = MockTx;

    async fn begin(&self, options: TxOptions) -> Result<MockTx, MockError> {
        let fault = {
            let mut state = self.lock();
            state.events.push(MockEvent::Begin(options));
            state.begin_faults.pop_front()
        };
        match fault {
            Some(fault) => Err(fault.into()),
            None => Ok(MockTx { pool: self.clone() }),
        }
    }

    async fn exec(&self, sql: &str, _args: &[MockValue]) -> Result<u64, MockError> {
        self.exec_now(sql)
    }

    async fn query(&self, sql: &str, _args: &[MockValue]) -> Result<Vec<MockRow>, MockError> {
        self.query_now(sql)
    }

    async fn query_row(&self, sql: &str, _args: &[MockValue]) -> Result<MockRow, MockError> {
        self.query_row_now(sql)
    }

    async fn prepare(&self, sql: &str) -> Result<MockStatement, MockError> {
        self.prepare_now(sql)
    }
}

/// Reporter that keeps every report.
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    reports: Arc<Mutex<Vec<Report>>>,
}

impl RecordingReporter {
    /// All reports received so far, in order.
    pub fn reports(&self) -> Vec<Report> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of reports at `severity`.
    pub fn count(&self, severity: Severity) -> usize {
        self.reports()
            .iter()
            .filter(|r| r.severity == severity)
            .count()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, report: &Report) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report.clone());
    }
}

/// Assert how many warning and error reports a [`RecordingReporter`] holds.
///
/// # Example
///
/// ```rust
/// use txretry::assert_reports;
/// use txretry::testing::RecordingReporter;
///
/// let reporter = RecordingReporter::default();
/// assert_reports!(reporter, warnings: 0, errors: 0);
/// ```
#[macro_export]
macro_rules! assert_reports {
    ($reporter:expr, warnings: $warnings:expr, errors: $errors:expr) => {{
        let reports = $reporter.reports();
        let warnings = reports
            .iter()
            .filter(|r| r.severity == $crate::report::Severity::Warning)
            .count();
        let errors = reports
            .iter()
            .filter(|r| r.severity == $crate::report::Severity::Error)
            .count();
        assert_eq!(
            (warnings, errors),
            ($warnings, $errors),
            "unexpected (warnings, errors); reports: {:#?}",
            reports
        );
    }};
}
