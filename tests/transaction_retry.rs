//! End-to-end transaction retry against the mock driver.

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use txretry::assert_reports;
use txretry::classify::ErrorCode;
use txretry::prelude::*;
use txretry::testing::{Fault, MockEvent, MockPool, MockTx, MockValue, RecordingReporter};
use txretry::{Severity, Status};

#[derive(Debug, thiserror::Error)]
enum OrderError {
    #[error("order {0} is already shipped")]
    AlreadyShipped(i64),
    #[error(transparent)]
    Db(#[from] DbError),
}

fn lock_wait_timeout() -> Fault {
    Fault::Code(ErrorCode::Number(1205))
}

fn setup() -> (MockPool, RecordingReporter, Db<MockPool>) {
    let pool = MockPool::new();
    let reporter = RecordingReporter::default();
    let db = Db::builder(pool.clone()).reporter(reporter.clone()).build();
    (pool, reporter, db)
}

fn ship(tx: &mut TxHandle<MockTx>) -> BoxFuture<'_, Result<(), OrderError>> {
    Box::pin(async move {
        tx.exec("UPDATE orders SET shipped = 1 WHERE id = ?", &[MockValue::Int(42)])
            .await?;
        Ok(())
    })
}

#[tokio::test(start_paused = true)]
async fn lock_wait_timeouts_are_retried_until_success() {
    let (pool, reporter, db) = setup();
    pool.fail_statements(lock_wait_timeout(), 3);

    let result = db
        .run_rw_transaction(&Context::background(), IsolationLevel::Default, ship)
        .await;

    assert!(result.is_ok());
    assert_eq!(pool.begins(), 4);
    assert_eq!(pool.rollbacks(), 3);
    assert_eq!(pool.commits(), 1);
    assert_reports!(reporter, warnings: 3, errors: 0);

    let reports = reporter.reports();
    assert!(reports
        .iter()
        .all(|r| r.statement.as_deref() == Some("UPDATE orders SET shipped = 1 WHERE id = ?")));
    assert_eq!(
        reports.iter().map(|r| r.attempt).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
}

#[tokio::test(start_paused = true)]
async fn retry_budget_is_bounded() {
    let (pool, reporter, db) = setup();
    pool.fail_statements(lock_wait_timeout(), 10);

    let err = db
        .run_rw_transaction(&Context::background(), IsolationLevel::Default, ship)
        .await
        .unwrap_err();

    match err {
        OrderError::Db(db_err) => assert_eq!(db_err.status(), Status::Aborted),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(pool.begins(), 4);
    assert_reports!(reporter, warnings: 3, errors: 1);
}

#[tokio::test(start_paused = true)]
async fn connection_lost_during_commit_is_not_replayed() {
    let (pool, reporter, db) = setup();
    pool.fail_commit(Fault::Eof);

    let err = db
        .run_rw_transaction(&Context::background(), IsolationLevel::Default, ship)
        .await
        .unwrap_err();

    let OrderError::Db(db_err) = err else {
        panic!("expected a database error");
    };
    assert_eq!(db_err.status(), Status::Unavailable);
    assert_eq!(db_err.to_string(), "database unavailable");
    assert_eq!(pool.begins(), 1);
    assert_reports!(reporter, warnings: 0, errors: 1);
    assert_eq!(reporter.reports()[0].statement.as_deref(), Some("COMMIT"));
}

#[tokio::test(start_paused = true)]
async fn idempotent_work_is_replayed_after_lost_commit() {
    let (pool, reporter, db) = setup();
    pool.fail_commit(Fault::Eof);

    db.run_transaction(
        &Context::background(),
        TxOptions::read_write(IsolationLevel::Serializable),
        true,
        ship,
    )
    .await
    .unwrap();

    assert_eq!(pool.begins(), 2);
    assert_eq!(pool.commits(), 2);
    assert_reports!(reporter, warnings: 1, errors: 0);
}

#[tokio::test(start_paused = true)]
async fn read_only_transactions_are_idempotent() {
    let (pool, _reporter, db) = setup();
    pool.fail_commit(Fault::Eof)
        .with_rows("SELECT total FROM orders WHERE id = 42", vec![vec![MockValue::Int(99)]]);

    let row = db
        .run_ro_transaction(&Context::background(), IsolationLevel::RepeatableRead, |tx| {
            Box::pin(async move {
                tx.query_row("SELECT total FROM orders WHERE id = 42", &[])
                    .await
            })
        })
        .await
        .unwrap();

    assert_eq!(row, vec![MockValue::Int(99)]);
    assert_eq!(
        pool.events()[0],
        MockEvent::Begin(TxOptions::read_only(IsolationLevel::RepeatableRead))
    );
    assert_eq!(pool.begins(), 2);
}

#[tokio::test(start_paused = true)]
async fn application_errors_are_returned_unchanged() {
    let (pool, reporter, db) = setup();
    let calls = Arc::new(AtomicU32::new(0));

    let err = db
        .run_rw_transaction(&Context::background(), IsolationLevel::Default, |_tx| {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(OrderError::AlreadyShipped(42))
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::AlreadyShipped(42)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(pool.rollbacks(), 1);
    assert_eq!(pool.commits(), 0);
    assert_reports!(reporter, warnings: 0, errors: 1);
}

#[tokio::test(start_paused = true)]
async fn handled_statement_errors_are_not_reported_on_success() {
    let (pool, reporter, db) = setup();
    pool.fail_statement(Fault::Message("Duplicate entry '42' for key 'PRIMARY'".into()));

    db.run_rw_transaction(&Context::background(), IsolationLevel::Default, |tx| {
        Box::pin(async move {
            if tx.exec("INSERT INTO orders (id) VALUES (42)", &[]).await.is_err() {
                tx.exec("UPDATE orders SET qty = qty + 1 WHERE id = 42", &[])
                    .await?;
            }
            Ok::<_, DbError>(())
        })
    })
    .await
    .unwrap();

    assert_eq!(pool.begins(), 1);
    assert!(reporter.reports().is_empty());
}

#[tokio::test(start_paused = true)]
async fn returned_error_is_reported_after_a_handled_one() {
    let (pool, reporter, db) = setup();
    pool.fail_statement(Fault::Message("Duplicate entry '42' for key 'PRIMARY'".into()));

    let err = db
        .run_rw_transaction(&Context::background(), IsolationLevel::Default, |tx| {
            Box::pin(async move {
                let _ = tx.exec("INSERT INTO orders (id) VALUES (42)", &[]).await;
                Err::<(), _>(OrderError::AlreadyShipped(42))
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::AlreadyShipped(42)));
    assert_eq!(pool.begins(), 1);
    assert_reports!(reporter, warnings: 1, errors: 1);

    let reports = reporter.reports();
    assert_eq!(
        reports[0].statement.as_deref(),
        Some("INSERT INTO orders (id) VALUES (42)")
    );
    assert_eq!(reports[0].severity, Severity::Warning);
    assert_eq!(reports[1].severity, Severity::Error);
    assert_eq!(reports[1].statement, None);
    assert_eq!(reports[1].message, "order 42 is already shipped");
}

#[tokio::test(start_paused = true)]
async fn failed_statement_returned_by_work_is_reported_with_its_text() {
    let (pool, reporter, db) = setup();
    pool.fail_statement(Fault::Message("Unknown column 'shiped'".into()));

    db.run_rw_transaction(&Context::background(), IsolationLevel::Default, ship)
        .await
        .unwrap_err();

    assert_reports!(reporter, warnings: 0, errors: 1);
    assert_eq!(
        reporter.reports()[0].statement.as_deref(),
        Some("UPDATE orders SET shipped = 1 WHERE id = ?")
    );
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_retry_loop() {
    let (pool, reporter, db) = setup();
    pool.fail_statements(lock_wait_timeout(), 10);
    let cx = Context::background().with_timeout(Duration::from_millis(60));

    let err = db
        .run_rw_transaction(&cx, IsolationLevel::Default, ship)
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::Db(DbError::DeadlineExceeded)));
    assert_eq!(pool.begins(), 2);
    let reports = reporter.reports();
    assert_eq!(reports.last().map(|r| r.severity), Some(Severity::Error));
    assert_reports!(reporter, warnings: 2, errors: 1);
}

#[tokio::test(start_paused = true)]
async fn default_reporter_logs_through_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let pool = MockPool::new();
    pool.fail_statement(lock_wait_timeout());
    let db = Db::new(pool.clone());

    db.run_rw_transaction(&Context::background(), IsolationLevel::Default, ship)
        .await
        .unwrap();

    assert_eq!(pool.begins(), 2);
}
