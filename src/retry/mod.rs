//! The retry loop.
//!
//! A call is a sequence of attempts. After each one the [`Retrier`] decides
//! between three outcomes:
//!
//! - **success**: the attempt returned `Ok`, the call ends
//! - **retry**: the error is transient and safe to repeat; wait, then loop
//! - **failure**: anything else, or the budget is spent; the call ends
//!
//! Whether an error is safe to repeat depends on its [`ErrorClass`], on
//! whether the attempt got as far as issuing `COMMIT`, and on whether the
//! caller declared the work idempotent. See [`should_retry`].
//!
//! # Quick Start
//!
//! ```rust
//! use txretry::retry::{Attempt, Retrier};
//! use txretry::testing::{MockDialect, RecordingReporter};
//! use txretry::{Context, RetryPolicy};
//! use txretry::error::DbError;
//!
//! # tokio_test::block_on(async {
//! let policy = RetryPolicy::default();
//! let reporter = RecordingReporter::default();
//!
//! let result: Result<u32, DbError> = Retrier::<MockDialect>::new(&policy, &reporter, false)
//!     .run(&Context::background(), |_attempt| async { Attempt::new(true, Ok(7)) })
//!     .await;
//!
//! assert_eq!(result.unwrap(), 7);
//! assert!(reporter.reports().is_empty());
//! # });
//! ```

mod policy;

pub use policy::{JitterStrategy, RetryPolicy, RetryStrategy, DEFAULT_MAX_RETRIES};

use std::error::Error as StdError;
use std::future::Future;
use std::marker::PhantomData;

use crate::classify::{classify, ErrorClass};
use crate::context::Context;
use crate::driver::Dialect;
use crate::error::{is_row_not_found, DbError};
use crate::report::{Report, Reporter, Severity};

/// Which step of an attempt produced its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Acquiring the transaction failed.
    Begin,
    /// The unit of work (or a single statement) ran to completion or failed.
    Work,
    /// `COMMIT` was issued.
    Commit,
}

/// Result of one attempt, handed to [`Retrier::settle`].
#[derive(Debug)]
pub struct Attempt<T, E> {
    /// `COMMIT` (or an autocommit statement) reached the driver, so the
    /// work may have landed even if an error came back.
    pub commit_attempted: bool,
    /// Which step produced `result`.
    pub stage: Stage,
    /// The attempt's outcome.
    pub result: Result<T, E>,
    /// Statement failures recorded during the attempt, oldest first.
    pub failures: Vec<Report>,
}

impl<T, E> Attempt<T, E> {
    /// An attempt that ended in the work stage.
    pub fn new(commit_attempted: bool, result: Result<T, E>) -> Self {
        Self {
            commit_attempted,
            stage: Stage::Work,
            result,
            failures: Vec::new(),
        }
    }

    /// Set the stage that produced the result.
    pub fn at_stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    /// Attach the statement failures recorded during the attempt.
    pub fn with_failures(mut self, failures: Vec<Report>) -> Self {
        self.failures = failures;
        self
    }
}

/// What the caller of [`Retrier::settle`] should do next.
#[derive(Debug)]
pub enum Step<T, E> {
    /// Run another attempt.
    Retry,
    /// The call is over.
    Done(Result<T, E>),
}

/// Whether an error of `class` may be retried.
///
/// ```rust
/// use txretry::classify::ErrorClass;
/// use txretry::retry::should_retry;
///
/// assert!(should_retry(ErrorClass::AlwaysRetryable, true, false));
/// assert!(should_retry(ErrorClass::RetryableIfSafe, false, false));
/// assert!(!should_retry(ErrorClass::RetryableIfSafe, true, false));
/// assert!(should_retry(ErrorClass::RetryableIfSafe, true, true));
/// assert!(!should_retry(ErrorClass::Fatal, false, true));
/// ```
pub fn should_retry(class: ErrorClass, commit_attempted: bool, idempotent: bool) -> bool {
    match class {
        ErrorClass::AlwaysRetryable => true,
        ErrorClass::RetryableIfSafe => !commit_attempted || idempotent,
        ErrorClass::Fatal => false,
    }
}

/// Retry state for one call.
///
/// Drive it either with [`run`](Retrier::run), passing a closure that
/// performs one attempt, or by calling [`settle`](Retrier::settle) after each
/// attempt yourself when the attempt needs to borrow from the caller.
pub struct Retrier<'a, D> {
    policy: &'a RetryPolicy,
    reporter: &'a dyn Reporter,
    idempotent: bool,
    replay_commit: bool,
    attempt: u32,
    reports: Vec<Report>,
    _dialect: PhantomData<fn() -> D>,
}

impl<D> std::fmt::Debug for Retrier<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retrier")
            .field("policy", self.policy)
            .field("idempotent", &self.idempotent)
            .field("replay_commit", &self.replay_commit)
            .field("attempt", &self.attempt)
            .field("pending_reports", &self.reports.len())
            .finish()
    }
}

impl<'a, D: Dialect> Retrier<'a, D> {
    /// Start a call.
    pub fn new(policy: &'a RetryPolicy, reporter: &'a dyn Reporter, idempotent: bool) -> Self {
        Self {
            policy,
            reporter,
            idempotent,
            replay_commit: true,
            attempt: 0,
            reports: Vec::new(),
            _dialect: PhantomData,
        }
    }

    /// Whether a failed `COMMIT` may replay the whole attempt (default `true`).
    pub fn replay_commit(mut self, replay: bool) -> Self {
        self.replay_commit = replay;
        self
    }

    /// The current attempt (0-based).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Run attempts until one succeeds or the call fails.
    pub async fn run<T, E, F, Fut>(mut self, cx: &Context, mut attempt_fn: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T, E>>,
        E: StdError + From<DbError> + Send + 'static,
    {
        loop {
            let outcome = attempt_fn(self.attempt).await;
            if let Step::Done(result) = self.settle(cx, outcome).await {
                return result;
            }
        }
    }

    /// Decide what follows an attempt, sleeping first if it is retried.
    pub async fn settle<T, E>(&mut self, cx: &Context, outcome: Attempt<T, E>) -> Step<T, E>
    where
        E: StdError + From<DbError> + Send + 'static,
    {
        let Attempt {
            commit_attempted,
            stage,
            result,
            mut failures,
        } = outcome;
        let attempt = self.attempt;

        let err = match result {
            Ok(value) => {
                if !failures.is_empty() {
                    tracing::debug!(
                        attempt,
                        handled = failures.len(),
                        "statement errors handled by the unit of work"
                    );
                }
                return self.finish(Ok(value));
            }
            Err(err) => err,
        };

        let class = classify::<D>(&err);
        let allowed = should_retry(class, commit_attempted, self.idempotent)
            && (stage != Stage::Commit || self.replay_commit);
        let delay = if allowed {
            self.policy.delay_with_jitter(attempt)
        } else {
            None
        };
        let severity = if delay.is_some() {
            Severity::Warning
        } else {
            Severity::Error
        };

        let reportable = !is_row_not_found(&err);
        // The last statement failure stands in for `err` only if the work
        // returned that failure; a handled one is just another warning.
        let last = if stage == Stage::Work && reportable {
            failures.pop_if(|last| last.describes(&err))
        } else {
            None
        };
        self.reports.extend(
            failures
                .into_iter()
                .map(|report| report.at(attempt, Severity::Warning)),
        );
        if reportable {
            let report = match last {
                Some(last) => Report { class, ..last },
                None => {
                    let report = Report::new(class, &err);
                    match stage {
                        Stage::Begin => report.with_statement("BEGIN", None),
                        Stage::Commit => report.with_statement("COMMIT", None),
                        Stage::Work => report,
                    }
                }
            };
            self.reports.push(report.at(attempt, severity));
        }

        let Some(delay) = delay else {
            tracing::debug!(
                attempt,
                %class,
                commit_attempted,
                idempotent = self.idempotent,
                ?stage,
                "giving up"
            );
            return self.finish(Err(err));
        };

        tracing::debug!(
            attempt,
            %class,
            commit_attempted,
            idempotent = self.idempotent,
            ?delay,
            "retrying"
        );
        drop(err);

        if let Err(done) = cx.sleep(delay).await {
            let err = E::from(done);
            self.reports
                .push(Report::new(ErrorClass::Fatal, &err).at(attempt, Severity::Error));
            return self.finish(Err(err));
        }

        self.attempt += 1;
        Step::Retry
    }

    fn finish<T, E>(&mut self, result: Result<T, E>) -> Step<T, E> {
        for report in self.reports.drain(..) {
            self.reporter.report(&report);
        }
        Step::Done(result)
    }
}
